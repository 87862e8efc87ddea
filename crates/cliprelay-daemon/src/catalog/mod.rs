//! Clip catalog: disk and S3 transports, clip selection and periodic refresh.

pub mod refresh;
pub mod s3;
pub mod selector;
pub mod transport;

pub use refresh::spawn_refresh_task;
pub use s3::S3Transport;
pub use selector::{Catalog, Clip, ClipReference};
pub use transport::{CatalogTransport, ClipReader, DiskTransport};
