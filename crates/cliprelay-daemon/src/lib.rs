//! cliprelay Daemon Library
//!
//! Relays pre-recorded clips as one uninterrupted live stream:
//! - Clip catalog with an explicit queue and random picks
//! - Continuity reader padding each clip to transport stream packet boundaries
//! - One ffmpeg muxer per destination, fed through its stdin
//! - Dispatcher chaining clips back to back
//! - Operator console and stream key exchange

pub mod catalog;
pub mod console;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod stream;

pub use engine::RelayEngine;
pub use error::{CatalogError, RelayError};
