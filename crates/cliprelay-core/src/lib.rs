//! `cliprelay` Core Library
//!
//! Shared functionality for the relay daemon:
//! - Configuration model, loading and validation
//! - Common error types
//! - Tracing initialisation

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::{Config, Platform};
pub use error::{Error, Result};
