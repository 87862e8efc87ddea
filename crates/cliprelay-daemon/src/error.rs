//! Relay engine error types.

use std::io;

use cliprelay_core::Platform;

/// Errors from the clip catalog and selector.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Neither the queue nor the pick strategy produced a clip.
    #[error("No content available")]
    NoContent,

    #[error("Failed to list clips under '{prefix}': {source}")]
    Listing {
        prefix: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to fetch clip '{key}': {source}")]
    Fetch {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid clip key: {0}")]
    InvalidKey(String),
}

/// Errors from destination lifecycle and engine commands.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Failed to spawn muxer for {platform}: {reason}")]
    SpawnFailed { platform: Platform, reason: String },

    #[error("Failed to kill muxer for {platform}: {source}")]
    KillFailed {
        platform: Platform,
        #[source]
        source: io::Error,
    },

    #[error("Destination {0} is not running")]
    NotRunning(Platform),

    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("Stream key not set for: {}", join_platforms(.0))]
    MissingToken(Vec<Platform>),

    #[error("Unknown or expired ticket: {0}")]
    UnknownTicket(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

fn join_platforms(platforms: &[Platform]) -> String {
    platforms
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A read was abandoned because the destination's lifecycle scope was cancelled.
///
/// Travels inside [`io::Error`] so it can cross `AsyncRead` boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Read cancelled: destination stopped")]
pub struct Cancelled;

impl From<Cancelled> for io::Error {
    fn from(value: Cancelled) -> Self {
        Self::other(value)
    }
}

/// Whether `err` carries a [`Cancelled`] marker.
pub fn is_cancellation(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.downcast_ref::<Cancelled>().is_some())
}
