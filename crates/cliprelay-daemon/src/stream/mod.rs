//! Muxer supervision and clip delivery.

pub mod continuity;
pub mod destination;
pub mod platform;
pub mod set;

pub use continuity::{ContinuityReader, PACKET_SIZE, alignment_padding};
pub use destination::{Destination, DestinationStatus, SYNC_PACKET, Segment, SegmentEnd};
pub use platform::IngestProfile;
pub use set::DestinationSet;
