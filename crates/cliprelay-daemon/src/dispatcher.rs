//! Control loop chaining clips into the running destinations.
//!
//! The dispatcher idles until woken (start, enqueue, a refresh that lists
//! clips), then relays clips back to back: pick, fetch, feed every running
//! destination, and wait for every segment to end before picking again. It
//! drops back to idle when nothing is running, nothing is selectable, a
//! catalog call fails, or a clip turns out empty. There is no retry; the next
//! wake-up tries again.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::error::CatalogError;
use crate::stream::{DestinationSet, Segment, SegmentEnd};

/// What to do after one relay attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// A clip played to its end on at least one destination; pick the next one.
    Next,
    /// Wait for a wake-up.
    Idle,
    Shutdown,
}

pub struct Dispatcher {
    catalog: Arc<Catalog>,
    destinations: Arc<DestinationSet>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub const fn new(
        catalog: Arc<Catalog>,
        destinations: Arc<DestinationSet>,
        wake: Arc<Notify>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            destinations,
            wake,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        info!("Dispatcher started");
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = self.wake.notified() => {}
            }

            loop {
                match self.relay_next().await {
                    Step::Next => {}
                    Step::Idle => break,
                    Step::Shutdown => {
                        info!("Dispatcher shutting down");
                        return;
                    }
                }
            }
        }
        info!("Dispatcher shutting down");
    }

    async fn relay_next(&self) -> Step {
        if self.destinations.running().await.is_empty() {
            debug!("No running destination, dispatcher idle");
            return Step::Idle;
        }

        let reference = match self.catalog.get_next().await {
            Ok(reference) => reference,
            Err(CatalogError::NoContent) => {
                info!("No content available, dispatcher idle");
                return Step::Idle;
            }
            Err(e) => {
                warn!(error = %e, "Clip selection failed");
                return Step::Idle;
            }
        };

        let clip = match self.catalog.fetch(&reference).await {
            Ok(clip) => clip,
            Err(e) => {
                warn!(key = %reference.key, error = %e, "Clip fetch failed, dispatcher idle");
                return Step::Idle;
            }
        };

        let key = clip.reference.key;
        let length = clip.reference.length;
        let segments = match self.destinations.feed_all(clip.content, length).await {
            Ok(segments) if segments.is_empty() => {
                debug!(key = %key, "Destinations stopped before feed");
                return Step::Idle;
            }
            Ok(segments) => segments,
            Err(e) => {
                warn!(key = %key, error = %e, "Feed failed");
                return Step::Idle;
            }
        };
        info!(key = %key, length, destinations = segments.len(), "Relaying clip");

        tokio::select! {
            () = self.shutdown.cancelled() => Step::Shutdown,
            ends = drain(segments) => {
                let step = next_step(&ends);
                debug!(key = %key, ?step, "Clip finished");
                if step == Step::Idle {
                    if ends.iter().any(|end| matches!(end, SegmentEnd::Exhausted { .. })) {
                        warn!(key = %key, "Clip is empty, dispatcher idle");
                    } else {
                        debug!(key = %key, "Clip interrupted on every destination");
                    }
                }
                step
            }
        }
    }
}

/// Wait for every segment and collect how each one ended.
async fn drain(segments: Vec<Segment>) -> Vec<SegmentEnd> {
    let mut ends = Vec::with_capacity(segments.len());
    for segment in segments {
        let platform = segment.platform();
        let end = segment.wait().await;
        match end {
            SegmentEnd::Exhausted { consumed } => {
                debug!(platform = %platform, consumed, "End of segment");
            }
            SegmentEnd::Interrupted => debug!(platform = %platform, "Segment interrupted"),
        }
        ends.push(end);
    }
    ends
}

/// Keep chaining only when a destination actually played clip bytes. A clip
/// that ended empty everywhere would otherwise be picked again at once.
fn next_step(ends: &[SegmentEnd]) -> Step {
    let played = ends
        .iter()
        .any(|end| matches!(end, SegmentEnd::Exhausted { consumed } if *consumed > 0));
    if played { Step::Next } else { Step::Idle }
}
