//! All configured destinations, keyed by platform.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use cliprelay_core::{Config, Platform};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info, warn};

use super::destination::{Destination, DestinationStatus, Segment};
use super::platform::IngestProfile;
use crate::error::RelayError;

/// Chunks buffered per destination when one clip feeds several muxers.
const FANOUT_DEPTH: usize = 8;

pub struct DestinationSet {
    destinations: BTreeMap<Platform, Arc<Destination>>,
}

impl DestinationSet {
    pub fn new(destinations: impl IntoIterator<Item = Destination>) -> Self {
        Self {
            destinations: destinations
                .into_iter()
                .map(|d| (d.platform(), Arc::new(d)))
                .collect(),
        }
    }

    /// One destination per configured platform, with stream keys read from disk.
    pub fn from_config(config: &Config) -> cliprelay_core::Result<Self> {
        let mut destinations = Vec::with_capacity(config.destinations.len());
        for dest in &config.destinations {
            let profile = IngestProfile::with_endpoint(dest.platform, dest.endpoint.as_deref());
            info!(platform = %dest.platform, "Init destination");
            destinations.push(
                Destination::new(profile, &config.ffmpeg_path)
                    .with_token(dest.read_token()?)
                    .with_stop_grace(config.relay.stop_grace()),
            );
        }
        Ok(Self::new(destinations))
    }

    pub fn get(&self, platform: Platform) -> Option<&Arc<Destination>> {
        self.destinations.get(&platform)
    }

    pub fn platforms(&self) -> impl Iterator<Item = Platform> + '_ {
        self.destinations.keys().copied()
    }

    /// Start every destination. On the first failure everything is stopped again.
    pub async fn start_all(&self) -> Result<(), RelayError> {
        for dest in self.destinations.values() {
            if let Err(e) = dest.start().await {
                warn!(platform = %dest.platform(), error = %e, "Start failed, stopping all");
                if let Err(stop_err) = self.stop_all().await {
                    warn!(error = %stop_err, "Cleanup after failed start also failed");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stop every destination, returning the first failure.
    pub async fn stop_all(&self) -> Result<(), RelayError> {
        let mut first_err = None;
        for dest in self.destinations.values() {
            if let Err(e) = dest.stop().await {
                warn!(platform = %dest.platform(), error = %e, "Stop failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub async fn running(&self) -> Vec<Arc<Destination>> {
        let mut running = Vec::new();
        for dest in self.destinations.values() {
            if dest.is_running().await {
                running.push(Arc::clone(dest));
            }
        }
        running
    }

    pub async fn status(&self) -> Vec<DestinationStatus> {
        let mut status = Vec::with_capacity(self.destinations.len());
        for dest in self.destinations.values() {
            status.push(dest.status().await);
        }
        status
    }

    pub async fn missing_tokens(&self) -> Vec<Platform> {
        let mut missing = Vec::new();
        for dest in self.destinations.values() {
            if !dest.has_token().await {
                missing.push(dest.platform());
            }
        }
        missing
    }

    /// Feed one clip to every running destination.
    ///
    /// Several destinations share the clip through a fan-out task, so each
    /// muxer sees the same bytes. Returns one segment per fed destination;
    /// an empty list means nothing was running.
    pub async fn feed_all<R>(&self, content: R, length: u64) -> Result<Vec<Segment>, RelayError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let running = self.running().await;
        match running.as_slice() {
            [] => Ok(Vec::new()),
            [only] => Ok(vec![only.feed(content, length).await?]),
            _ => {
                let mut senders = Vec::with_capacity(running.len());
                let mut segments = Vec::with_capacity(running.len());
                let mut first_err = None;
                for dest in &running {
                    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(FANOUT_DEPTH);
                    match dest
                        .feed(StreamReader::new(ReceiverStream::new(rx)), length)
                        .await
                    {
                        Ok(segment) => {
                            senders.push(tx);
                            segments.push(segment);
                        }
                        // Stopped between the running check and the feed.
                        Err(e) => {
                            first_err.get_or_insert(e);
                        }
                    }
                }

                if segments.is_empty() {
                    return Err(first_err
                        .unwrap_or_else(|| RelayError::NotRunning(running[0].platform())));
                }
                tokio::spawn(fan_out(content, senders));
                Ok(segments)
            }
        }
    }
}

/// Copy `content` chunk by chunk into every sender. Destinations that went
/// away are dropped; the rest see end of stream when the clip ends.
async fn fan_out<R>(content: R, mut senders: Vec<mpsc::Sender<io::Result<Bytes>>>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut chunks = ReaderStream::new(content);
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(bytes) => {
                let mut alive = Vec::with_capacity(senders.len());
                for tx in senders {
                    if tx.send(Ok(bytes.clone())).await.is_ok() {
                        alive.push(tx);
                    }
                }
                senders = alive;
                if senders.is_empty() {
                    debug!("No destination left for fan-out");
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "Clip read failed during fan-out");
                for tx in &senders {
                    let _ = tx.send(Err(io::Error::new(e.kind(), e.to_string()))).await;
                }
                return;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn set() -> DestinationSet {
        DestinationSet::new([Destination::new(
            IngestProfile::new(Platform::Twitch),
            "/nonexistent/cliprelay/ffmpeg",
        )])
    }

    #[tokio::test]
    async fn feed_all_with_nothing_running_feeds_nobody() {
        let segments = set().feed_all(tokio::io::empty(), 0).await.unwrap();
        assert!(segments.is_empty());
    }

    #[tokio::test]
    async fn stop_all_on_stopped_set_succeeds() {
        set().stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn start_all_reports_first_failure_and_stays_stopped() {
        let set = set();
        assert_eq!(set.missing_tokens().await, vec![Platform::Twitch]);
        let err = set.start_all().await.unwrap_err();
        assert!(matches!(err, RelayError::MissingToken(_)));
        assert!(set.running().await.is_empty());
    }

    #[tokio::test]
    async fn fan_out_delivers_identical_streams() {
        use tokio::io::AsyncReadExt;

        let clip: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
        let mut readers = Vec::new();
        let mut senders = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(FANOUT_DEPTH);
            senders.push(tx);
            readers.push(StreamReader::new(ReceiverStream::new(rx)));
        }
        tokio::spawn(fan_out(std::io::Cursor::new(clip.clone()), senders));

        let mut reads = Vec::new();
        for mut reader in readers {
            reads.push(tokio::spawn(async move {
                let mut out = Vec::new();
                reader.read_to_end(&mut out).await.unwrap();
                out
            }));
        }
        for read in reads {
            assert_eq!(read.await.unwrap(), clip);
        }
    }
}
