//! Muxer process supervisor for one streaming destination.
//!
//! A destination owns at most one ffmpeg process. The process handle and its
//! stdin live together in one optional session, so a destination is either
//! Running (both present) or Stopped (neither). Start/Stop/Feed serialize on
//! the session lock.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use cliprelay_core::Platform;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::continuity::{ContinuityReader, FILLER, PACKET_SIZE, alignment_padding};
use super::platform::IngestProfile;
use crate::error::{RelayError, is_cancellation};

/// Transport stream null packet written once per session so the muxer locks
/// onto packet boundaries before the first clip.
pub const SYNC_PACKET: [u8; PACKET_SIZE as usize] = null_packet();

const fn null_packet() -> [u8; PACKET_SIZE as usize] {
    let mut packet = [0xFF; PACKET_SIZE as usize];
    packet[0] = 0x47;
    packet[1] = 0x1F;
    packet[2] = 0xFF;
    packet[3] = 0x10;
    packet
}

/// Read size when copying a clip into the muxer.
const COPY_CHUNK: usize = 64 * 1024;

/// How a fed clip finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEnd {
    /// The clip's stream was read to the end.
    Exhausted { consumed: u64 },
    /// The feed was cancelled or failed before the clip ended.
    Interrupted,
}

/// End-of-segment signal for one `feed` call. Resolves exactly once.
#[derive(Debug)]
pub struct Segment {
    platform: Platform,
    rx: oneshot::Receiver<u64>,
}

impl Segment {
    pub const fn platform(&self) -> Platform {
        self.platform
    }

    pub async fn wait(self) -> SegmentEnd {
        match self.rx.await {
            Ok(consumed) => SegmentEnd::Exhausted { consumed },
            Err(_) => SegmentEnd::Interrupted,
        }
    }
}

/// Point-in-time view of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationStatus {
    pub platform: Platform,
    pub running: bool,
    pub has_token: bool,
}

struct MuxerInput {
    /// `None` once the pipe has been closed for a graceful stop.
    stdin: Option<ChildStdin>,
    synced: bool,
}

struct Session {
    child: Child,
    input: Arc<Mutex<MuxerInput>>,
    scope: CancellationToken,
}

pub struct Destination {
    profile: IngestProfile,
    ffmpeg_path: PathBuf,
    stop_grace: Option<Duration>,
    token: RwLock<Option<String>>,
    session: Mutex<Option<Session>>,
}

impl Destination {
    pub fn new(profile: IngestProfile, ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            profile,
            ffmpeg_path: ffmpeg_path.into(),
            stop_grace: None,
            token: RwLock::new(None),
            session: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_token(self, token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
            ..self
        }
    }

    /// Close the input and wait up to `grace` before killing on stop.
    #[must_use]
    pub const fn with_stop_grace(mut self, grace: Option<Duration>) -> Self {
        self.stop_grace = grace;
        self
    }

    pub const fn platform(&self) -> Platform {
        self.profile.platform
    }

    /// Replace the stream key. Takes effect on the next start.
    pub async fn set_token(&self, token: impl Into<String>) {
        *self.token.write().await = Some(token.into());
        info!(platform = %self.platform(), "Stream key updated");
    }

    pub async fn has_token(&self) -> bool {
        self.token
            .read()
            .await
            .as_deref()
            .is_some_and(|t| !t.is_empty())
    }

    /// Whether the muxer is alive. A muxer that exited on its own is reaped
    /// here and the destination becomes Stopped.
    pub async fn is_running(&self) -> bool {
        let mut session = self.session.lock().await;
        let Some(current) = session.as_mut() else {
            return false;
        };
        match current.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!(platform = %self.platform(), %status, "Muxer exited unexpectedly");
                if let Some(dead) = session.take() {
                    dead.scope.cancel();
                }
                false
            }
            Err(e) => {
                warn!(platform = %self.platform(), error = %e, "Failed to poll muxer status");
                true
            }
        }
    }

    pub async fn status(&self) -> DestinationStatus {
        DestinationStatus {
            platform: self.platform(),
            running: self.is_running().await,
            has_token: self.has_token().await,
        }
    }

    /// Spawn the muxer. No-op when already running.
    pub async fn start(&self) -> Result<(), RelayError> {
        if self.is_running().await {
            debug!(platform = %self.platform(), "Muxer already running");
            return Ok(());
        }

        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        let platform = self.platform();
        let token = self
            .token
            .read()
            .await
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RelayError::MissingToken(vec![platform]))?;

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(self.profile.muxer_args(&token))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            platform = %platform,
            ffmpeg = %self.ffmpeg_path.display(),
            endpoint = %self.profile.endpoint,
            "Spawning muxer"
        );
        let mut child = cmd.spawn().map_err(|e| RelayError::SpawnFailed {
            platform,
            reason: e.to_string(),
        })?;

        let Some(stdin) = child.stdin.take() else {
            // Dropping the child kills it.
            return Err(RelayError::SpawnFailed {
                platform,
                reason: "Failed to capture stdin".to_string(),
            });
        };

        let scope = CancellationToken::new();
        if let Some(stderr) = child.stderr.take() {
            spawn_diagnostics_drain(platform, stderr, scope.clone());
        }

        info!(platform = %platform, pid = ?child.id(), "Muxer started");
        *session = Some(Session {
            child,
            input: Arc::new(Mutex::new(MuxerInput {
                stdin: Some(stdin),
                synced: false,
            })),
            scope,
        });
        Ok(())
    }

    /// Cancel in-flight reads and terminate the muxer. No-op when stopped.
    pub async fn stop(&self) -> Result<(), RelayError> {
        let platform = self.platform();
        // Held until the old process is gone so a concurrent start cannot overlap.
        let mut slot = self.session.lock().await;
        let Some(mut session) = slot.take() else {
            return Ok(());
        };
        session.scope.cancel();

        if let Some(grace) = self.stop_grace {
            let input = Arc::clone(&session.input);
            let graceful = tokio::time::timeout(grace, async {
                // Dropping stdin closes the pipe; the muxer flushes and exits.
                drop(input.lock().await.stdin.take());
                session.child.wait().await
            })
            .await;
            match graceful {
                Ok(Ok(status)) => {
                    info!(platform = %platform, %status, "Muxer exited gracefully");
                    return Ok(());
                }
                Ok(Err(e)) => warn!(platform = %platform, error = %e, "Error waiting for muxer"),
                Err(_) => warn!(platform = %platform, "Timeout waiting for muxer, killing"),
            }
        }

        if let Ok(Some(status)) = session.child.try_wait() {
            info!(platform = %platform, %status, "Muxer already exited");
            return Ok(());
        }
        session
            .child
            .kill()
            .await
            .map_err(|source| RelayError::KillFailed { platform, source })?;
        info!(platform = %platform, "Muxer stopped");
        Ok(())
    }

    /// Pipe one clip into the running muxer. Returns as soon as the copy is
    /// scheduled; the returned [`Segment`] resolves when the clip ends.
    ///
    /// Callers must wait for the previous segment before feeding again.
    pub async fn feed<R>(&self, content: R, length: u64) -> Result<Segment, RelayError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let platform = self.platform();
        let (scope, input) = {
            let session = self.session.lock().await;
            let running = session.as_ref().ok_or(RelayError::NotRunning(platform))?;
            (running.scope.clone(), Arc::clone(&running.input))
        };

        let (tx, rx) = oneshot::channel();
        let mut reader = ContinuityReader::new(content, scope, tx);

        tokio::spawn(async move {
            let mut input = input.lock().await;
            let MuxerInput { stdin, synced } = &mut *input;
            let Some(stdin) = stdin.as_mut() else {
                debug!(platform = %platform, "Muxer input closed, dropping clip");
                return;
            };

            // Bytes of this clip that reached the muxer, filler included.
            let mut written = 0u64;
            let mut buf = vec![0u8; COPY_CHUNK];
            let result = async {
                if !*synced {
                    stdin.write_all(&SYNC_PACKET).await?;
                    *synced = true;
                }
                loop {
                    let n = reader.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    stdin.write_all(&buf[..n]).await?;
                    written += n as u64;
                }
                stdin.flush().await
            }
            .await;

            match result {
                Ok(()) => debug!(
                    platform = %platform,
                    length,
                    consumed = reader.consumed(),
                    written,
                    "Clip delivered"
                ),
                Err(e) if is_cancellation(&e) => {
                    debug!(platform = %platform, "Feed cancelled");
                }
                Err(e) => {
                    // The next clip must still start on a packet boundary.
                    let padding = alignment_padding(written);
                    warn!(platform = %platform, error = %e, written, padding, "Feed failed");
                    if let Err(e) = pad_input(stdin, padding).await {
                        warn!(platform = %platform, error = %e, "Failed to pad muxer input");
                    }
                }
            }
        });

        Ok(Segment { platform, rx })
    }
}

async fn pad_input(stdin: &mut ChildStdin, padding: u64) -> std::io::Result<()> {
    let n = usize::try_from(padding).unwrap_or(FILLER.len()).min(FILLER.len());
    stdin.write_all(&FILLER[..n]).await?;
    stdin.flush().await
}

/// Log the muxer's stderr line by line until it closes or the session ends.
fn spawn_diagnostics_drain(platform: Platform, stderr: ChildStderr, scope: CancellationToken) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            tokio::select! {
                () = scope.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if !line.is_empty() {
                            warn!(platform = %platform, "muxer: {}", line);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(platform = %platform, error = %e, "Unable to read muxer output");
                        break;
                    }
                },
            }
        }
        debug!(platform = %platform, "stderr reader finished");
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn destination(ffmpeg: &str) -> Destination {
        Destination::new(IngestProfile::new(Platform::Twitch), ffmpeg)
    }

    #[test]
    fn sync_packet_is_ts_null_packet() {
        assert_eq!(SYNC_PACKET.len(), 188);
        assert_eq!(&SYNC_PACKET[..4], &[0x47, 0x1F, 0xFF, 0x10]);
        assert!(SYNC_PACKET[4..].iter().all(|b| *b == 0xFF));
    }

    #[tokio::test]
    async fn stop_when_stopped_is_noop() {
        let dest = destination("ffmpeg");
        dest.stop().await.unwrap();
        dest.stop().await.unwrap();
        assert!(!dest.is_running().await);
    }

    #[tokio::test]
    async fn start_requires_token() {
        let dest = destination("ffmpeg");
        let err = dest.start().await.unwrap_err();
        assert!(matches!(err, RelayError::MissingToken(_)));
        assert!(!dest.is_running().await);
    }

    #[tokio::test]
    async fn spawn_failure_leaves_destination_stopped() {
        let dest = destination("/nonexistent/cliprelay/ffmpeg");
        dest.set_token("live_key").await;
        let err = dest.start().await.unwrap_err();
        assert!(matches!(err, RelayError::SpawnFailed { .. }));
        assert!(!dest.is_running().await);
    }

    #[tokio::test]
    async fn feed_requires_running() {
        let dest = destination("ffmpeg");
        let result = dest.feed(tokio::io::empty(), 0).await;
        assert!(matches!(result, Err(RelayError::NotRunning(Platform::Twitch))));
    }

    #[tokio::test]
    async fn token_is_independent_of_lifecycle() {
        let dest = destination("ffmpeg");
        assert!(!dest.has_token().await);
        dest.set_token("abc").await;
        let status = dest.status().await;
        assert!(status.has_token);
        assert!(!status.running);
    }
}
