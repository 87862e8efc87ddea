//! Clip reader that keeps the muxer's input alive across clip boundaries.
//!
//! Wraps one clip's byte stream. Each read first checks the destination's
//! lifecycle scope and fails with [`Cancelled`] once it is cancelled. When
//! the clip runs out, the reader reports the end of the segment exactly once
//! and then yields zero filler so the bytes delivered for this clip end on a
//! transport stream packet boundary. It never closes the muxer's stdin; only
//! the clip ends.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::error::Cancelled;

/// MPEG transport stream packet size.
pub const PACKET_SIZE: u64 = 188;

pub(crate) const FILLER: [u8; PACKET_SIZE as usize] = [0; PACKET_SIZE as usize];

/// Filler bytes needed after `consumed` bytes to reach the next packet boundary.
pub const fn alignment_padding(consumed: u64) -> u64 {
    (PACKET_SIZE - consumed % PACKET_SIZE) % PACKET_SIZE
}

pub struct ContinuityReader<R> {
    inner: R,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    consumed: u64,
    /// Filler still owed, set once `inner` is exhausted.
    padding: Option<u64>,
    /// Fired with the consumed byte count when `inner` is exhausted.
    end_of_segment: Option<oneshot::Sender<u64>>,
}

impl<R> ContinuityReader<R> {
    pub fn new(inner: R, scope: CancellationToken, end_of_segment: oneshot::Sender<u64>) -> Self {
        Self {
            inner,
            cancelled: Box::pin(scope.cancelled_owned()),
            consumed: 0,
            padding: None,
            end_of_segment: Some(end_of_segment),
        }
    }

    /// Clip bytes read so far, filler excluded.
    pub const fn consumed(&self) -> u64 {
        self.consumed
    }

    fn put_filler(&mut self, buf: &mut ReadBuf<'_>) {
        let owed = self.padding.unwrap_or(0);
        let n = usize::try_from(owed)
            .unwrap_or(usize::MAX)
            .min(buf.remaining());
        buf.put_slice(&FILLER[..n]);
        self.padding = Some(owed - n as u64);
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ContinuityReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        // Polling also registers the waker, so a read blocked on `inner`
        // wakes up as soon as the scope is cancelled.
        if this.cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(Cancelled.into()));
        }
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        if this.padding.is_some() {
            this.put_filler(buf);
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let read = buf.filled().len() - before;
        if read > 0 {
            this.consumed += read as u64;
            return Poll::Ready(Ok(()));
        }

        if let Some(tx) = this.end_of_segment.take() {
            // The receiver may already be gone; the clip still ends cleanly.
            let _ = tx.send(this.consumed);
        }
        this.padding = Some(alignment_padding(this.consumed));
        this.put_filler(buf);
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot::error::TryRecvError;

    use super::*;
    use crate::error::is_cancellation;

    fn reader<R>(inner: R) -> (ContinuityReader<R>, CancellationToken, oneshot::Receiver<u64>) {
        let scope = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        (ContinuityReader::new(inner, scope.clone(), tx), scope, rx)
    }

    #[test]
    fn padding_always_reaches_boundary() {
        for len in (0..2_000).chain([u64::from(u32::MAX), 188 * 1_000_000 + 1]) {
            let pad = alignment_padding(len);
            assert!(pad < PACKET_SIZE, "pad {pad} for {len}");
            assert_eq!((len + pad) % PACKET_SIZE, 0, "len {len}");
        }
        assert_eq!(alignment_padding(0), 0);
        assert_eq!(alignment_padding(188), 0);
        assert_eq!(alignment_padding(189), 187);
    }

    #[tokio::test]
    async fn pads_and_signals_once_at_end() {
        let clip = vec![7u8; 200];
        let (mut reader, _scope, mut rx) = reader(std::io::Cursor::new(clip));

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out.len(), 376);
        assert!(out[..200].iter().all(|b| *b == 7));
        assert!(out[200..].iter().all(|b| *b == 0));
        assert_eq!(rx.try_recv().unwrap(), 200);
        assert_eq!(reader.consumed(), 200);

        // Further reads stay at EOF without a second signal.
        let mut more = [0u8; 16];
        assert_eq!(reader.read(&mut more).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn aligned_clip_gets_no_filler() {
        let (mut reader, _scope, rx) = reader(std::io::Cursor::new(vec![1u8; 376]));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out.len(), 376);
        assert_eq!(rx.await.unwrap(), 376);
    }

    #[tokio::test]
    async fn empty_clip_signals_without_filler() {
        let (mut reader, _scope, rx) = reader(tokio::io::empty());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(rx.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn filler_spans_small_reads() {
        let (mut reader, _scope, _rx) = reader(std::io::Cursor::new(vec![1u8; 10]));
        let mut out = Vec::new();
        let mut chunk = [0u8; 7];
        loop {
            let n = reader.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(out.len(), 188);
    }

    #[tokio::test]
    async fn no_signal_before_exhaustion() {
        let (mut writer, inner) = tokio::io::duplex(64);
        let (mut reader, _scope, mut rx) = reader(inner);

        writer.write_all(b"0123456789").await.unwrap();
        let mut buf = [0u8; 10];
        reader.read_exact(&mut buf).await.unwrap();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        drop(writer);
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest.len(), 178);
        assert_eq!(rx.try_recv().unwrap(), 10);
    }

    #[tokio::test]
    async fn cancellation_unblocks_pending_read() {
        let (_writer, inner) = tokio::io::duplex(64);
        let (mut reader, scope, rx) = reader(inner);

        let read = tokio::spawn(async move {
            let mut buf = [0u8; 32];
            reader.read(&mut buf).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        scope.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), read)
            .await
            .expect("read should not block after cancellation")
            .unwrap();
        assert!(is_cancellation(&result.unwrap_err()));
        // The reader was dropped without finishing the clip.
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn cancelled_scope_fails_first_read() {
        let (mut reader, scope, _rx) = reader(std::io::Cursor::new(vec![1u8; 10]));
        scope.cancel();
        let mut buf = [0u8; 4];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert!(is_cancellation(&err));
    }
}
