//! Bounded capture of a server's stderr for diagnostics.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Ring buffer holding the most recent `capacity` bytes of stderr.
#[derive(Debug, Clone)]
pub struct StderrTail {
    inner: Arc<Mutex<VecDeque<u8>>>,
    capacity: usize,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64 * 1024)))),
            capacity,
        }
    }

    pub fn push(&self, bytes: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        let bytes = if bytes.len() > self.capacity {
            &bytes[bytes.len() - self.capacity..]
        } else {
            bytes
        };
        let mut buf = self.inner.lock();
        let overflow = (buf.len() + bytes.len()).saturating_sub(self.capacity);
        buf.drain(..overflow);
        buf.extend(bytes);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Captured text, lossily decoded and trimmed. `None` when nothing
    /// printable was captured.
    pub fn snapshot(&self) -> Option<String> {
        let bytes: Vec<u8> = self.inner.lock().iter().copied().collect();
        let text = String::from_utf8_lossy(&bytes);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// Drain `reader` into `tail` until EOF or cancellation.
///
/// Read errors end the drain silently; stderr is diagnostics only.
pub fn spawn_drain<R>(reader: R, tail: StderrTail, cancel: CancellationToken) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = reader;
        let mut chunk = [0u8; 4096];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                read = reader.read(&mut chunk) => match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => tail.push(&chunk[..n]),
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_most_recent_bytes() {
        let tail = StderrTail::new(8);
        tail.push(b"hello ");
        tail.push(b"world");
        assert_eq!(tail.len(), 8);
        assert_eq!(tail.snapshot().as_deref(), Some("lo world"));
    }

    #[test]
    fn oversized_single_push_keeps_suffix() {
        let tail = StderrTail::new(4);
        tail.push(b"abcdefgh");
        assert_eq!(tail.snapshot().as_deref(), Some("efgh"));
    }

    #[test]
    fn zero_capacity_captures_nothing() {
        let tail = StderrTail::new(0);
        tail.push(b"ignored");
        assert!(tail.is_empty());
        assert!(tail.snapshot().is_none());
    }

    #[test]
    fn whitespace_only_is_none() {
        let tail = StderrTail::new(16);
        tail.push(b"\n  \n");
        assert!(tail.snapshot().is_none());
    }

    #[tokio::test]
    async fn drain_reads_until_eof() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let tail = StderrTail::new(1024);
        let handle = spawn_drain(reader, tail.clone(), CancellationToken::new());
        tokio::io::AsyncWriteExt::write_all(&mut writer, b"warning: deprecated\n")
            .await
            .unwrap();
        drop(writer);
        handle.await.unwrap();
        assert_eq!(tail.snapshot().as_deref(), Some("warning: deprecated"));
    }

    #[tokio::test]
    async fn drain_stops_on_cancel() {
        let (_writer, reader) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let handle = spawn_drain(reader, StderrTail::new(16), cancel.clone());
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
