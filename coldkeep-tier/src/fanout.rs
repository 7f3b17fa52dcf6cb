//! Stream fan-out over bounded in-memory pipes.
//!
//! One producer is copied to N consumers. Each branch is a
//! [`tokio::io::duplex`] pipe with a fixed buffer, so a slow consumer
//! eventually blocks the producer rather than growing memory.
//!
//! Branch 0 is primary: if it stops accepting bytes the pump fails. Any other
//! branch that fails is detached and the pump carries on without it.

use std::io;

use coldkeep_core::limits::STREAM_CHUNK_BYTES;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::warn;

/// Result of a completed pump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutStats {
    /// Bytes read from the producer.
    pub bytes: u64,
    /// Secondary branches that failed and were detached.
    pub detached: Vec<usize>,
}

/// Write halves of the branch pipes.
#[derive(Debug)]
pub struct Fanout {
    writers: Vec<Option<DuplexStream>>,
}

impl Fanout {
    /// Creates a fan-out with `branches` pipes of `buffer_bytes` each.
    ///
    /// Returns the pump and the read half of each branch, in branch order.
    ///
    /// # Panics
    ///
    /// Panics if `branches` or `buffer_bytes` is zero.
    #[must_use]
    pub fn new(branches: usize, buffer_bytes: usize) -> (Self, Vec<DuplexStream>) {
        assert!(branches > 0, "fan-out needs at least one branch");
        assert!(buffer_bytes > 0, "branch buffer must not be empty");

        let (writers, readers): (Vec<_>, Vec<_>) = (0..branches)
            .map(|_| {
                let (writer, reader) = tokio::io::duplex(buffer_bytes);
                (Some(writer), reader)
            })
            .unzip();

        (Self { writers }, readers)
    }

    /// Copies `reader` to every branch until end of stream, then closes them.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the producer fails or the primary branch
    /// stops accepting bytes.
    pub async fn pump<R>(mut self, mut reader: R) -> io::Result<FanoutStats>
    where
        R: AsyncRead + Unpin,
    {
        let mut stats = FanoutStats::default();
        let mut buf = vec![0u8; STREAM_CHUNK_BYTES];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            stats.bytes += n as u64;

            for (branch, slot) in self.writers.iter_mut().enumerate() {
                let Some(writer) = slot else {
                    continue;
                };
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    if branch == 0 {
                        return Err(e);
                    }
                    warn!(branch, error = %e, "Fan-out branch failed, detaching");
                    *slot = None;
                    stats.detached.push(branch);
                }
            }
        }

        for writer in self.writers.iter_mut().flatten() {
            // Readers that already hung up cannot be closed any further.
            let _ = writer.shutdown().await;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    async fn drain(mut reader: DuplexStream) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_every_branch_sees_every_byte() {
        let data = payload(1_000_000);
        let (fanout, mut readers) = Fanout::new(3, 4096);
        let c = tokio::spawn(drain(readers.pop().unwrap()));
        let b = tokio::spawn(drain(readers.pop().unwrap()));
        let a = tokio::spawn(drain(readers.pop().unwrap()));

        let stats = fanout.pump(data.as_slice()).await.unwrap();
        assert_eq!(stats.bytes, data.len() as u64);
        assert!(stats.detached.is_empty());

        for handle in [a, b, c] {
            assert_eq!(handle.await.unwrap(), data);
        }
    }

    #[tokio::test]
    async fn test_dropped_secondary_is_detached() {
        let data = payload(500_000);
        let (fanout, mut readers) = Fanout::new(2, 1024);
        drop(readers.pop());
        let primary = tokio::spawn(drain(readers.pop().unwrap()));

        let stats = fanout.pump(data.as_slice()).await.unwrap();
        assert_eq!(stats.detached, vec![1]);
        assert_eq!(primary.await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_dropped_primary_fails_pump() {
        let data = payload(500_000);
        let (fanout, mut readers) = Fanout::new(2, 1024);
        let secondary = tokio::spawn(drain(readers.pop().unwrap()));
        drop(readers.pop());

        let result = fanout.pump(data.as_slice()).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        drop(secondary);
    }

    #[tokio::test]
    async fn test_empty_stream_closes_branches() {
        let (fanout, mut readers) = Fanout::new(2, 64);
        let b = tokio::spawn(drain(readers.pop().unwrap()));
        let a = tokio::spawn(drain(readers.pop().unwrap()));

        let stats = fanout.pump(&b""[..]).await.unwrap();
        assert_eq!(stats.bytes, 0);
        assert!(a.await.unwrap().is_empty());
        assert!(b.await.unwrap().is_empty());
    }
}
