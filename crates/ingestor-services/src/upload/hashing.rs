use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::oneshot;

/// What the hashing reader saw by the time it was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashReport {
    /// Read to end of input with the expected length
    Complete { checksum: String, byte_count: u64 },
    /// The source itself failed or had the wrong length
    SourceFailed { message: String },
}

/// Pass-through reader computing SHA-256 and the byte count.
///
/// Enforces the expected length: a source that ends early or runs long
/// fails the read, so the store never commits a short or padded object.
/// The outcome is reported once through the channel handed out by
/// [`HashingReader::new`]; if the consumer stops reading first, nothing is
/// sent.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    byte_count: u64,
    expected: Option<u64>,
    report: Option<oneshot::Sender<HashReport>>,
}

impl<R: AsyncRead + Unpin> HashingReader<R> {
    pub fn new(inner: R, expected: Option<u64>) -> (Self, oneshot::Receiver<HashReport>) {
        let (tx, rx) = oneshot::channel();
        let reader = Self {
            inner,
            hasher: Sha256::new(),
            byte_count: 0,
            expected,
            report: Some(tx),
        };
        (reader, rx)
    }

    fn send(&mut self, report: HashReport) {
        if let Some(tx) = self.report.take() {
            let _ = tx.send(report);
        }
    }

    fn fail(&mut self, err: io::Error) -> io::Error {
        self.send(HashReport::SourceFailed {
            message: err.to_string(),
        });
        err
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(this.fail(e))),
            Poll::Ready(Ok(())) => {
                let fresh = &buf.filled()[before..];
                if fresh.is_empty() {
                    if let Some(expected) = this.expected {
                        if this.byte_count != expected {
                            let err = io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                format!(
                                    "content ended after {} of {} declared bytes",
                                    this.byte_count, expected
                                ),
                            );
                            return Poll::Ready(Err(this.fail(err)));
                        }
                    }
                    let checksum = hex::encode(std::mem::take(&mut this.hasher).finalize());
                    let byte_count = this.byte_count;
                    this.send(HashReport::Complete {
                        checksum,
                        byte_count,
                    });
                    return Poll::Ready(Ok(()));
                }

                this.byte_count += fresh.len() as u64;
                if let Some(expected) = this.expected {
                    if this.byte_count > expected {
                        let err = io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("content exceeds its declared size of {} bytes", expected),
                        );
                        return Poll::Ready(Err(this.fail(err)));
                    }
                }
                this.hasher.update(fresh);
                Poll::Ready(Ok(()))
            }
        }
    }
}
