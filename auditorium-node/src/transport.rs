//! Stream transport: canonical expressions back to back on a TCP stream.

use auditorium_core::wire::{self, DecodeError, Expr, MAX_EXPR_LEN};
use auditorium_core::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_CHUNK: usize = 8 * 1024;

/// Error reading a value off a stream.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("stream is not canonical s-expressions: {0}")]
    Decode(DecodeError),
    #[error("stream closed mid-expression")]
    Truncated,
}

/// Buffers a byte stream and yields one expression at a time.
pub struct ExprReader<R> {
    inner: R,
    buf: Vec<u8>,
    limit: usize,
}

impl<R: AsyncRead + Unpin> ExprReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, MAX_EXPR_LEN)
    }

    /// Reader that gives up once `limit` bytes are buffered without a complete value.
    pub fn with_limit(inner: R, limit: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            limit,
        }
    }

    /// Next value, or `None` if the peer closed the stream between values.
    pub async fn read_expr(&mut self) -> Result<Option<Expr>, ReadError> {
        loop {
            if !self.buf.is_empty() {
                match wire::decode(&self.buf) {
                    Ok((expr, n)) => {
                        self.buf.drain(..n);
                        return Ok(Some(expr));
                    }
                    Err(DecodeError::NeedMore) => {}
                    Err(e) => return Err(ReadError::Decode(e)),
                }
            }
            if self.buf.len() > self.limit {
                return Err(ReadError::Decode(DecodeError::TooLarge));
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(ReadError::Truncated)
                };
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Canonical bytes of a message, as written on the wire.
pub fn message_bytes(message: &Message) -> Vec<u8> {
    message.to_expr().to_verbatim()
}

pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> std::io::Result<()> {
    writer.write_all(&message_bytes(message)).await?;
    writer.flush().await
}
