//! LSP message framing
//!
//! Messages are framed with headers:
//! ```text
//! Content-Length: 123\r\n
//! \r\n
//! {"jsonrpc":"2.0",...}
//! ```
//! Works over any async byte stream: child pipes, TCP sockets or in-memory
//! duplex pairs.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::protocol::Message;

/// Upper bound on a single frame body
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

const CONTENT_LENGTH: &str = "content-length";

/// Reads framed messages from a byte stream
pub struct MessageReader<R> {
    reader: BufReader<R>,
    /// Set after a frame was dropped without consuming its body
    resync: bool,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            resync: false,
        }
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` on a clean end of stream between messages.
    /// A malformed frame yields `InvalidData`. When its headers were unusable
    /// the body is skipped up to the next `Content-Length` header, so the
    /// following frame is still delivered.
    pub async fn read_message(&mut self) -> io::Result<Option<Message>> {
        let content_length = match self.read_headers().await {
            Ok(Some(length)) => length,
            Ok(None) => return Ok(None),
            Err(e) => {
                if e.kind() == io::ErrorKind::InvalidData {
                    self.resync = true;
                }
                return Err(e);
            }
        };

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await?;

        let json =
            String::from_utf8(body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        tracing::trace!("LSP <- {}", json);

        Message::parse(&json)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Read headers and return Content-Length
    async fn read_headers(&mut self) -> io::Result<Option<usize>> {
        let mut content_length: Option<usize> = None;
        let mut buf = Vec::new();
        let mut seen_header = false;

        loop {
            buf.clear();
            let bytes_read = self.reader.read_until(b'\n', &mut buf).await?;

            if bytes_read == 0 {
                if seen_header {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "Connection closed inside message headers",
                    ));
                }
                return Ok(None);
            }

            let raw = String::from_utf8_lossy(&buf);
            let mut line = raw.trim();

            // Leftover body of a dropped frame may be glued to the next header
            if self.resync {
                match line.to_ascii_lowercase().find(CONTENT_LENGTH) {
                    Some(start) => {
                        line = &line[start..];
                        self.resync = false;
                    }
                    None => continue,
                }
            }

            // Empty line marks end of headers
            if line.is_empty() {
                if seen_header {
                    break;
                }
                continue;
            }
            seen_header = true;

            if let Some((name, value)) = line.split_once(':')
                && name.trim().eq_ignore_ascii_case(CONTENT_LENGTH)
            {
                let length: usize = value
                    .trim()
                    .parse()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                if length > MAX_CONTENT_LENGTH {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Content-Length {length} exceeds {MAX_CONTENT_LENGTH} bytes"),
                    ));
                }
                content_length = Some(length);
            }
            // Ignore other headers (Content-Type, etc.)
        }

        content_length
            .map(Some)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "Missing Content-Length"))
    }
}

/// Serialize and write one framed message
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize,
{
    let json = serde_json::to_string(message)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    tracing::trace!("LSP -> {}", json);

    let frame = format!("Content-Length: {}\r\n\r\n{}", json.len(), json);
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await
}
