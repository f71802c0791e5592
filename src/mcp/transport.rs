//! Frame codec for JSON-RPC over a pair of byte streams.
//!
//! Two wire styles are accepted on read:
//!
//! - **Header framing**: a block of `Name: value` lines terminated by an
//!   empty line, which must include `Content-Length`, followed by exactly
//!   that many bytes of JSON.
//! - **Bare JSON**: a single line whose first non-whitespace character is
//!   `{` or `[`, holding a complete JSON document.
//!
//! Writes always use header framing followed by one trailing newline, so a
//! peer speaking either style can read what we send.
//!
//! Lines end at `\n` or `\r\n`. A `\r` that is not followed by `\n` is part
//! of the line.
//!
//! Any end of stream before a frame is complete is a fatal
//! [`ProtocolError`]. Malformed JSON inside an otherwise complete frame is a
//! non-fatal [`FrameError::Parse`]; the stream stays positioned at the start
//! of the next frame.

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::mcp::error::{FrameError, ProtocolError};
use crate::mcp::protocol::{parse_message, Message};

const CONTENT_LENGTH: &str = "Content-Length";

/// Buffer reserved up front for a body, however large its declared length.
const BODY_CHUNK: usize = 64 * 1024;

/// Reads frames from a byte stream.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps a byte stream.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Reads one line without its terminator.
    ///
    /// Returns `None` at a clean end of stream (no bytes pending).
    async fn read_line(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let mut line = Vec::new();
        let bytes_read = self.reader.read_until(b'\n', &mut line).await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if line.pop() != Some(b'\n') {
            return Err(ProtocolError::UnexpectedEof { context: "line" });
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        Ok(Some(line))
    }

    /// Reads the raw JSON bytes of the next frame.
    ///
    /// Returns `None` if the stream ended between frames.
    ///
    /// # Errors
    ///
    /// Returns a `ProtocolError` if the stream fails, ends inside a frame, or
    /// a header block lacks a usable `Content-Length`.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let first = loop {
            let Some(line) = self.read_line().await? else {
                return Ok(None);
            };

            match line.iter().find(|b| !b.is_ascii_whitespace()) {
                None => {}
                Some(b'{' | b'[') => return Ok(Some(line)),
                Some(_) => break line,
            }
        };

        let mut content_length = None;
        let mut line = first;
        loop {
            if let Some(value) = header_value(&line, CONTENT_LENGTH) {
                let trimmed = value.trim();
                let length = trimmed
                    .parse::<usize>()
                    .map_err(|_| ProtocolError::InvalidContentLength {
                        value: trimmed.to_string(),
                    })?;
                content_length = Some(length);
            }

            line = self
                .read_line()
                .await?
                .ok_or(ProtocolError::UnexpectedEof { context: "headers" })?;

            if line.is_empty() {
                break;
            }
        }

        let length = content_length.ok_or(ProtocolError::MissingContentLength)?;
        // The peer controls `length`; grow the buffer as bytes arrive.
        let mut body = Vec::with_capacity(length.min(BODY_CHUNK));
        (&mut self.reader)
            .take(u64::try_from(length).unwrap_or(u64::MAX))
            .read_to_end(&mut body)
            .await?;
        if body.len() != length {
            return Err(ProtocolError::UnexpectedEof { context: "body" });
        }

        Ok(Some(body))
    }

    /// Reads and classifies the next message.
    ///
    /// Returns `None` if the stream ended between frames.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Protocol` for fatal stream failures and
    /// `FrameError::Parse` for a complete frame that holds no valid message.
    pub async fn read_message(&mut self) -> Result<Option<Message>, FrameError> {
        let Some(frame) = self.read_frame().await? else {
            return Ok(None);
        };

        parse_message(&frame).map(Some).map_err(FrameError::Parse)
    }
}

/// Returns the value of `name` if `line` is that header (case-insensitive).
fn header_value(line: &[u8], name: &str) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let (key, value) = line.split_once(':')?;
    key.trim()
        .eq_ignore_ascii_case(name)
        .then(|| value.to_string())
}

/// Writes header-framed messages to a byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wraps a byte stream.
    #[must_use]
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialises `message` and writes it as one frame, then flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_message<T: Serialize + ?Sized>(
        &mut self,
        message: &T,
    ) -> Result<(), ProtocolError> {
        let body = serde_json::to_vec(message)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut frame = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len()).into_bytes();
        frame.extend_from_slice(&body);
        frame.push(b'\n');

        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// Shuts down the underlying stream, signalling end of input to the peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be shut down.
    pub async fn close(&mut self) -> Result<(), ProtocolError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// A bidirectional frame transport over separate read and write halves.
pub struct Transport<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

/// The transport a server uses on its own standard streams.
pub type StdioTransport = Transport<tokio::io::Stdin, tokio::io::Stdout>;

impl StdioTransport {
    /// Creates a transport over this process's stdin and stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Transport<R, W> {
    /// Creates a transport from a read half and a write half.
    #[must_use]
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    /// Reads and classifies the next message.
    ///
    /// # Errors
    ///
    /// See [`FrameReader::read_message`].
    pub async fn read_message(&mut self) -> Result<Option<Message>, FrameError> {
        self.reader.read_message().await
    }

    /// Writes one message.
    ///
    /// # Errors
    ///
    /// See [`FrameWriter::write_message`].
    pub async fn write_message<T: Serialize + ?Sized>(
        &mut self,
        message: &T,
    ) -> Result<(), ProtocolError> {
        self.writer.write_message(message).await
    }

    /// Closes the write half.
    ///
    /// # Errors
    ///
    /// See [`FrameWriter::close`].
    pub async fn close(&mut self) -> Result<(), ProtocolError> {
        self.writer.close().await
    }
}
