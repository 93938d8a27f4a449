//! stdio transport.
//!
//! This module implements the stdio transport as specified by MCP:
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//! - stdin: receives messages from the peer
//! - stdout: sends messages to the peer
//! - stderr: may be used for logging (not MCP messages)
//!
//! The transport is generic over its reader and writer so the same framing
//! can run over pipes, sockets or in-memory duplex streams.
//!
//! A line longer than the message size limit is skipped without being
//! buffered, and a line that is not valid UTF-8 is reported to the callback
//! as malformed.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use super::{
    decode_message, encode_message, CallbackSlot, Inbound, MessageCallback, Transport,
    DEFAULT_MAX_MESSAGE_BYTES,
};
use crate::error::TransportError;
use crate::mcp::protocol::JsonRpcMessage;

type BoxedReader = Box<dyn AsyncBufRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One inbound line, as seen by the framing layer.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    /// A complete line without its terminator.
    Line(String),
    /// A line that is not valid UTF-8.
    NotUtf8(String),
    /// A line over the size limit; only its length was counted.
    Oversized(usize),
    /// The input is closed.
    Eof,
}

/// A newline-delimited JSON transport.
///
/// Call [`StdioTransport::listen`] to pump inbound lines into the registered
/// callback until EOF or [`Transport::close`].
pub struct StdioTransport {
    /// Buffered reader for inbound lines.
    reader: Mutex<BoxedReader>,
    /// Writer for outbound lines.
    writer: Mutex<BoxedWriter>,
    callback: CallbackSlot,
    max_message_bytes: usize,
    closed: AtomicBool,
    shutdown: Notify,
}

impl StdioTransport {
    /// Creates a transport over the process's stdin and stdout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_io(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }

    /// Creates a transport over an arbitrary reader and writer.
    #[must_use]
    pub fn with_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Mutex::new(Box::new(reader)),
            writer: Mutex::new(Box::new(writer)),
            callback: CallbackSlot::default(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Sets the maximum size of one message in bytes.
    #[must_use]
    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = limit;
        self
    }

    /// Returns the maximum size of one message in bytes.
    #[must_use]
    pub const fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    /// Returns `true` once the transport has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reads the next line, buffering at most the size limit plus the
    /// terminator.
    ///
    /// A final line without a terminator still counts as a line.
    async fn read_frame(&self) -> io::Result<Frame> {
        // Room for a full message plus "\r\n".
        let keep = self.max_message_bytes.saturating_add(2);
        let mut reader = self.reader.lock().await;
        let mut line = Vec::new();
        let mut total = 0usize;

        loop {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                if total == 0 {
                    return Ok(Frame::Eof);
                }
                break;
            }

            let (chunk, used, done) = match available.iter().position(|&b| b == b'\n') {
                Some(at) => (&available[..at], at + 1, true),
                None => (available, available.len(), false),
            };

            total = total.saturating_add(chunk.len());
            let room = keep.saturating_sub(line.len());
            line.extend_from_slice(&chunk[..chunk.len().min(room)]);
            reader.consume(used);

            if done {
                break;
            }
        }

        if line.last() == Some(&b'\r') {
            line.pop();
            total -= 1;
        }

        if total > self.max_message_bytes {
            return Ok(Frame::Oversized(total));
        }

        Ok(match String::from_utf8(line) {
            Ok(line) => Frame::Line(line),
            Err(e) => Frame::NotUtf8(e.to_string()),
        })
    }

    /// Reads lines until EOF or close, handing each decoded message to the
    /// registered callback.
    ///
    /// Blank lines are skipped and oversized lines are dropped. Lines that
    /// are not UTF-8 reach the callback as [`Inbound::Malformed`].
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub async fn listen(&self) -> Result<(), TransportError> {
        loop {
            if self.is_closed() {
                return Ok(());
            }

            tokio::select! {
                () = self.shutdown.notified() => {
                    debug!("transport closed, stopping listener");
                    return Ok(());
                }

                frame = self.read_frame() => match frame? {
                    Frame::Eof => {
                        info!("input closed (EOF)");
                        return Ok(());
                    }

                    Frame::Oversized(size) => {
                        warn!(size, limit = self.max_message_bytes, "dropping oversized inbound message");
                    }

                    Frame::NotUtf8(error) => {
                        debug!(%error, "inbound line is not valid UTF-8");
                        self.callback.deliver(Inbound::Malformed(error));
                    }

                    Frame::Line(line) => {
                        if line.trim().is_empty() {
                            continue;
                        }

                        if let Some(inbound) = decode_message(&line, self.max_message_bytes) {
                            self.callback.deliver(inbound);
                        }
                    }
                }
            }
        }
    }

    /// Writes a raw JSON string with newline termination.
    async fn write_raw(&self, json: &str) -> io::Result<()> {
        debug_assert!(
            !json.contains('\n'),
            "JSON message must not contain embedded newlines"
        );

        let mut writer = self.writer.lock().await;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        Ok(())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let json = encode_message(message, self.max_message_bytes)?;
        self.write_raw(&json).await?;
        Ok(())
    }

    fn on_message(&self, callback: MessageCallback) {
        self.callback.set(callback);
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.shutdown.notify_one();
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}
