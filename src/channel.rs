//! Duplex message channel used by a session.
//!
//! A `Channel` owns one accepted connection. It completes the
//! protocol handshake, then moves whole messages in each direction.
//! Framing is the implementation's business; the session only sees
//! payload bytes and the frame mode they arrived in.

use bytes::BytesMut;
use std::future::Future;
use std::io;
use thiserror::Error;

/// Frame type of a message on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameMode {
    #[default]
    Text,
    Binary,
}

/// Channel failures.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// The handshake was rejected or malformed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// An operation exceeded its deadline.
    #[error("timed out")]
    TimedOut,

    /// Transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer violated the framing protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ChannelError {
    /// True when the error means the peer went away rather than a fault.
    pub fn is_closed(&self) -> bool {
        match self {
            ChannelError::Closed => true,
            ChannelError::Io(e) => is_disconnect(e.kind()),
            _ => false,
        }
    }
}

/// I/O error kinds that indicate the peer dropped the connection.
pub fn is_disconnect(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

/// A message-oriented duplex connection.
///
/// Callers keep at most one operation outstanding at a time.
pub trait Channel: Send {
    /// Complete the protocol handshake on the raw connection.
    fn handshake(&mut self) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Read the next data message, appending its payload to `buf`.
    fn read_message(
        &mut self,
        buf: &mut BytesMut,
    ) -> impl Future<Output = Result<FrameMode, ChannelError>> + Send;

    /// Write one message in the given frame mode.
    fn write_message(
        &mut self,
        text: &str,
        mode: FrameMode,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Close the connection and release it. Called once, at teardown.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
