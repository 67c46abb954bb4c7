//! WebSocket implementation of `Channel`.
//!
//! The raw stream is held until the handshake completes, then replaced by
//! the upgraded `WebSocketStream`. Ping and pong frames are handled by
//! tungstenite and never surface as messages.

use crate::channel::{is_disconnect, Channel, ChannelError, FrameMode};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use std::mem;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

/// Default cap on a single inbound message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Per-connection WebSocket settings.
#[derive(Debug, Clone, Copy)]
pub struct WsOptions {
    pub max_message_size: usize,
    pub handshake_timeout: Option<Duration>,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            handshake_timeout: None,
        }
    }
}

enum WsState<S> {
    /// Accepted but not yet upgraded.
    Pending(S),
    Open(WebSocketStream<S>),
    Released,
}

/// A WebSocket connection on top of any byte stream.
pub struct WsChannel<S> {
    state: WsState<S>,
    options: WsOptions,
}

impl<S> WsChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, options: WsOptions) -> Self {
        Self {
            state: WsState::Pending(stream),
            options,
        }
    }

    fn config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.options.max_message_size);
        config.max_frame_size = Some(self.options.max_message_size);
        config
    }

    fn open(&mut self) -> Result<&mut WebSocketStream<S>, ChannelError> {
        match &mut self.state {
            WsState::Open(ws) => Ok(ws),
            _ => Err(ChannelError::Closed),
        }
    }
}

impl<S> Channel for WsChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn handshake(&mut self) -> Result<(), ChannelError> {
        let config = self.config();
        let stream = match mem::replace(&mut self.state, WsState::Released) {
            WsState::Pending(stream) => stream,
            other => {
                self.state = other;
                return Err(ChannelError::Handshake("handshake already attempted".into()));
            }
        };

        let accept = tokio_tungstenite::accept_async_with_config(stream, Some(config));
        let result = match self.options.handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, accept)
                .await
                .map_err(|_| ChannelError::TimedOut)?,
            None => accept.await,
        };

        let ws = result.map_err(|e| ChannelError::Handshake(e.to_string()))?;
        self.state = WsState::Open(ws);
        Ok(())
    }

    async fn read_message(&mut self, buf: &mut BytesMut) -> Result<FrameMode, ChannelError> {
        let ws = self.open()?;

        loop {
            match ws.next().await {
                None => return Err(ChannelError::Closed),
                Some(Ok(Message::Text(text))) => {
                    buf.extend_from_slice(text.as_bytes());
                    return Ok(FrameMode::Text);
                }
                Some(Ok(Message::Binary(data))) => {
                    buf.extend_from_slice(&data);
                    return Ok(FrameMode::Binary);
                }
                Some(Ok(Message::Close(frame))) => {
                    trace!(?frame, "Close frame received");
                    return Err(ChannelError::Closed);
                }
                Some(Ok(other)) => {
                    trace!(kind = ?other, "Control frame skipped");
                }
                Some(Err(e)) => return Err(transport_error(e)),
            }
        }
    }

    async fn write_message(&mut self, text: &str, mode: FrameMode) -> Result<(), ChannelError> {
        let message = match mode {
            FrameMode::Text => Message::Text(text.to_owned()),
            FrameMode::Binary => Message::Binary(text.as_bytes().to_vec()),
        };

        self.open()?.send(message).await.map_err(transport_error)
    }

    async fn close(&mut self) {
        if let WsState::Open(mut ws) = mem::replace(&mut self.state, WsState::Released) {
            if let Err(e) = ws.close(None).await {
                debug!(error = %e, "Close handshake not completed");
            }
        }
    }
}

/// Map a tungstenite failure onto the channel error taxonomy.
fn transport_error(err: WsError) -> ChannelError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => ChannelError::Closed,
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
        | WsError::Protocol(ProtocolError::SendAfterClosing) => ChannelError::Closed,
        WsError::Io(e) if is_disconnect(e.kind()) => ChannelError::Closed,
        WsError::Io(e) => ChannelError::Io(e),
        other => ChannelError::Protocol(other.to_string()),
    }
}
