//! WebSocket acceptor for quiz sessions.
//!
//! Binds the listening socket, accepts connections, and runs one
//! independent session task per connection. Sessions share only the
//! read-only quiz script.

use crate::config::Config;
use crate::session::Session;
use crate::websocket::WsChannel;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{AcquireError, Semaphore};
use tracing::{debug, error, info, info_span, Instrument};

/// Pause after a failed accept so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Listener setup and accept-loop failures
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Connection limiter closed")]
    LimiterClosed(#[from] AcquireError),
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    config: Config,
    connection_limit: Arc<Semaphore>,
    next_session_id: u64,
}

impl Server {
    /// Bind the listening socket. Must be called inside a tokio runtime.
    pub fn bind(config: Config) -> Result<Self, ServerError> {
        let addr = config.listen;
        let listener = create_listener(addr, config.backlog)
            .and_then(TcpListener::from_std)
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Server {
            listener,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            config,
            next_session_id: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, one session task per connection.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let options = self.config.ws_options();
        info!(
            address = %self.local_addr().unwrap_or(self.config.listen),
            questions = self.config.script.len(),
            "Server listening"
        );

        loop {
            // Wait for a connection slot
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    self.next_session_id += 1;
                    let span = info_span!("session", id = self.next_session_id, %peer);

                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(parent: &span, error = %e, "Failed to set TCP_NODELAY");
                    }
                    debug!(parent: &span, "New connection");

                    let channel = WsChannel::new(stream, options);
                    let session = Session::new(channel, Arc::clone(&self.config.script));

                    tokio::spawn(
                        async move {
                            session.run().await;
                            drop(permit);
                        }
                        .instrument(span),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    drop(permit);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::{QuizItem, QuizScript};
    use futures_util::{SinkExt, Stream, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::time::timeout;
    use tokio_test::assert_ok;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};

    const WAIT: Duration = Duration::from_secs(5);

    fn test_config(script: QuizScript) -> Config {
        Config {
            listen: "127.0.0.1:0".parse().unwrap(),
            workers: None,
            max_connections: 16,
            backlog: 128,
            handshake_timeout: Some(WAIT),
            max_message_size: 64 * 1024,
            log_level: "info".to_string(),
            script: Arc::new(script),
        }
    }

    async fn start(script: QuizScript) -> SocketAddr {
        let server = Server::bind(test_config(script)).unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        addr
    }

    async fn next_text<S>(ws: &mut S) -> String
    where
        S: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        match timeout(WAIT, ws.next()).await.unwrap() {
            Some(Ok(Message::Text(text))) => text,
            other => panic!("expected text message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_quiz_over_websocket() {
        let addr = start(QuizScript::builtin()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();

        assert_eq!(next_text(&mut ws).await, "What is 2 plus 2?");

        let exchanges = [
            ("four", ["Correct!", "What is the capital of France?"]),
            ("wrong", ["Incorrect, try again.", "What is the capital of France?"]),
            ("Paris", ["Correct!", "What is the color of the sky?"]),
            ("blue", ["Correct!", "Quiz complete!"]),
        ];

        for (answer, expected) in exchanges {
            ws.send(Message::Text(answer.to_string())).await.unwrap();
            for message in expected {
                assert_eq!(next_text(&mut ws).await, message);
            }
        }

        // The server closes once the quiz is over.
        match timeout(WAIT, ws.next()).await.unwrap() {
            Some(Ok(Message::Close(_))) | None => {}
            other => panic!("expected close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let script = QuizScript::new(
            vec![QuizItem::new("first", "1"), QuizItem::new("second", "2")],
            true,
        );
        let addr = start(script).await;
        let url = format!("ws://{addr}");

        let (mut a, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let (mut b, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        assert_eq!(next_text(&mut a).await, "first");
        assert_eq!(next_text(&mut b).await, "first");

        a.send(Message::Text("1".into())).await.unwrap();
        assert_eq!(next_text(&mut a).await, "Correct!");
        assert_eq!(next_text(&mut a).await, "second");

        b.send(Message::Text("2".into())).await.unwrap();
        assert_eq!(next_text(&mut b).await, "Incorrect, try again.");
        assert_eq!(next_text(&mut b).await, "first");
    }

    #[tokio::test]
    async fn test_failed_handshake_does_not_stop_acceptor() {
        let addr = start(QuizScript::builtin()).await;

        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(b"this is not http\r\n\r\n").await.unwrap();
        drop(raw);

        let (mut ws, _) = timeout(WAIT, tokio_tungstenite::connect_async(format!("ws://{addr}")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next_text(&mut ws).await, "What is 2 plus 2?");
    }

    #[tokio::test]
    async fn test_client_disconnect_mid_quiz() {
        let addr = start(QuizScript::builtin()).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        assert_eq!(next_text(&mut ws).await, "What is 2 plus 2?");
        drop(ws);

        // A fresh client starts from the first question.
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        assert_eq!(next_text(&mut ws).await, "What is 2 plus 2?");
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal() {
        let first = Server::bind(test_config(QuizScript::builtin())).unwrap();
        let addr = assert_ok!(first.local_addr());

        let mut config = test_config(QuizScript::builtin());
        config.listen = addr;
        match Server::bind(config) {
            Err(ServerError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("second bind to {addr} succeeded"),
        }
    }
}
