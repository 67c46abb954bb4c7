//! Session state machine for one accepted connection.
//!
//! A session moves through explicit phases:
//!
//! ```text
//! Handshaking ──ok──▶ Writing ◀──────── replies queued ──────┐
//!      │               │  ▲                                   │
//!      │               │  └─ more queued                      │
//!      │               └── queue drained ──▶ Reading ──▶ Evaluating
//!      ▼
//!   Closed ◀── handshake failure, peer close, transport error,
//!              or queue drained with the quiz complete
//! ```
//!
//! Exactly one channel operation is outstanding at any time. Replies are
//! queued in order and written one by one; the next read is issued only
//! once the queue is empty, so an answer is never evaluated against a
//! question the peer has not yet been sent.

use crate::channel::{Channel, ChannelError, FrameMode};
use crate::quiz::{QuizProgress, QuizScript};
use bytes::BytesMut;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Initial read buffer capacity.
const READ_BUFFER_SIZE: usize = 4 * 1024;

/// Current phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the protocol handshake.
    Handshaking,
    /// One read outstanding.
    Reading,
    /// Inbound message being checked against the quiz.
    Evaluating,
    /// Draining the outbound queue, one write at a time.
    Writing,
    /// Terminal.
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    HandshakeFailed,
    /// Every question answered and all replies delivered.
    Completed,
    PeerClosed,
    /// Read or write failed for a reason other than peer close.
    Failed,
}

/// One connection's quiz session.
pub struct Session<C> {
    channel: C,
    quiz: QuizProgress,
    outbound: VecDeque<String>,
    read_buf: BytesMut,
    /// Frame mode of the last inbound message, mirrored on writes.
    mode: FrameMode,
    phase: Phase,
    alive: bool,
    end: Option<SessionEnd>,
}

impl<C: Channel> Session<C> {
    pub fn new(channel: C, script: Arc<QuizScript>) -> Self {
        Self {
            channel,
            quiz: QuizProgress::new(script),
            outbound: VecDeque::new(),
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            mode: FrameMode::Text,
            phase: Phase::Handshaking,
            alive: false,
            end: None,
        }
    }

    /// Drive the session to completion and release the connection.
    pub async fn run(mut self) -> SessionEnd {
        loop {
            match self.phase {
                Phase::Handshaking => self.handshake().await,
                Phase::Writing => self.write_head().await,
                Phase::Reading => self.read_next().await,
                Phase::Evaluating => self.evaluate(),
                Phase::Closed => break,
            }
        }

        let end = self.end.unwrap_or(SessionEnd::Failed);
        self.channel.close().await;

        info!(
            cause = ?end,
            answered = self.quiz.answered(),
            correct = self.quiz.correct(),
            question = self.quiz.index(),
            unsent = self.outbound.len(),
            "Session ended"
        );
        end
    }

    /// Append a message to the outbound queue.
    ///
    /// Starts the writer if the queue was empty. Ignored once the
    /// connection is gone.
    pub fn enqueue(&mut self, message: impl Into<String>) {
        if !self.alive {
            debug!("Connection not live, message dropped");
            return;
        }

        let was_empty = self.outbound.is_empty();
        self.outbound.push_back(message.into());
        trace!(depth = self.outbound.len(), "Message queued");

        if was_empty {
            self.phase = Phase::Writing;
        }
    }

    async fn handshake(&mut self) {
        match self.channel.handshake().await {
            Ok(()) => {
                info!("Handshake complete");
                self.alive = true;
                let first = self.quiz.current_message().to_string();
                self.enqueue(first);
            }
            Err(e) => {
                warn!(error = %e, "Handshake failed");
                self.finish(SessionEnd::HandshakeFailed);
            }
        }
    }

    async fn write_head(&mut self) {
        let Some(message) = self.outbound.front() else {
            self.drained();
            return;
        };

        match self.channel.write_message(message, self.mode).await {
            Ok(()) => {
                if let Some(sent) = self.outbound.pop_front() {
                    debug!(message = %sent, remaining = self.outbound.len(), "Message sent");
                }
                if self.outbound.is_empty() {
                    self.drained();
                }
            }
            Err(e) => self.fail("write", e),
        }
    }

    async fn read_next(&mut self) {
        match self.channel.read_message(&mut self.read_buf).await {
            Ok(mode) => {
                self.mode = mode;
                self.phase = Phase::Evaluating;
            }
            Err(e) => self.fail("read", e),
        }
    }

    fn evaluate(&mut self) {
        let answer = String::from_utf8_lossy(&self.read_buf).into_owned();
        self.read_buf.clear();
        debug!(%answer, mode = ?self.mode, "Message received");

        match self.quiz.evaluate(&answer) {
            Some(evaluation) => {
                debug!(
                    verdict = ?evaluation.verdict,
                    state = ?self.quiz.state(),
                    "Answer evaluated"
                );
                for message in evaluation.messages() {
                    self.enqueue(message);
                }
            }
            None => debug!("Quiz already complete, message ignored"),
        }

        // Nothing was queued, so no writer was started.
        if self.phase == Phase::Evaluating {
            self.drained();
        }
    }

    /// Queue is empty: read the next answer, or stop if the quiz is over.
    fn drained(&mut self) {
        if self.quiz.is_complete() {
            self.finish(SessionEnd::Completed);
        } else {
            self.phase = Phase::Reading;
        }
    }

    fn fail(&mut self, op: &'static str, err: ChannelError) {
        if err.is_closed() {
            info!(op, "Connection closed by peer");
            self.finish(SessionEnd::PeerClosed);
        } else {
            error!(op, error = %err, "Connection failed");
            self.finish(SessionEnd::Failed);
        }
    }

    fn finish(&mut self, end: SessionEnd) {
        if self.alive {
            self.alive = false;
            trace!("Connection marked dead");
        }
        self.end.get_or_insert(end);
        self.phase = Phase::Closed;
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.outbound.len()
    }
}
