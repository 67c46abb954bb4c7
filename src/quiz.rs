//! Quiz script and per-session quiz progression.
//!
//! The script is loaded once at startup and shared read-only by every
//! session. Each session owns a `QuizProgress` that walks the script one
//! question at a time and decides which replies go back to the peer.

use serde::Deserialize;
use std::sync::Arc;

/// Reply for a matching answer.
pub const CORRECT_REPLY: &str = "Correct!";

/// Reply for any non-matching answer.
pub const INCORRECT_REPLY: &str = "Incorrect, try again.";

/// Inbound text signalling that the client had nothing to send.
pub const NO_RESPONSE_SENTINEL: &str = "No response";

/// Reply for the no-response sentinel.
pub const NO_RESPONSE_REPLY: &str = "No response received from client.";

/// Sent in place of a prompt once the last question has been answered.
pub const COMPLETE_MESSAGE: &str = "Quiz complete!";

/// A single prompt and the answer it expects.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuizItem {
    pub prompt: String,
    #[serde(alias = "expected_answer")]
    pub answer: String,
}

impl QuizItem {
    pub fn new(prompt: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            answer: answer.into(),
        }
    }
}

/// Ordered, immutable list of quiz items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizScript {
    items: Vec<QuizItem>,
    case_sensitive: bool,
}

impl QuizScript {
    pub fn new(items: Vec<QuizItem>, case_sensitive: bool) -> Self {
        Self {
            items,
            case_sensitive,
        }
    }

    /// Script used when no quiz data is configured.
    pub fn builtin() -> Self {
        Self::new(
            vec![
                QuizItem::new("What is 2 plus 2?", "four"),
                QuizItem::new("What is the capital of France?", "Paris"),
                QuizItem::new("What is the color of the sky?", "blue"),
            ],
            true,
        )
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&QuizItem> {
        self.items.get(index)
    }

    pub fn items(&self) -> &[QuizItem] {
        &self.items
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Check an answer against an item using the script's case policy.
    pub fn accepts(&self, item: &QuizItem, answer: &str) -> bool {
        if self.case_sensitive {
            answer == item.answer
        } else {
            answer.to_lowercase() == item.answer.to_lowercase()
        }
    }
}

/// Where a session is in the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizState {
    /// Waiting for the answer to the question at this index.
    AwaitingAnswer(usize),
    /// Every question has been answered.
    Complete,
}

/// Outcome of evaluating one inbound answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Correct,
    NoResponse,
    Incorrect,
}

impl Verdict {
    pub fn reply(self) -> &'static str {
        match self {
            Verdict::Correct => CORRECT_REPLY,
            Verdict::NoResponse => NO_RESPONSE_REPLY,
            Verdict::Incorrect => INCORRECT_REPLY,
        }
    }
}

/// Messages produced by one evaluation, in send order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: Verdict,
    /// The next prompt, or the completion message.
    pub follow_up: String,
}

impl Evaluation {
    pub fn messages(&self) -> [&str; 2] {
        [self.verdict.reply(), &self.follow_up]
    }
}

/// Per-session quiz state machine.
///
/// The question index only moves forward, one step per correct answer,
/// and stops at `Complete`.
#[derive(Debug)]
pub struct QuizProgress {
    script: Arc<QuizScript>,
    state: QuizState,
    answered: usize,
    correct: usize,
}

impl QuizProgress {
    pub fn new(script: Arc<QuizScript>) -> Self {
        let state = if script.is_empty() {
            QuizState::Complete
        } else {
            QuizState::AwaitingAnswer(0)
        };

        Self {
            script,
            state,
            answered: 0,
            correct: 0,
        }
    }

    pub fn state(&self) -> QuizState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == QuizState::Complete
    }

    /// Index of the current question; equals the script length once complete.
    pub fn index(&self) -> usize {
        match self.state {
            QuizState::AwaitingAnswer(i) => i,
            QuizState::Complete => self.script.len(),
        }
    }

    /// Number of answers evaluated so far.
    pub fn answered(&self) -> usize {
        self.answered
    }

    /// Number of those answers that were correct.
    pub fn correct(&self) -> usize {
        self.correct
    }

    /// Prompt for the current question, or the completion message.
    pub fn current_message(&self) -> &str {
        match self.state {
            QuizState::AwaitingAnswer(i) => self
                .script
                .get(i)
                .map(|item| item.prompt.as_str())
                .unwrap_or(COMPLETE_MESSAGE),
            QuizState::Complete => COMPLETE_MESSAGE,
        }
    }

    /// Evaluate an answer to the current question.
    ///
    /// Returns `None` when the quiz is already complete; late messages
    /// leave the state untouched.
    pub fn evaluate(&mut self, answer: &str) -> Option<Evaluation> {
        let QuizState::AwaitingAnswer(i) = self.state else {
            return None;
        };
        let item = self.script.get(i)?;

        let verdict = if self.script.accepts(item, answer) {
            Verdict::Correct
        } else if answer == NO_RESPONSE_SENTINEL {
            Verdict::NoResponse
        } else {
            Verdict::Incorrect
        };

        self.answered += 1;
        if verdict == Verdict::Correct {
            self.correct += 1;
            self.state = if i + 1 >= self.script.len() {
                QuizState::Complete
            } else {
                QuizState::AwaitingAnswer(i + 1)
            };
        }

        Some(Evaluation {
            verdict,
            follow_up: self.current_message().to_string(),
        })
    }
}
