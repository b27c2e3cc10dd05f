//! Chat client for a sentence-translation language quiz.
//!
//! The learner names a language and a topic, the quiz server hands out
//! English sentences to translate, and each attempt comes back graded with
//! per-word match spans that [`format_matches`] turns into highlighted markup.

pub mod config;
pub mod conversation;
pub mod format;
pub mod session;
pub mod transcript;
pub mod transport;

pub use config::{ClientConfig, CsrfSource};
pub use conversation::{Conversation, Effect, Event, SessionContext, Stage, Ticket};
pub use format::{MatchSpan, format_matches};
pub use session::ChatSession;
pub use transcript::{ChatWindow, Message, Speaker, Transcript};
pub use transport::{HttpQuizClient, QuizBackend, Reply, TransportError, Verdict};
