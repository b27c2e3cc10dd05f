use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Human,
    Bot,
}

impl Speaker {
    /// CSS class the chat page uses for this speaker's bubbles.
    pub fn css_class(&self) -> &'static str {
        match self {
            Speaker::Human => "human",
            Speaker::Bot => "bot",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::Human => write!(f, "you"),
            Speaker::Bot => write!(f, "bot"),
        }
    }
}

/// A rendered chat bubble. Never modified once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    speaker: Speaker,
    html: String,
}

impl Message {
    fn new(speaker: Speaker, text: &str) -> Self {
        Self {
            speaker,
            html: text.replace('\n', "<br>"),
        }
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    /// The bubble as the chat page renders it.
    pub fn to_div(&self) -> String {
        format!(
            "<div class=\"{}\">{}</div>",
            self.speaker.css_class(),
            self.html
        )
    }
}

/// Append-only log of chat messages.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_human(&mut self, text: &str) {
        self.messages.push(Message::new(Speaker::Human, text));
    }

    pub fn push_bot(&mut self, text: &str) {
        self.messages.push(Message::new(Speaker::Bot, text));
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages appended after the first `seen`.
    pub fn since(&self, seen: usize) -> &[Message] {
        &self.messages[seen.min(self.messages.len())..]
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Everything the chat page shows: the transcript, the diagnostic status
/// line, and the text field the user types into.
#[derive(Debug, Clone, Default)]
pub struct ChatWindow {
    pub transcript: Transcript,
    pub status: Option<String>,
    pub input: String,
}

impl ChatWindow {
    pub fn new() -> Self {
        Self::default()
    }
}
