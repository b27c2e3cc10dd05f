//! The quiz dialogue as an explicit state machine.
//!
//! [`Conversation::handle`] consumes the current conversation and one
//! [`Event`] and hands back the next conversation plus the [`Effect`]s the
//! caller must carry out. Nothing here touches the network or a screen.

use crate::format::format_matches;
use crate::transport::{
    Reply, SentenceReply, SentenceRequest, SubmissionRequest, TransportError, Verdict,
};
use std::fmt;
use tracing::{debug, warn};

pub const CORRECT_MESSAGE: &str = "<span class=\"c\">Correct!</span>";

/// Where the dialogue stands. Each stage carries exactly the context it has
/// collected so far.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    AwaitingLanguage,
    AwaitingTopic {
        language: String,
    },
    AwaitingAnswer {
        language: String,
        topic: String,
        /// The sentence to translate, once the server has sent one.
        prompt: Option<String>,
    },
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::AwaitingLanguage => "awaiting-language",
            Stage::AwaitingTopic { .. } => "awaiting-topic",
            Stage::AwaitingAnswer { .. } => "awaiting-answer",
        }
    }
}

/// Read-only view of what the learner has chosen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionContext<'a> {
    pub language: Option<&'a str>,
    pub topic: Option<&'a str>,
    pub current_prompt: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Sentence,
    Submission,
}

/// Correlation id for one request. Only the newest ticket per slot is
/// honoured when its response comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub slot: Slot,
    pub id: u64,
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = match self.slot {
            Slot::Sentence => "sentence",
            Slot::Submission => "submission",
        };
        write!(f, "{slot}#{}", self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TicketBook {
    next_id: u64,
    sentence: Option<u64>,
    submission: Option<u64>,
}

impl TicketBook {
    fn issue(&mut self, slot: Slot) -> Ticket {
        self.next_id += 1;
        let id = self.next_id;
        *self.latest_mut(slot) = Some(id);
        Ticket { slot, id }
    }

    fn is_current(&self, ticket: Ticket) -> bool {
        let latest = match ticket.slot {
            Slot::Sentence => self.sentence,
            Slot::Submission => self.submission,
        };
        latest == Some(ticket.id)
    }

    fn latest_mut(&mut self, slot: Slot) -> &mut Option<u64> {
        match slot {
            Slot::Sentence => &mut self.sentence,
            Slot::Submission => &mut self.submission,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Sentence(SentenceRequest),
    Submit(SubmissionRequest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub ticket: Ticket,
    pub call: Call,
}

/// A finished request, paired with the ticket it was sent under.
#[derive(Debug)]
pub enum Completion {
    Sentence {
        ticket: Ticket,
        result: Result<Reply<SentenceReply>, TransportError>,
    },
    Verdict {
        ticket: Ticket,
        submission: String,
        result: Result<Reply<Verdict>, TransportError>,
    },
}

impl Completion {
    pub fn ticket(&self) -> Ticket {
        match self {
            Completion::Sentence { ticket, .. } | Completion::Verdict { ticket, .. } => *ticket,
        }
    }
}

#[derive(Debug)]
pub enum Event {
    /// Enter pressed with the text field holding this value.
    Enter(String),
    Completed(Completion),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Human(String),
    Bot(String),
    ClearInput,
    Status(String),
    Send(Request),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    stage: Stage,
    tickets: TicketBook,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn context(&self) -> SessionContext<'_> {
        match &self.stage {
            Stage::AwaitingLanguage => SessionContext::default(),
            Stage::AwaitingTopic { language } => SessionContext {
                language: Some(language),
                ..SessionContext::default()
            },
            Stage::AwaitingAnswer {
                language,
                topic,
                prompt,
            } => SessionContext {
                language: Some(language),
                topic: Some(topic),
                current_prompt: prompt.as_deref(),
            },
        }
    }

    /// Whether a response sent under `ticket` would still be honoured.
    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.tickets.is_current(ticket)
    }

    pub fn handle(mut self, event: Event) -> (Self, Vec<Effect>) {
        let mut effects = Vec::new();
        match event {
            Event::Enter(input) => {
                let from = self.stage.name();
                self.on_enter(input, &mut effects);
                debug!(from, to = self.stage.name(), "Handled input");
            }
            Event::Completed(completion) => {
                let ticket = completion.ticket();
                if self.tickets.is_current(ticket) {
                    self.on_completion(completion, &mut effects);
                } else {
                    debug!(%ticket, "Discarding superseded response");
                }
            }
        }
        (self, effects)
    }

    fn on_enter(&mut self, input: String, effects: &mut Vec<Effect>) {
        if input.is_empty() {
            return;
        }
        let stage = std::mem::take(&mut self.stage);
        self.stage = match stage {
            Stage::AwaitingLanguage => {
                let language = input.to_lowercase();
                effects.push(Effect::Human(input));
                effects.push(Effect::ClearInput);
                effects.push(Effect::Bot(format!(
                    "Great, let's learn {language}! Now please choose a topic to learn about."
                )));
                Stage::AwaitingTopic { language }
            }
            Stage::AwaitingTopic { language } => {
                let topic = input.clone();
                effects.push(Effect::Human(input));
                effects.push(Effect::ClearInput);
                effects.push(Effect::Bot(format!("Ok, let's learn about {topic}...")));
                effects.push(sentence_request(&mut self.tickets, &language, &topic));
                Stage::AwaitingAnswer {
                    language,
                    topic,
                    prompt: None,
                }
            }
            Stage::AwaitingAnswer {
                language,
                topic,
                prompt,
            } => {
                let ticket = self.tickets.issue(Slot::Submission);
                effects.push(Effect::Send(Request {
                    ticket,
                    call: Call::Submit(SubmissionRequest {
                        language: language.clone(),
                        english: prompt.clone(),
                        submission: input,
                    }),
                }));
                Stage::AwaitingAnswer {
                    language,
                    topic,
                    prompt,
                }
            }
        };
    }

    fn on_completion(&mut self, completion: Completion, effects: &mut Vec<Effect>) {
        let Stage::AwaitingAnswer {
            language,
            topic,
            prompt,
        } = &mut self.stage
        else {
            return;
        };
        match completion {
            Completion::Sentence { result, .. } => match result {
                Ok(reply) => {
                    effects.push(Effect::Status(status_line(&reply)));
                    debug!(english = %reply.body.english, "Received sentence");
                    effects.push(Effect::Bot(format!(
                        "Translate the following:\n{}",
                        reply.body.english
                    )));
                    effects.push(Effect::ClearInput);
                    *prompt = Some(reply.body.english);
                }
                Err(err) => effects.push(failure(&err)),
            },
            Completion::Verdict {
                submission, result, ..
            } => match result {
                Ok(reply) => {
                    effects.push(Effect::Status(status_line(&reply)));
                    let verdict = reply.body;
                    debug!(correct = verdict.correct, "Received verdict");
                    if verdict.correct {
                        effects.push(Effect::Human(submission));
                        effects.push(Effect::Bot(CORRECT_MESSAGE.to_string()));
                    } else {
                        let matches = verdict.entered_word_matches.unwrap_or_default();
                        effects.push(Effect::Human(format_matches(&matches, &submission)));
                        effects.push(Effect::Bot(format!(
                            "Incorrect. The correct translation is: <br>{}",
                            verdict.translation.unwrap_or_default()
                        )));
                    }
                    effects.push(sentence_request(&mut self.tickets, language, topic));
                }
                Err(err) => effects.push(failure(&err)),
            },
        }
    }
}

fn sentence_request(tickets: &mut TicketBook, language: &str, topic: &str) -> Effect {
    Effect::Send(Request {
        ticket: tickets.issue(Slot::Sentence),
        call: Call::Sentence(SentenceRequest {
            language: language.to_string(),
            topic: topic.to_string(),
        }),
    })
}

fn status_line<T>(reply: &Reply<T>) -> String {
    if reply.is_success() {
        format!("POST request was successful. Response status: {}", reply.status)
    } else {
        format!("POST request failed. Response status: {}", reply.status)
    }
}

fn failure(err: &TransportError) -> Effect {
    warn!(error = %err, "POST request failed");
    Effect::Status(format!("Error during POST request: {err}"))
}
