use crate::conversation::{Call, Completion, Conversation, Effect, Event, Request};
use crate::transcript::ChatWindow;
use crate::transport::QuizBackend;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Runs a [`Conversation`] against a backend and keeps the chat window in
/// sync with it.
///
/// Requests are spawned onto the current tokio runtime and never block input;
/// their results are fed back through [`ChatSession::next_completion`]. All
/// methods that can send a request must be called from inside a runtime.
pub struct ChatSession<B> {
    backend: B,
    conversation: Conversation,
    window: ChatWindow,
    in_flight: JoinSet<Completion>,
}

impl<B> ChatSession<B>
where
    B: QuizBackend + Clone + Send + Sync + 'static,
{
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            conversation: Conversation::new(),
            window: ChatWindow::new(),
            in_flight: JoinSet::new(),
        }
    }

    pub fn window(&self) -> &ChatWindow {
        &self.window
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Replaces the text field contents.
    pub fn type_text(&mut self, text: &str) {
        self.window.input = text.to_string();
    }

    pub fn press_enter(&mut self) {
        let input = self.window.input.clone();
        self.dispatch(Event::Enter(input));
    }

    pub fn submit(&mut self, line: &str) {
        self.type_text(line);
        self.press_enter();
    }

    /// Waits for one in-flight request and applies its outcome. Returns
    /// `false` when nothing was in flight.
    pub async fn next_completion(&mut self) -> bool {
        match self.in_flight.join_next().await {
            None => false,
            Some(Ok(completion)) => {
                self.dispatch(Event::Completed(completion));
                true
            }
            Some(Err(err)) => {
                warn!(error = %err, "Request task did not finish");
                true
            }
        }
    }

    /// Drains every in-flight request, including the follow-ups they trigger.
    pub async fn settle(&mut self) {
        while self.next_completion().await {}
    }

    fn dispatch(&mut self, event: Event) {
        let (next, effects) = std::mem::take(&mut self.conversation).handle(event);
        self.conversation = next;
        for effect in effects {
            self.apply(effect);
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Human(html) => self.window.transcript.push_human(&html),
            Effect::Bot(html) => self.window.transcript.push_bot(&html),
            Effect::ClearInput => self.window.input.clear(),
            Effect::Status(line) => self.window.status = Some(line),
            Effect::Send(request) => {
                info!(ticket = %request.ticket, "Sending request");
                let backend = self.backend.clone();
                self.in_flight.spawn(perform(backend, request));
            }
        }
    }
}

async fn perform<B: QuizBackend>(backend: B, request: Request) -> Completion {
    let Request { ticket, call } = request;
    match call {
        Call::Sentence(body) => Completion::Sentence {
            ticket,
            result: backend.get_sentence(&body).await,
        },
        Call::Submit(body) => {
            let result = backend.submit_sentence(&body).await;
            Completion::Verdict {
                ticket,
                submission: body.submission,
                result,
            }
        }
    }
}
