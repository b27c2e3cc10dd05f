use std::time::Duration;

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";
pub const SENTENCE_PATH: &str = "/getsentence";
pub const SUBMIT_PATH: &str = "/submitsentence";
pub const CSRF_HEADER: &str = "X-CSRFToken";
pub const CSRF_META_NAME: &str = "csrf-token";

/// Where the anti-forgery token comes from. Every variant is resolved again
/// for each request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsrfSource {
    /// A literal token.
    Fixed(String),
    /// The named environment variable.
    Env(String),
    /// The `csrf-token` meta tag of the page at this path on the quiz server.
    PageMeta(String),
}

impl Default for CsrfSource {
    fn default() -> Self {
        CsrfSource::PageMeta("/".to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: String,
    pub sentence_path: String,
    pub submit_path: String,
    pub csrf: CsrfSource,
    pub user_agent: String,
    /// Requests never time out; this only bounds the TCP connect.
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            sentence_path: SENTENCE_PATH.to_string(),
            submit_path: SUBMIT_PATH.to_string(),
            csrf: CsrfSource::default(),
            user_agent: format!("linguabot/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }

    pub fn with_csrf(mut self, csrf: CsrfSource) -> Self {
        self.csrf = csrf;
        self
    }
}
