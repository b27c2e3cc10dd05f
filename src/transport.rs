use crate::config::{CSRF_HEADER, CSRF_META_NAME, ClientConfig, CsrfSource};
use crate::format::MatchSpan;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

static META_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<meta\b[^>]*>"#).expect("valid meta tag pattern"));
static META_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|\s)name\s*=\s*["']([^"']*)["']"#).expect("valid meta name pattern")
});
static META_CONTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|\s)content\s*=\s*["']([^"']*)["']"#).expect("valid meta content pattern")
});

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("unreadable response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("no CSRF token available from {0}")]
    MissingCsrfToken(String),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentenceRequest {
    pub language: String,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionRequest {
    pub language: String,
    /// Unset when the learner answers before the first prompt arrives.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub english: Option<String>,
    pub submission: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SentenceReply {
    pub english: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Verdict {
    /// Absent is read as incorrect.
    #[serde(default)]
    pub correct: bool,
    #[serde(default)]
    pub translation: Option<String>,
    #[serde(default)]
    pub entered_word_matches: Option<Vec<MatchSpan>>,
}

/// A parsed response body together with the HTTP status it came with.
/// Non-2xx statuses still carry a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply<T> {
    pub status: u16,
    pub body: T,
}

impl<T> Reply<T> {
    pub fn new(status: u16, body: T) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The two calls the quiz server answers.
pub trait QuizBackend {
    fn get_sentence(
        &self,
        request: &SentenceRequest,
    ) -> impl Future<Output = Result<Reply<SentenceReply>, TransportError>> + Send;

    fn submit_sentence(
        &self,
        request: &SubmissionRequest,
    ) -> impl Future<Output = Result<Reply<Verdict>, TransportError>> + Send;
}

/// JSON-over-HTTP client for the quiz server.
#[derive(Debug, Clone)]
pub struct HttpQuizClient {
    http: reqwest::Client,
    server: Url,
    sentence_url: Url,
    submit_url: Url,
    csrf: CsrfSource,
}

impl HttpQuizClient {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let server = Url::parse(&config.server)?;
        let sentence_url = server.join(&config.sentence_path)?;
        let submit_url = server.join(&config.submit_path)?;
        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(config.user_agent.clone());
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            server,
            sentence_url,
            submit_url,
            csrf: config.csrf.clone(),
        })
    }

    async fn csrf_token(&self) -> Result<String, TransportError> {
        match &self.csrf {
            CsrfSource::Fixed(token) => Ok(token.clone()),
            CsrfSource::Env(var) => std::env::var(var)
                .map_err(|_| TransportError::MissingCsrfToken(format!("${var}"))),
            CsrfSource::PageMeta(path) => {
                let page = self.server.join(path)?;
                let html = self.http.get(page.clone()).send().await?.text().await?;
                extract_csrf_meta(&html)
                    .ok_or_else(|| TransportError::MissingCsrfToken(page.to_string()))
            }
        }
    }

    async fn post<B, T>(&self, url: &Url, body: &B) -> Result<Reply<T>, TransportError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let token = self.csrf_token().await?;
        info!(%url, "POST");
        let response = self
            .http
            .post(url.clone())
            .header(CSRF_HEADER, token)
            .json(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        debug!(status, body = %String::from_utf8_lossy(&bytes), "Server response");
        let body = serde_json::from_slice(&bytes)?;
        Ok(Reply { status, body })
    }
}

impl QuizBackend for HttpQuizClient {
    async fn get_sentence(
        &self,
        request: &SentenceRequest,
    ) -> Result<Reply<SentenceReply>, TransportError> {
        self.post(&self.sentence_url, request).await
    }

    async fn submit_sentence(
        &self,
        request: &SubmissionRequest,
    ) -> Result<Reply<Verdict>, TransportError> {
        self.post(&self.submit_url, request).await
    }
}

/// Content of the first `<meta name="csrf-token" content="...">` tag.
pub fn extract_csrf_meta(html: &str) -> Option<String> {
    META_TAG
        .find_iter(html)
        .map(|tag| tag.as_str())
        .find(|tag| {
            META_NAME
                .captures(tag)
                .is_some_and(|name| name[1].eq_ignore_ascii_case(CSRF_META_NAME))
        })
        .and_then(|tag| META_CONTENT.captures(tag))
        .map(|content| content[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::State,
        http::{HeaderMap, StatusCode},
        response::{Html, IntoResponse},
        routing::{get, post},
    };
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct Stub {
        page_hits: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<(String, Value)>>>,
    }

    impl Stub {
        fn record(&self, headers: &HeaderMap, body: Value) {
            let token = headers
                .get(CSRF_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            self.seen.lock().push((token, body));
        }
    }

    async fn page(State(stub): State<Stub>) -> Html<String> {
        let hit = stub.page_hits.fetch_add(1, Ordering::SeqCst);
        Html(format!(
            r#"<html><head><meta charset="utf-8"><meta name="csrf-token" content="tok-{hit}"></head><body><div id="chat"></div></body></html>"#
        ))
    }

    async fn sentence(
        State(stub): State<Stub>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        stub.record(&headers, body);
        Json(json!({ "english": "The cat sleeps", "difficulty": 45 }))
    }

    async fn submit(
        State(stub): State<Stub>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        stub.record(&headers, body);
        (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "correct": false,
                "translation": "El gato duerme",
                "entered_word_matches": [["El", 0, 0], ["perro", 3, -1]],
            })),
        )
    }

    async fn spawn_stub(router: Router<Stub>) -> (String, Stub) {
        let stub = Stub::default();
        let app = router.with_state(stub.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), stub)
    }

    fn quiz_router() -> Router<Stub> {
        Router::new()
            .route("/", get(page))
            .route("/getsentence", post(sentence))
            .route("/submitsentence", post(submit))
    }

    #[test]
    fn extracts_meta_token_in_any_attribute_order() {
        let html = r#"<meta name="viewport" content="x"><meta content='abc123' name='csrf-token'>"#;
        assert_eq!(extract_csrf_meta(html).as_deref(), Some("abc123"));
        assert_eq!(extract_csrf_meta("<meta name=\"other\" content=\"x\">"), None);
    }

    #[test]
    fn data_attributes_are_not_mistaken_for_name_or_content() {
        let html = r#"<meta name="csrf-token" data-content="decoy" content="real">"#;
        assert_eq!(extract_csrf_meta(html).as_deref(), Some("real"));
        let html = r#"<meta data-name="csrf-token" content="decoy"><meta name="csrf-token" content="real">"#;
        assert_eq!(extract_csrf_meta(html).as_deref(), Some("real"));
    }

    #[test]
    fn submission_omits_missing_prompt() {
        let request = SubmissionRequest {
            language: "spanish".into(),
            english: None,
            submission: "hola".into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, json!({ "language": "spanish", "submission": "hola" }));
    }

    #[test]
    fn correct_verdict_needs_no_matches() {
        let verdict: Verdict = serde_json::from_str(r#"{"correct": true}"#).unwrap();
        assert!(verdict.correct);
        assert_eq!(verdict.translation, None);
        assert_eq!(verdict.entered_word_matches, None);
    }

    #[test]
    fn verdict_without_correct_flag_is_incorrect() {
        let verdict: Verdict =
            serde_json::from_str(r#"{"translation": "El gato duerme"}"#).unwrap();
        assert!(!verdict.correct);
        assert_eq!(verdict.translation.as_deref(), Some("El gato duerme"));
    }

    #[tokio::test]
    async fn sentence_request_carries_token_and_payload() {
        let (server, stub) = spawn_stub(quiz_router()).await;
        let config = ClientConfig::new(server).with_csrf(CsrfSource::Fixed("secret".into()));
        let client = HttpQuizClient::new(&config).unwrap();

        let reply = client
            .get_sentence(&SentenceRequest {
                language: "spanish".into(),
                topic: "hobbies".into(),
            })
            .await
            .unwrap();

        assert!(reply.is_success());
        assert_eq!(reply.body.english, "The cat sleeps");
        let seen = stub.seen.lock();
        assert_eq!(seen[0].0, "secret");
        assert_eq!(seen[0].1, json!({ "language": "spanish", "topic": "hobbies" }));
    }

    #[tokio::test]
    async fn page_token_is_read_for_every_request() {
        let (server, stub) = spawn_stub(quiz_router()).await;
        let client = HttpQuizClient::new(&ClientConfig::new(server)).unwrap();
        let request = SentenceRequest {
            language: "french".into(),
            topic: "food".into(),
        };

        client.get_sentence(&request).await.unwrap();
        client.get_sentence(&request).await.unwrap();

        assert_eq!(stub.page_hits.load(Ordering::SeqCst), 2);
        let tokens: Vec<_> = stub.seen.lock().iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(tokens, vec!["tok-0", "tok-1"]);
    }

    #[tokio::test]
    async fn non_success_status_still_parses_body() {
        let (server, stub) = spawn_stub(quiz_router()).await;
        let config = ClientConfig::new(server).with_csrf(CsrfSource::Fixed("t".into()));
        let client = HttpQuizClient::new(&config).unwrap();

        let reply = client
            .submit_sentence(&SubmissionRequest {
                language: "spanish".into(),
                english: Some("The cat sleeps".into()),
                submission: "El perro".into(),
            })
            .await
            .unwrap();

        assert_eq!(reply.status, 400);
        assert!(!reply.is_success());
        assert!(!reply.body.correct);
        assert_eq!(reply.body.translation.as_deref(), Some("El gato duerme"));
        assert_eq!(
            reply.body.entered_word_matches.unwrap()[1],
            MatchSpan::new("perro", 3, -1)
        );
        let seen = stub.seen.lock();
        assert_eq!(seen[0].0, "t");
        assert_eq!(
            seen[0].1,
            json!({
                "language": "spanish",
                "english": "The cat sleeps",
                "submission": "El perro",
            })
        );
    }

    #[tokio::test]
    async fn html_body_is_a_decode_error() {
        let router = Router::new().route(
            "/getsentence",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "<h1>Server Error</h1>") }),
        );
        let (server, _stub) = spawn_stub(router).await;
        let config = ClientConfig::new(server).with_csrf(CsrfSource::Fixed("t".into()));
        let client = HttpQuizClient::new(&config).unwrap();

        let err = client
            .get_sentence(&SentenceRequest {
                language: "spanish".into(),
                topic: "food".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[tokio::test]
    async fn page_without_meta_tag_is_reported() {
        let router = Router::new().route("/", get(|| async { Html("<html></html>") }));
        let (server, _stub) = spawn_stub(router).await;
        let client = HttpQuizClient::new(&ClientConfig::new(server)).unwrap();

        let err = client
            .get_sentence(&SentenceRequest {
                language: "spanish".into(),
                topic: "food".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::MissingCsrfToken(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_an_http_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let config = ClientConfig::new(format!("http://{addr}"))
            .with_csrf(CsrfSource::Fixed("t".into()));
        let client = HttpQuizClient::new(&config).unwrap();

        let err = client
            .get_sentence(&SentenceRequest {
                language: "spanish".into(),
                topic: "food".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Http(_)));
    }
}
