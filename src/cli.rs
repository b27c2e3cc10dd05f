use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use askama::Template;
use atty::Stream;
use clap::{Args, Parser, Subcommand};
use linguabot::config::{ClientConfig, CsrfSource, DEFAULT_SERVER};
use linguabot::{ChatSession, HttpQuizClient, MatchSpan, Message, Speaker, format_matches};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use termimad::{MadSkin, terminal_size};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;

static MARKED_SPAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<span class="([ci])">(.*?)</span>"#).expect("valid span pattern")
});

#[derive(Parser, Debug)]
#[command(name = "linguabot", about = "Practise translating sentences with a quiz server", version)]
pub struct Cli {
    /// Emit JSON instead of styled text.
    #[arg(long, global = true)]
    json: bool,

    /// Log requests and server responses to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a quiz. Each line on stdin is one Enter press.
    Chat(ChatArgs),
    /// Render match spans over a submission without contacting a server.
    Format {
        /// The submitted sentence.
        #[arg(long)]
        source: String,
        /// Spans as JSON, e.g. '[["gato", 3, 1]]'.
        #[arg(long, default_value = "[]")]
        spans: String,
    },
}

#[derive(Args, Debug)]
struct ChatArgs {
    /// Base URL of the quiz server.
    #[arg(long, env = "LINGUABOT_SERVER", default_value = DEFAULT_SERVER)]
    server: String,
    /// Send this CSRF token instead of reading one from the page.
    #[arg(long, env = "LINGUABOT_CSRF_TOKEN")]
    csrf_token: Option<String>,
    /// Read the CSRF token from this environment variable on every request.
    #[arg(long)]
    csrf_env: Option<String>,
    /// Page whose csrf-token meta tag supplies the token.
    #[arg(long, default_value = "/")]
    csrf_page: String,
    /// Give up connecting to the server after this many seconds.
    #[arg(long)]
    connect_timeout: Option<u64>,
    /// Print the request status line after each response.
    #[arg(long)]
    show_status: bool,
    /// Write the transcript to this HTML file when the session ends.
    #[arg(long)]
    export: Option<PathBuf>,
}

impl ChatArgs {
    fn client_config(&self) -> ClientConfig {
        let csrf = match (&self.csrf_token, &self.csrf_env) {
            (Some(token), _) => CsrfSource::Fixed(token.clone()),
            (None, Some(var)) => CsrfSource::Env(var.clone()),
            (None, None) => CsrfSource::PageMeta(self.csrf_page.clone()),
        };
        let mut config = ClientConfig::new(self.server.clone()).with_csrf(csrf);
        config.connect_timeout = self.connect_timeout.map(Duration::from_secs);
        config
    }
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Command::Chat(args) => handle_chat(args, cli.json),
        Command::Format { source, spans } => handle_format(source, spans, cli.json),
    }
}

/// The line printed to stderr when `run` fails.
pub fn error_line(err: &dyn Error) -> String {
    format!("error: {err}")
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "linguabot=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_format(source: String, spans: String, as_json: bool) -> Result<(), Box<dyn Error>> {
    let spans: Vec<MatchSpan> = serde_json::from_str(&spans)
        .map_err(|err| format!("Failed to parse spans {spans:?}: {err}"))?;
    let html = format_matches(&spans, &source);
    if as_json {
        let payload = json!({ "source": source, "spans": spans, "html": html });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{html}");
    }
    Ok(())
}

fn handle_chat(args: ChatArgs, as_json: bool) -> Result<(), Box<dyn Error>> {
    let client = HttpQuizClient::new(&args.client_config())?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let mut printer = Printer::new(as_json, args.show_status);
    let session = runtime.block_on(chat_loop(client, &mut printer))?;

    if let Some(path) = &args.export {
        let page = TranscriptPage {
            messages: session.window().transcript.messages(),
            status: session.window().status.as_deref(),
            language: session.conversation().context().language,
            topic: session.conversation().context().topic,
        };
        fs::write(path, page.render()?)?;
        debug!(path = %path.display(), "Exported transcript");
    }
    Ok(())
}

async fn chat_loop(
    client: HttpQuizClient,
    printer: &mut Printer,
) -> Result<ChatSession<HttpQuizClient>, Box<dyn Error>> {
    let mut session = ChatSession::new(client);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    if atty::is(Stream::Stdin) && !printer.json {
        eprintln!("Which language would you like to practise? (Ctrl-D to quit)");
    }

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line? {
                    Some(line) => session.submit(line.trim_end_matches('\r')),
                    None => stdin_open = false,
                }
            }
            _ = session.next_completion(), if session.in_flight() > 0 => {}
        }
        printer.show(&session)?;
        if !stdin_open && session.in_flight() == 0 {
            break;
        }
    }
    Ok(session)
}

/// Prints whatever the session appended since the last call.
struct Printer {
    json: bool,
    show_status: bool,
    styled: bool,
    seen: usize,
    last_status: Option<String>,
}

impl Printer {
    fn new(json: bool, show_status: bool) -> Self {
        Self {
            json,
            show_status,
            styled: stdout_is_tty(),
            seen: 0,
            last_status: None,
        }
    }

    fn show(&mut self, session: &ChatSession<HttpQuizClient>) -> Result<(), Box<dyn Error>> {
        let window = session.window();
        for message in window.transcript.since(self.seen) {
            if self.json {
                println!("{}", serde_json::to_string(message)?);
            } else {
                self.print_message(message);
            }
        }
        self.seen = window.transcript.len();

        if self.show_status && window.status != self.last_status {
            if let Some(status) = &window.status {
                if self.json {
                    println!("{}", json!({ "status": status }));
                } else {
                    eprintln!("[{status}]");
                }
            }
            self.last_status = window.status.clone();
        }
        Ok(())
    }

    fn print_message(&self, message: &Message) {
        let markdown = message_markdown(message);
        if self.styled {
            let skin = markdown_skin();
            let width = markdown_width();
            for line in markdown.lines() {
                let text = skin.inline(line).to_string();
                let visible = line.chars().count();
                println!("{}", wrap_label(message.speaker(), &text, visible, width));
            }
        } else {
            for line in markdown.lines() {
                println!("{}: {line}", message.speaker());
            }
        }
    }
}

/// Rewrites the chat markup into the markdown subset termimad styles:
/// correct words in bold, incorrect ones struck through.
fn message_markdown(message: &Message) -> String {
    let html = message.html().replace("<br>", "\n");
    MARKED_SPAN
        .replace_all(&html, |caps: &regex::Captures<'_>| {
            let text = &caps[2];
            if text.is_empty() {
                String::new()
            } else if &caps[1] == "c" {
                format!("**{text}**")
            } else {
                format!("~~{text}~~")
            }
        })
        .into_owned()
}

// `visible` is the text width without ANSI styling.
fn wrap_label(speaker: Speaker, text: &str, visible: usize, width: usize) -> String {
    let label = format!("{speaker} │ ");
    if label.chars().count() + visible <= width {
        format!("{label}{text}")
    } else {
        format!("{label}\n      {text}")
    }
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(40) as usize
}

fn markdown_skin() -> MadSkin {
    MadSkin::default()
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>linguabot transcript{% if language.is_some() %} • {{ language.unwrap() }}{% endif %}</title>
    <style>
      .human { text-align: right; margin: 0.5em; }
      .bot { text-align: left; margin: 0.5em; }
      .c { color: #15803d; }
      .i { color: #b91c1c; text-decoration: line-through; }
    </style>
  </head>
  <body>
    {% if topic.is_some() %}<p id="instructions">Topic: {{ topic.unwrap() }}</p>{% endif %}
    <div id="chat">
      {% for message in messages %}
      <div class="{{ message.speaker().css_class() }}">{{ message.html()|safe }}</div>
      {% endfor %}
    </div>
    <div id="status">{% if status.is_some() %}<p>{{ status.unwrap() }}</p>{% endif %}</div>
  </body>
</html>"#,
    ext = "html"
)]
struct TranscriptPage<'a> {
    messages: &'a [Message],
    status: Option<&'a str>,
    language: Option<&'a str>,
    topic: Option<&'a str>,
}
