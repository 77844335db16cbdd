//! Interactive session controller.
//!
//! Turns key presses into a command line, decides whether the line is a shell
//! command or a question, hands a framed exchange to the runner, and renders the
//! streamed answer. One exchange at a time: while it streams, every key press is
//! dropped.
//!
//! ```text
//!   Idle ──Enter (non-empty)──▶ Processing ──Completed / Failed──▶ Idle
//!    ▲ │
//!    └─┘ printable · backspace · ↑ ↓ · empty Enter
//! ```
use std::io;

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::classify::{self, CommandCategory};
use crate::client::{ChatRequest, ChatTransport, Message};
use crate::editor::{InputLineEditor, char_columns};
use crate::error::ChatError;
use crate::history::HistoryNavigator;
use crate::stream;
use crate::terminal::OutputSink;
use crate::ui;

// ── Inputs and outputs ────────────────────────────────────────────────────────

/// The only key presses the session reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Printable(char),
    Enter,
    Backspace,
    Up,
    Down,
    Ignored,
}

/// What a submitted line was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    ShellCommand,
    Question,
}

/// A framed request, ready to stream.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub kind: LineKind,
    pub model: String,
    pub messages: Vec<Message>,
}

impl Exchange {
    pub fn request(self) -> ChatRequest {
        ChatRequest::streaming(self.model, self.messages)
    }
}

/// Progress of the in-flight exchange, in order. Exactly one of `Completed`
/// or `Failed` ends it.
#[derive(Debug)]
pub enum SessionEvent {
    Fragment(String),
    Completed(String),
    Failed(ChatError),
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Everything a key press can change.
#[derive(Debug, Default)]
pub struct SessionState {
    pub editor: InputLineEditor,
    pub history: HistoryNavigator,
    pub processing: bool,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub model: String,
    /// Banner line describing the backend connection.
    pub status: String,
    /// Print an advisory before explaining a destructive-looking command.
    pub warn_risky: bool,
}

pub struct SessionController<S: OutputSink> {
    state: SessionState,
    sink: S,
    model: String,
    warn_risky: bool,
    /// Whether the cursor sits at column 0 of the output.
    at_line_start: bool,
}

impl<S: OutputSink> SessionController<S> {
    /// Start a session: banner, blank line, prompt.
    pub fn new(sink: S, options: SessionOptions) -> io::Result<Self> {
        let mut session = Self {
            state: SessionState::default(),
            sink,
            model: options.model,
            warn_risky: options.warn_risky,
            at_line_start: true,
        };
        for line in ui::banner(&options.status) {
            session.writeln(&line)?;
        }
        session.writeln("")?;
        session.write(ui::PROMPT)?;
        Ok(session)
    }

    pub fn is_processing(&self) -> bool {
        self.state.processing
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    // ── Key dispatch ──────────────────────────────────────────────────────────

    /// Apply one key press. Returns the exchange to stream when Enter submits a
    /// non-empty line; the session is then `Processing` until `apply` sees the
    /// exchange end.
    pub fn handle_key(&mut self, key: KeyInput) -> io::Result<Option<Exchange>> {
        if self.state.processing {
            trace!(?key, "input dropped while processing");
            return Ok(None);
        }

        match key {
            KeyInput::Printable(c) => {
                if self.state.editor.append_printable(c) {
                    self.state.history.reset_cursor();
                    let mut buf = [0u8; 4];
                    self.write(c.encode_utf8(&mut buf))?;
                }
            }
            KeyInput::Backspace => {
                // Never erase into the prompt marker
                if let Some(removed) = self.state.editor.backspace() {
                    self.state.history.reset_cursor();
                    self.write(&"\u{8} \u{8}".repeat(char_columns(removed)))?;
                }
            }
            KeyInput::Up => {
                if let Some(entry) = self.state.history.recall_older() {
                    self.replace_line(&entry)?;
                }
            }
            KeyInput::Down => {
                // Only while browsing; otherwise the live line would be wiped
                if self.state.history.cursor().is_some() {
                    let entry = self.state.history.recall_newer();
                    self.replace_line(&entry)?;
                }
            }
            KeyInput::Enter => {
                let line = self.state.editor.submit();
                self.writeln("")?;
                if line.is_empty() {
                    self.write(ui::PROMPT)?;
                    return Ok(None);
                }
                return self.begin(line).map(Some);
            }
            KeyInput::Ignored => {}
        }
        Ok(None)
    }

    /// Erase the visible input and show `text` in its place, keeping the
    /// editor buffer in step with the screen.
    fn replace_line(&mut self, text: &str) -> io::Result<()> {
        let width = self.state.editor.display_width();
        self.write(&format!("\r{}{}\r{}", ui::PROMPT, " ".repeat(width), ui::PROMPT))?;
        self.state.editor.set_buffer(text);
        let shown = self.state.editor.buffer().to_string();
        self.write(&shown)
    }

    /// Idle → Processing for a submitted line.
    fn begin(&mut self, line: String) -> io::Result<Exchange> {
        self.state.history.record(&line);

        let (kind, messages) = classify_line(&line);
        let category = classify::command_category(&line);
        info!(
            line = %classify::format_for_display(&line),
            ?kind,
            category = category.map(CommandCategory::label),
            "line submitted"
        );

        if kind == LineKind::ShellCommand && classify::is_risky_command(&line) {
            warn!(line = %classify::format_for_display(&line), "destructive pattern matched");
            if self.warn_risky {
                self.writeln(&ui::risk_advisory())?;
            }
        }

        self.state.processing = true;
        self.state.editor.lock();

        Ok(Exchange {
            kind,
            model: self.model.clone(),
            messages,
        })
    }

    // ── Exchange events ───────────────────────────────────────────────────────

    /// Render one event of the in-flight exchange.
    pub fn apply(&mut self, event: SessionEvent) -> io::Result<()> {
        if !self.state.processing {
            debug!(?event, "event with no exchange in flight, dropped");
            return Ok(());
        }

        match event {
            SessionEvent::Fragment(text) => self.write(&text),
            SessionEvent::Completed(full) => {
                debug!(chars = full.len(), "exchange complete");
                self.finish()
            }
            SessionEvent::Failed(err) => {
                error!(error = %err, "exchange failed");
                if !self.at_line_start {
                    self.writeln("")?;
                }
                self.write(&ui::error_line(&err.to_string()))?;
                if let ChatError::Transport { message, .. } = &err {
                    if let Some(hint) = classify::command_help(message) {
                        self.writeln("")?;
                        self.write(hint)?;
                    }
                }
                self.finish()
            }
        }
    }

    /// Processing → Idle: fresh line, prompt, input accepted again.
    fn finish(&mut self) -> io::Result<()> {
        self.state.processing = false;
        self.state.editor.unlock();
        if !self.at_line_start {
            self.writeln("")?;
        }
        self.write(ui::PROMPT)
    }

    // ── Sink helpers ──────────────────────────────────────────────────────────

    fn write(&mut self, text: &str) -> io::Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.sink.write(text)?;
        self.at_line_start = text.ends_with('\n');
        Ok(())
    }

    fn writeln(&mut self, text: &str) -> io::Result<()> {
        self.sink.write(text)?;
        self.sink.write("\n")?;
        self.at_line_start = true;
        Ok(())
    }
}

// ── Prompt framing ────────────────────────────────────────────────────────────

const EXPLAIN_SYSTEM_PROMPT: &str = "You are a terminal assistant. The user typed a shell command. \
Explain concisely what it does, covering each flag and argument, and point out anything \
dangerous or irreversible. Do not claim to have run it. Answer in plain text, no markdown.";

const ASSISTANT_SYSTEM_PROMPT: &str = "You are CodeWizard, a helpful assistant for terminal and \
coding tasks. Answer concisely in plain text suitable for a terminal, no markdown.";

/// System + user pair for a submitted line.
pub fn frame_messages(line: &str, kind: LineKind) -> Vec<Message> {
    match kind {
        LineKind::ShellCommand => {
            let mut system = EXPLAIN_SYSTEM_PROMPT.to_string();
            if let Some(category) = classify::command_category(line) {
                system.push_str(&format!(" The command is a {category} tool."));
            }
            vec![
                Message::system(system),
                Message::user(format!("Explain this command:\n{line}")),
            ]
        }
        LineKind::Question => vec![
            Message::system(ASSISTANT_SYSTEM_PROMPT),
            Message::user(line),
        ],
    }
}

/// Classify and frame a line outside the interactive loop.
pub fn classify_line(line: &str) -> (LineKind, Vec<Message>) {
    let kind = if classify::is_shell_command(line) {
        LineKind::ShellCommand
    } else {
        LineKind::Question
    };
    (kind, frame_messages(line, kind))
}

// ── Exchange runner ───────────────────────────────────────────────────────────

/// Stream `exchange` and report progress on `events`: fragments as they
/// arrive, then exactly one `Completed` or `Failed`.
pub async fn run_exchange<T: ChatTransport>(
    transport: &T,
    exchange: Exchange,
    events: &mpsc::UnboundedSender<SessionEvent>,
) {
    let outcome = stream::consume(
        transport,
        exchange.request(),
        |fragment| {
            let _ = events.send(SessionEvent::Fragment(fragment.to_string()));
        },
        |full| {
            let _ = events.send(SessionEvent::Completed(full.to_string()));
        },
    )
    .await;

    if let Err(err) = outcome {
        let _ = events.send(SessionEvent::Failed(err));
    }
}
