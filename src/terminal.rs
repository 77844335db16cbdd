//! Raw-mode terminal surface for an interactive session.
//!
//! Architecture:
//!   main task:     event loop, crossterm key events + mpsc SessionEvent drain
//!   exchange task: tokio::spawn per submitted line, streams into the channel
//!
//! Unlike a full-screen UI, output scrolls like a plain shell: the session
//! writes straight to stdout and nothing is redrawn except the input line.
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::client::OllamaClient;
use crate::config::ResolvedConfig;
use crate::session::{self, KeyInput, SessionController, SessionEvent, SessionOptions};
use crate::ui;

// ── Output sink ───────────────────────────────────────────────────────────────

/// Where session output goes.
pub trait OutputSink {
    fn write(&mut self, text: &str) -> io::Result<()>;
}

/// Writes to a terminal in raw mode, where `\n` alone would not return the
/// carriage.
pub struct TerminalSink<W: Write> {
    out: W,
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl TerminalSink<Vec<u8>> {
    /// Everything written so far (tests and diagnostics).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.out).into_owned()
    }
}

impl<W: Write> OutputSink for TerminalSink<W> {
    fn write(&mut self, text: &str) -> io::Result<()> {
        let mut prev = '\0';
        let mut converted = String::with_capacity(text.len() + 8);
        for c in text.chars() {
            if c == '\n' && prev != '\r' {
                converted.push('\r');
            }
            converted.push(c);
            prev = c;
        }
        self.out.write_all(converted.as_bytes())?;
        self.out.flush()
    }
}

// ── Key translation ───────────────────────────────────────────────────────────

/// Map a crossterm key to the session's key set. Anything with Ctrl/Alt/Meta
/// held is not printable.
pub fn translate_key(key: &KeyEvent) -> KeyInput {
    let modified = key
        .modifiers
        .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::META | KeyModifiers::SUPER);
    match key.code {
        KeyCode::Enter => KeyInput::Enter,
        KeyCode::Backspace => KeyInput::Backspace,
        KeyCode::Up => KeyInput::Up,
        KeyCode::Down => KeyInput::Down,
        KeyCode::Char(c) if !modified && !c.is_control() => KeyInput::Printable(c),
        _ => KeyInput::Ignored,
    }
}

/// Presses and auto-repeats count; releases do not.
fn is_keypress(key: &KeyEvent) -> bool {
    matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat)
}

/// Ctrl+C / Ctrl+D.
fn is_quit(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('d'))
}

// ── Startup probe ─────────────────────────────────────────────────────────────

pub async fn probe_status(client: &OllamaClient, model: &str) -> String {
    let version = match client.version().await {
        Ok(v) => {
            info!(version = %v, endpoint = %client.endpoint, "ollama reachable");
            Some(v)
        }
        Err(e) => {
            info!(error = %e, endpoint = %client.endpoint, "ollama not reachable");
            None
        }
    };
    ui::connection_status(&client.endpoint, model, version.as_deref())
}

// ── Main run loop ─────────────────────────────────────────────────────────────

pub async fn run(resolved: ResolvedConfig) -> Result<()> {
    let client = Arc::new(OllamaClient::new(resolved.endpoint.clone(), resolved.request_timeout())?);
    let status = probe_status(&client, &resolved.model).await;

    enable_raw_mode().context("Failed to enable raw terminal mode")?;

    // Panic hook: leave raw mode before printing the panic
    let orig_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        orig_hook(info);
    }));

    let result = event_loop(client, &resolved, status).await;

    let _ = disable_raw_mode();
    println!();
    result
}

async fn event_loop(client: Arc<OllamaClient>, resolved: &ResolvedConfig, status: String) -> Result<()> {
    let mut session = SessionController::new(
        TerminalSink::new(io::stdout()),
        SessionOptions {
            model: resolved.model.clone(),
            status,
            warn_risky: resolved.warn_risky,
        },
    )?;

    // Channel: exchange task → session
    let (tx, mut rx) = mpsc::unbounded_channel::<SessionEvent>();
    let mut keys = EventStream::new();

    loop {
        tokio::select! {
            // ── Drain exchange events ─────────────────────────────────────────
            Some(ev) = rx.recv() => {
                session.apply(ev)?;
            }

            // ── Keyboard ──────────────────────────────────────────────────────
            maybe = keys.next() => {
                let key = match maybe {
                    Some(Ok(Event::Key(key))) => key,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e).context("Failed to read terminal event"),
                    None => break,
                };
                if !is_keypress(&key) {
                    continue;
                }
                if is_quit(&key) {
                    // No cancellation: an exchange in flight always runs to its end
                    if session.is_processing() {
                        debug!("quit ignored while processing");
                        continue;
                    }
                    break;
                }
                if let Some(exchange) = session.handle_key(translate_key(&key))? {
                    let client = Arc::clone(&client);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        session::run_exchange(client.as_ref(), exchange, &tx).await;
                    });
                }
            }
        }
    }

    Ok(())
}
