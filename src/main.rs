use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};

use codewizard::classify;
use codewizard::client::{ChatRequest, OllamaClient};
use codewizard::config::{self, ConfigFile, ResolvedConfig};
use codewizard::session::{self, LineKind};
use codewizard::{logging, stream, terminal, ui};

#[derive(Parser, Debug)]
#[command(
    name = "codewizard",
    about = "An AI-assisted terminal: type a command to have it explained, or ask a question",
    long_about = None,
)]
struct Args {
    /// Command or question to answer once (omit to start the interactive terminal)
    question: Option<String>,

    /// Profile to use from config file
    #[arg(short, long, env = "CODEWIZARD_PROFILE")]
    profile: Option<String>,

    /// Override Ollama endpoint URL
    #[arg(long, env = "CODEWIZARD_ENDPOINT")]
    endpoint: Option<String>,

    /// Override model name
    #[arg(short, long, env = "CODEWIZARD_MODEL")]
    model: Option<String>,

    /// Check that the endpoint is reachable and exit
    #[arg(long)]
    check: bool,

    /// Write a default config file to ~/.config/codewizard/config.toml and exit
    #[arg(long)]
    init: bool,

    /// List available profiles and exit
    #[arg(long)]
    profiles: bool,

    /// Generate shell completions and print to stdout (bash, zsh, fish, elvish)
    #[arg(long, value_name = "SHELL")]
    completions: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ── --init ────────────────────────────────────────────────────────────────
    if args.init {
        let path = ConfigFile::write_default_if_missing()?;
        println!("Config written to: {}", path.display());
        println!("Edit it, then run: codewizard");
        return Ok(());
    }

    // ── --completions ─────────────────────────────────────────────────────────
    if let Some(shell_name) = &args.completions {
        return generate_completions(shell_name);
    }

    // Logging is best-effort: a read-only home must not stop the terminal
    if let Err(e) = logging::init(&logging::log_path()) {
        eprintln!("  logging disabled: {e:#}");
    }

    let file = ConfigFile::load()?;

    // ── --profiles ────────────────────────────────────────────────────────────
    if args.profiles {
        print_profiles(&file);
        return Ok(());
    }

    let resolved = ResolvedConfig::resolve(
        &file,
        args.profile.as_deref(),
        args.endpoint.as_deref(),
        args.model.as_deref(),
    );
    tracing::info!(
        profile = %resolved.profile_name,
        endpoint = %resolved.endpoint,
        model = %resolved.model,
        "configuration resolved"
    );

    // ── --check ───────────────────────────────────────────────────────────────
    if args.check {
        return run_check(&resolved).await;
    }

    // ── Single-shot mode (plain stdout, no raw terminal) ──────────────────────
    if let Some(question) = args.question {
        return run_single_shot(question, &resolved).await;
    }

    // ── Interactive terminal ──────────────────────────────────────────────────
    terminal::run(resolved).await
}

// ── Single-shot mode ──────────────────────────────────────────────────────────

async fn run_single_shot(question: String, resolved: &ResolvedConfig) -> Result<()> {
    let question = question.trim().to_string();
    if question.is_empty() {
        bail!("nothing to ask");
    }

    let client = OllamaClient::new(resolved.endpoint.clone(), resolved.request_timeout())?;
    let (kind, messages) = session::classify_line(&question);
    tracing::info!(line = %classify::format_for_display(&question), ?kind, "single-shot");

    if kind == LineKind::ShellCommand && resolved.warn_risky && classify::is_risky_command(&question) {
        println!("{}", ui::risk_advisory());
    }

    let request = ChatRequest::streaming(resolved.model.clone(), messages);
    let mut relay = AnswerRelay::new(io::stdout().lock());
    let outcome = stream::consume(&client, request, |fragment| relay.push(fragment), |_| {}).await;

    match outcome {
        Ok(_) => relay.finish().context("Failed to write answer to stdout"),
        Err(e) => {
            let _ = relay.finish();
            if let Some(hint) = classify::command_help(&e.to_string()) {
                eprintln!("  {hint}");
            }
            Err(e.into())
        }
    }
}

/// Copies streamed fragments to `out`. After the first write error nothing
/// more is written, and `finish` reports that error.
struct AnswerRelay<W: Write> {
    out: W,
    /// Last byte written, to end the answer on a fresh line.
    last: Option<u8>,
    error: Option<io::Error>,
}

impl<W: Write> AnswerRelay<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            last: None,
            error: None,
        }
    }

    fn push(&mut self, fragment: &str) {
        if self.error.is_some() || fragment.is_empty() {
            return;
        }
        let result = self
            .out
            .write_all(fragment.as_bytes())
            .and_then(|_| self.out.flush());
        match result {
            Ok(()) => self.last = fragment.bytes().last(),
            Err(e) => self.error = Some(e),
        }
    }

    fn finish(mut self) -> io::Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        if self.last.is_some_and(|b| b != b'\n') {
            writeln!(self.out)?;
        }
        self.out.flush()
    }
}

// ── --check ───────────────────────────────────────────────────────────────────

async fn run_check(resolved: &ResolvedConfig) -> Result<()> {
    let client = OllamaClient::new(resolved.endpoint.clone(), resolved.request_timeout())?;
    match client.version().await {
        Ok(version) => {
            println!("{}", ui::connection_status(&resolved.endpoint, &resolved.model, Some(&version)));
            Ok(())
        }
        Err(e) => {
            println!("{}", ui::connection_status(&resolved.endpoint, &resolved.model, None));
            bail!("{e}")
        }
    }
}

// ── --profiles ────────────────────────────────────────────────────────────────

fn print_profiles(file: &ConfigFile) {
    println!();
    if file.profiles.is_empty() {
        println!("  No profiles in {}", config::config_path().display());
        println!("  Run `codewizard --init` to create one.");
        println!();
        return;
    }
    println!("  Profiles");
    for (name, is_default) in file.profile_names() {
        let Some(p) = file.profiles.get(&name) else {
            continue;
        };
        let marker = if is_default { " ←" } else { "" };
        println!("  {name}{marker}");
        println!("    endpoint  {}", p.endpoint);
        println!("    model     {}", p.model);
        if let Some(t) = p.request_timeout_secs {
            println!("    timeout   {t}s");
        }
        println!();
    }
}

// ── Shell completions ─────────────────────────────────────────────────────────

fn generate_completions(shell_name: &str) -> Result<()> {
    use clap_complete::{Shell, generate};

    let shell: Shell = match shell_name.to_lowercase().as_str() {
        "bash"    => Shell::Bash,
        "zsh"     => Shell::Zsh,
        "fish"    => Shell::Fish,
        "elvish"  => Shell::Elvish,
        _ => {
            eprintln!("Unknown shell: {shell_name}");
            eprintln!("Supported: bash, zsh, fish, elvish");
            std::process::exit(1);
        }
    };

    let mut cmd = Args::command();
    generate(shell, &mut cmd, "codewizard", &mut io::stdout());
    Ok(())
}
