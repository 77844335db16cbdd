//! Fixed text written to the terminal by the session and the CLI.

/// Marks the start of an editable line.
pub const PROMPT: &str = "$ ";

pub const RISK_GLYPH: &str = "⚠";
pub const ERROR_GLYPH: &str = "✗";

const TITLE: &str = "Welcome to CodeWizard Terminal";

// ── Banner ────────────────────────────────────────────────────────────────────

/// Lines shown once when a session starts.
pub fn banner(status: &str) -> Vec<String> {
    vec![
        TITLE.to_string(),
        "-".repeat(TITLE.chars().count()),
        status.to_string(),
        "Type a shell command to have it explained, or ask a question.".to_string(),
        "Ctrl+C or Ctrl+D to quit.".to_string(),
    ]
}

/// Status line for the banner from the startup probe.
pub fn connection_status(endpoint: &str, model: &str, version: Option<&str>) -> String {
    match version {
        Some(v) => format!("Connected to Ollama {v} at {endpoint}  ·  model {model}"),
        None => format!("Ollama is not reachable at {endpoint}. Start it with `ollama serve`."),
    }
}

pub fn risk_advisory() -> String {
    format!("{RISK_GLYPH} This command matches a known destructive pattern. Read the explanation before running it.")
}

pub fn error_line(message: &str) -> String {
    format!("{ERROR_GLYPH} {message}")
}
