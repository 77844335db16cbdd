//! Command-line heuristics: is this a shell command, is it destructive, what
//! kind of tool is it, what could the user mean, and what must never be shown.
//!
//! Everything here is a pure function over text. Nothing fails; input that
//! doesn't fit a pattern simply classifies as "no match".
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

// ── Shell command detection ───────────────────────────────────────────────────

/// First tokens that mark a line as a shell invocation (exact, case-sensitive).
const COMMAND_PREFIXES: &[&str] = &[
    // navigation / files
    "cd", "ls", "cat", "echo", "mkdir", "touch", "rm", "cp", "mv",
    // vcs / containers / remote
    "git", "docker", "kubectl", "ssh", "scp", "curl", "wget",
    // package managers
    "npm", "yarn", "pnpm", "apt", "yum", "dnf", "brew", "cargo",
    // interpreters and shells
    "python", "node", "bash", "sh", "zsh", "fish", "powershell", "cmd",
    "php", "ruby", "perl", "java", "go", "rust",
    // system
    "sudo",
];

pub fn is_shell_command(text: &str) -> bool {
    let trimmed = text.trim();
    let Some(first) = first_token(trimmed) else {
        return false;
    };
    COMMAND_PREFIXES.contains(&first)
        || has_shell_metachar(trimmed)
        || trimmed.starts_with(['.', '/'])
}

/// `|`, `>`, `<` also cover `||`, `>>` and `<<`.
fn has_shell_metachar(text: &str) -> bool {
    text.contains(['|', '>', '<']) || text.contains("&&")
}

fn first_token(text: &str) -> Option<&str> {
    text.split_whitespace().next()
}

// ── Risk detection ────────────────────────────────────────────────────────────

static RISKY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // recursive delete of / or /* (a sub-path like /tmp/foo is fine)
        r"\brm\s+(-[a-zA-Z]*[rR][a-zA-Z]*|--recursive)(\s+-\S+)*\s+/\*?(\s|$)",
        // raw block device writes
        r"\bdd\s+.*\bof\s*=\s*/dev/(sd|hd|nvme)",
        r"\bmkfs",
        r"\bchmod\s+-R\s+777\s+/(\s|$)",
        r"\bmv\s+.*\s+/dev/null",
        r">\s*/etc/(passwd|shadow)",
        r"\b(shutdown|reboot|halt)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("risk pattern must compile"))
    .collect()
});

/// Fork bomb with all whitespace removed.
const FORK_BOMB: &str = ":(){:|:&};:";

/// Advisory check for well-known destructive commands.
pub fn is_risky_command(text: &str) -> bool {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    compact.contains(FORK_BOMB) || RISKY_PATTERNS.iter().any(|re| re.is_match(text))
}

// ── Categories ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCategory {
    FileOperations,
    PackageManagement,
    Git,
    Network,
    Process,
    System,
}

const CATEGORY_TABLE: &[(CommandCategory, &[&str])] = &[
    (
        CommandCategory::FileOperations,
        &["ls", "cd", "mkdir", "touch", "rm", "cp", "mv", "find", "grep", "cat"],
    ),
    (
        CommandCategory::PackageManagement,
        &["npm", "yarn", "pnpm", "pip", "apt", "yum", "brew", "apt-get"],
    ),
    (CommandCategory::Git, &["git", "gh"]),
    (
        CommandCategory::Network,
        &["curl", "wget", "ssh", "nc", "ping", "dig", "host", "traceroute", "netstat"],
    ),
    (CommandCategory::Process, &["ps", "top", "htop", "kill", "pkill"]),
    (
        CommandCategory::System,
        &["sudo", "systemctl", "service", "uname", "whoami", "echo", "date"],
    ),
];

impl CommandCategory {
    pub fn label(self) -> &'static str {
        match self {
            CommandCategory::FileOperations => "file operations",
            CommandCategory::PackageManagement => "package management",
            CommandCategory::Git => "version control",
            CommandCategory::Network => "network",
            CommandCategory::Process => "process management",
            CommandCategory::System => "system administration",
        }
    }
}

impl fmt::Display for CommandCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn command_category(text: &str) -> Option<CommandCategory> {
    let first = first_token(text)?;
    CATEGORY_TABLE
        .iter()
        .find(|(_, names)| names.contains(&first))
        .map(|(category, _)| *category)
}

// ── Suggestions ───────────────────────────────────────────────────────────────

const MAX_HISTORY_SUGGESTIONS: usize = 3;

fn canned_suggestions(command: &str) -> Option<&'static [&'static str]> {
    let list: &'static [&'static str] = match command {
        "git" => &[
            "git status",
            "git pull",
            "git push",
            "git commit -m \"\"",
            "git checkout -b ",
        ],
        "npm" => &[
            "npm install",
            "npm run start",
            "npm run build",
            "npm test",
            "npm update",
        ],
        "ls" => &["ls -la", "ls -lh", "ls --color=auto"],
        "docker" => &[
            "docker ps",
            "docker images",
            "docker-compose up -d",
            "docker build -t name .",
        ],
        "ssh" => &["ssh user@hostname", "ssh -i key.pem user@hostname"],
        _ => return None,
    };
    Some(list)
}

/// Completion candidates for `current_input`, given the history oldest-first.
///
/// Empty input offers the most recent history. A known first token returns its
/// canned list verbatim, without filtering on the rest of the input. Anything
/// else falls back to history entries with `current_input` as an exact prefix.
pub fn suggestions(current_input: &str, history: &[String]) -> Vec<String> {
    let Some(command) = first_token(current_input) else {
        return history
            .iter()
            .rev()
            .take(MAX_HISTORY_SUGGESTIONS)
            .cloned()
            .collect();
    };

    if let Some(canned) = canned_suggestions(command) {
        return canned.iter().map(|s| s.to_string()).collect();
    }

    history
        .iter()
        .rev()
        .filter(|entry| entry.starts_with(current_input))
        .take(MAX_HISTORY_SUGGESTIONS)
        .cloned()
        .collect()
}

// ── Redaction ─────────────────────────────────────────────────────────────────

pub const REDACTED: &str = "[HIDDEN]";

static PASSWORD_FLAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<pre>^|\s)(?P<flag>--password|-p)(?P<sep>=|\s+)?(?P<val>[^\s=]\S*)")
        .expect("password flag pattern must compile")
});

static SECRET_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?P<key>TOKEN|API[_-]?KEY|SECRET)(?P<sep>\s*=\s*|\s+)(?P<val>\S+)")
        .expect("secret assignment pattern must compile")
});

/// Hide passwords and token-like values, keeping the flag or key name visible.
pub fn format_for_display(text: &str) -> String {
    let masked = PASSWORD_FLAG.replace_all(text, format!("${{pre}}${{flag}}${{sep}}{REDACTED}"));
    SECRET_ASSIGNMENT
        .replace_all(&masked, format!("${{key}}${{sep}}{REDACTED}"))
        .into_owned()
}

// ── Error hints ───────────────────────────────────────────────────────────────

const HELP_PATTERNS: &[(&str, &str)] = &[
    (
        "command not found",
        "This command isn't installed. Try installing it with your package manager.",
    ),
    (
        "permission denied",
        "You don't have permission to run this. Try sudo (be careful!).",
    ),
    (
        "no such file or directory",
        "The file or directory doesn't exist. Check the path and try again.",
    ),
    (
        "connection refused",
        "Connection refused. Check that the service is running and the port is open.",
    ),
];

/// One-line hint for a recognisable failure message.
pub fn command_help(output: &str) -> Option<&'static str> {
    let lower = output.to_lowercase();
    HELP_PATTERNS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, help)| *help)
}
