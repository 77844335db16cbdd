//! CodeWizard: an AI-assisted terminal.
//!
//! Type a shell command and a local Ollama model explains it; type a question
//! and it answers. The answer streams into the terminal as it is generated.

pub mod classify;
pub mod client;
pub mod config;
pub mod editor;
pub mod error;
pub mod history;
pub mod logging;
pub mod session;
pub mod stream;
pub mod terminal;
pub mod ui;

#[cfg(test)]
mod test_utils;
