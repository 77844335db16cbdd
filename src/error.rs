use thiserror::Error;

/// Failures of a single streaming chat exchange.
///
/// `Transport` and `StreamInterrupted` end the exchange and are rendered as one
/// line by the session. `MalformedChunk` only ever describes one bad line of the
/// stream; the consumer logs it and keeps reading.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The request could not be sent, or the server rejected it before any data.
    #[error("{message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// The connection dropped after the response had started.
    #[error("stream interrupted: {message}")]
    StreamInterrupted { message: String },

    /// One line of the stream was not a valid chunk object.
    #[error("malformed chunk {line:?}: {source}")]
    MalformedChunk {
        line: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ChatError {
    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        ChatError::Transport {
            status,
            message: message.into(),
        }
    }

    pub fn interrupted(message: impl Into<String>) -> Self {
        ChatError::StreamInterrupted {
            message: message.into(),
        }
    }

    /// Upstream HTTP status, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ChatError::Transport { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, ChatError::MalformedChunk { .. })
    }
}
