use std::sync::Mutex;

use futures_util::StreamExt;
use futures_util::stream;

use crate::client::{ChatRequest, ChatTransport, ChunkStream, StreamChunk};
use crate::error::ChatError;

/// Transport that plays back a fixed script and remembers the requests it saw.
pub struct ScriptedTransport {
    script: Mutex<Option<Result<Vec<Result<StreamChunk, ChatError>>, ChatError>>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    /// Plain fragments; the last one carries `done: true`.
    pub fn fragments(parts: &[&str]) -> Self {
        let last = parts.len().saturating_sub(1);
        let items = parts
            .iter()
            .enumerate()
            .map(|(i, p)| Ok(StreamChunk::new(*p, i == last)))
            .collect();
        Self::items(items)
    }

    pub fn items(items: Vec<Result<StreamChunk, ChatError>>) -> Self {
        Self {
            script: Mutex::new(Some(Ok(items))),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(err: ChatError) -> Self {
        Self {
            script: Mutex::new(Some(Err(err))),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

impl ChatTransport for ScriptedTransport {
    async fn open(&self, request: ChatRequest) -> Result<ChunkStream, ChatError> {
        self.requests.lock().expect("requests lock").push(request);
        let script = self
            .script
            .lock()
            .expect("script lock")
            .take()
            .unwrap_or_else(|| Ok(Vec::new()));
        script.map(|items| stream::iter(items).boxed())
    }
}
