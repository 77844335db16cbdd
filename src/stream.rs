use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::client::{ChatRequest, ChatTransport};
use crate::error::ChatError;

/// Run one streaming exchange to its end.
///
/// `on_fragment` sees every chunk's raw text once, in arrival order.
/// `on_complete` runs exactly once with the concatenated text when the stream
/// finishes (a `done` chunk or a clean close); the same text is returned.
///
/// Malformed lines are logged and skipped. A failure before any chunk arrived
/// is a `Transport` error and nothing reaches `on_fragment`; a failure after
/// that is `StreamInterrupted`, and what was already delivered stays delivered.
/// There is no retry.
pub async fn consume<T, F, C>(
    transport: &T,
    request: ChatRequest,
    mut on_fragment: F,
    on_complete: C,
) -> Result<String, ChatError>
where
    T: ChatTransport,
    F: FnMut(&str),
    C: FnOnce(&str),
{
    let mut chunks = transport.open(request).await?;
    let mut full = String::new();
    let mut received = 0usize;
    let mut skipped = 0usize;

    while let Some(item) = chunks.next().await {
        match item {
            Ok(chunk) => {
                on_fragment(&chunk.content);
                full.push_str(&chunk.content);
                received += 1;
                if chunk.done {
                    break;
                }
            }
            Err(err) if !err.is_fatal() => {
                skipped += 1;
                warn!(error = %err, "skipping malformed stream line");
            }
            Err(err) if received == 0 => {
                return Err(ChatError::transport(err.status(), failure_message(err)));
            }
            Err(err) => {
                return Err(ChatError::interrupted(failure_message(err)));
            }
        }
    }

    debug!(chunks = received, skipped, chars = full.len(), "stream finished");
    on_complete(&full);
    Ok(full)
}

fn failure_message(err: ChatError) -> String {
    match err {
        ChatError::Transport { message, .. } | ChatError::StreamInterrupted { message } => message,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Message, StreamChunk};
    use crate::test_utils::ScriptedTransport;

    fn request() -> ChatRequest {
        ChatRequest::streaming("llama2", vec![Message::user("hi")])
    }

    fn malformed(line: &str) -> ChatError {
        ChatError::MalformedChunk {
            line: line.to_string(),
            source: serde_json::from_str::<serde_json::Value>(line).unwrap_err(),
        }
    }

    #[tokio::test]
    async fn test_fragments_in_order_and_single_completion() {
        let transport = ScriptedTransport::fragments(&["Hel", "lo, ", "world"]);
        let mut fragments = Vec::new();
        let mut completions = Vec::new();

        let full = consume(
            &transport,
            request(),
            |f| fragments.push(f.to_string()),
            |all| completions.push(all.to_string()),
        )
        .await
        .unwrap();

        assert_eq!(fragments, vec!["Hel", "lo, ", "world"]);
        assert_eq!(completions, vec!["Hello, world"]);
        assert_eq!(full, "Hello, world");
    }

    #[tokio::test]
    async fn test_clean_close_without_done_still_completes() {
        let transport = ScriptedTransport::items(vec![
            Ok(StreamChunk::new("partial", false)),
            Ok(StreamChunk::new(" answer", false)),
        ]);
        let mut completed = None;
        consume(&transport, request(), |_| {}, |all| completed = Some(all.to_string()))
            .await
            .unwrap();
        assert_eq!(completed.as_deref(), Some("partial answer"));
    }

    #[tokio::test]
    async fn test_nothing_after_done_is_read() {
        let transport = ScriptedTransport::items(vec![
            Ok(StreamChunk::new("a", true)),
            Ok(StreamChunk::new("b", false)),
        ]);
        let full = consume(&transport, request(), |_| {}, |_| {}).await.unwrap();
        assert_eq!(full, "a");
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let transport = ScriptedTransport::items(vec![
            Ok(StreamChunk::new("one ", false)),
            Err(malformed("{garbage")),
            Ok(StreamChunk::new("two", true)),
        ]);
        let mut count = 0;
        let full = consume(&transport, request(), |_| count += 1, |_| {}).await.unwrap();
        assert_eq!(full, "one two");
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_leading_malformed_line_does_not_end_the_stream() {
        let transport = ScriptedTransport::items(vec![
            Err(malformed("not json")),
            Ok(StreamChunk::new("fine", true)),
        ]);
        let full = consume(&transport, request(), |_| {}, |_| {}).await.unwrap();
        assert_eq!(full, "fine");
    }

    #[tokio::test]
    async fn test_rejection_emits_no_fragments() {
        let transport = ScriptedTransport::rejecting(ChatError::transport(Some(404), "model not found"));
        let mut fragments = 0;
        let mut completed = false;
        let err = consume(&transport, request(), |_| fragments += 1, |_| completed = true)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Transport { status: Some(404), .. }));
        assert_eq!(fragments, 0);
        assert!(!completed);
    }

    #[tokio::test]
    async fn test_failure_before_first_chunk_is_transport_error() {
        let transport = ScriptedTransport::items(vec![Err(ChatError::interrupted("connection reset"))]);
        let err = consume(&transport, request(), |_| {}, |_| {}).await.unwrap_err();
        assert!(matches!(err, ChatError::Transport { status: None, ref message } if message == "connection reset"));
    }

    #[tokio::test]
    async fn test_failure_mid_stream_keeps_delivered_fragments() {
        let transport = ScriptedTransport::items(vec![
            Ok(StreamChunk::new("The com", false)),
            Ok(StreamChunk::new("mand ", false)),
            Err(ChatError::interrupted("connection reset")),
        ]);
        let mut seen = String::new();
        let mut completed = false;
        let err = consume(&transport, request(), |f| seen.push_str(f), |_| completed = true)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::StreamInterrupted { .. }));
        assert_eq!(err.to_string(), "stream interrupted: connection reset");
        assert_eq!(seen, "The command ");
        assert!(!completed);
    }

    #[tokio::test]
    async fn test_request_reaches_transport_unchanged() {
        let transport = ScriptedTransport::fragments(&["ok"]);
        consume(&transport, request(), |_| {}, |_| {}).await.unwrap();
        let sent = transport.requests.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].model, "llama2");
        assert!(sent[0].stream);
    }
}
