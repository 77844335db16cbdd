use std::collections::VecDeque;
use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ChatError;

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
}

impl ChatRequest {
    pub fn streaming(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
        }
    }
}

/// One incremental piece of a response. `done` marks the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub content: String,
    pub done: bool,
}

impl StreamChunk {
    pub fn new(content: impl Into<String>, done: bool) -> Self {
        Self { content: content.into(), done }
    }
}

/// One NDJSON line as Ollama sends it: `{"message":{"content":"…"},"done":false}`.
/// Ollama may also put an `{"error":"…"}` object into an already-open stream.
#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct UpstreamError {
    error: String,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

// ── Transport seam ────────────────────────────────────────────────────────────

/// Pull-based sequence of chunks for one exchange. Framing problems surface as
/// `ChatError::MalformedChunk` items; the stream keeps going after them.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ChatError>>;

/// Anything that can open a streaming chat exchange.
pub trait ChatTransport: Send + Sync {
    fn open(
        &self,
        request: ChatRequest,
    ) -> impl Future<Output = Result<ChunkStream, ChatError>> + Send;
}

// ── Ollama client ─────────────────────────────────────────────────────────────

/// Upper bound for the reachability probe, independent of the chat timeout.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub struct OllamaClient {
    http: reqwest::Client,
    pub endpoint: String,
}

impl OllamaClient {
    /// `timeout` bounds each whole request; `None` leaves it to the server.
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let endpoint = endpoint.into();
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        if is_loopback(&endpoint) {
            builder = builder.no_proxy();
        }
        let http = builder
            .build()
            .with_context(|| format!("Failed to build HTTP client for {endpoint}"))?;
        Ok(Self { http, endpoint })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint.trim_end_matches('/'))
    }

    /// Ask the server for its version. Any failure means "not reachable".
    pub async fn version(&self) -> Result<String, ChatError> {
        let resp = self
            .http
            .get(self.url("/api/version"))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| connect_error(&self.endpoint, &e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::transport(
                Some(status.as_u16()),
                upstream_error_message(status.as_u16(), &body),
            ));
        }
        let parsed: VersionResponse = resp
            .json()
            .await
            .map_err(|e| ChatError::transport(Some(status.as_u16()), error_chain(&e)))?;
        Ok(parsed.version)
    }
}

impl ChatTransport for OllamaClient {
    async fn open(&self, request: ChatRequest) -> Result<ChunkStream, ChatError> {
        let url = self.url("/api/chat");
        debug!(%url, model = %request.model, messages = request.messages.len(), "opening chat stream");

        let resp = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| connect_error(&self.endpoint, &e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::transport(
                Some(status.as_u16()),
                upstream_error_message(status.as_u16(), &body),
            ));
        }

        let bytes = resp.bytes_stream().map_err(|e| error_chain(&e)).boxed();
        Ok(ndjson_chunks(bytes))
    }
}

// ── NDJSON framing ────────────────────────────────────────────────────────────

struct NdjsonState<B> {
    bytes: BoxStream<'static, Result<B, String>>,
    pending: Vec<u8>,
    ready: VecDeque<Result<StreamChunk, ChatError>>,
    finished: bool,
}

impl<B: AsRef<[u8]>> NdjsonState<B> {
    fn feed(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
        // Split on raw bytes so a UTF-8 sequence cut across reads stays whole
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.push_line(&line);
        }
    }

    fn flush(&mut self) {
        let rest = std::mem::take(&mut self.pending);
        self.push_line(&rest);
    }

    fn push_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        if let Some(item) = parse_chunk_line(&line) {
            self.ready.push_back(item);
        }
    }
}

/// Turn a raw byte stream of newline-delimited JSON into chunks.
pub fn ndjson_chunks<B>(bytes: BoxStream<'static, Result<B, String>>) -> ChunkStream
where
    B: AsRef<[u8]> + Send + 'static,
{
    let state = NdjsonState {
        bytes,
        pending: Vec::new(),
        ready: VecDeque::new(),
        finished: false,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.ready.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(data)) => st.feed(data.as_ref()),
                Some(Err(message)) => {
                    st.finished = true;
                    st.ready.push_back(Err(ChatError::interrupted(message)));
                }
                None => {
                    st.finished = true;
                    st.flush();
                }
            }
        }
    })
    .boxed()
}

/// `None` for blank lines.
fn parse_chunk_line(line: &str) -> Option<Result<StreamChunk, ChatError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let parsed = match serde_json::from_str::<WireChunk>(line) {
        Ok(wire) => wire,
        Err(source) => {
            return Some(Err(ChatError::MalformedChunk {
                line: line.to_string(),
                source,
            }));
        }
    };
    if let Some(error) = parsed.error {
        return Some(Err(ChatError::interrupted(error)));
    }
    Some(Ok(StreamChunk {
        content: parsed.message.map(|m| m.content).unwrap_or_default(),
        done: parsed.done,
    }))
}

// ── Error helpers ─────────────────────────────────────────────────────────────

/// `{"error": "…"}` when the server sent one, otherwise the bare status.
fn upstream_error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<UpstreamError>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| format!("Ollama API error: {status}"))
}

fn connect_error(endpoint: &str, err: &reqwest::Error) -> ChatError {
    ChatError::transport(
        err.status().map(|s| s.as_u16()),
        format!("could not reach Ollama at {endpoint}: {}", error_chain(err)),
    )
}

/// reqwest hides the interesting part (e.g. "Connection refused") in `source()`.
fn error_chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut cur = err.source();
    while let Some(inner) = cur {
        let text = inner.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        cur = inner.source();
    }
    out
}

fn is_loopback(endpoint: &str) -> bool {
    let host = endpoint
        .split("://")
        .nth(1)
        .unwrap_or(endpoint)
        .trim_start_matches('[');
    host.starts_with("localhost") || host.starts_with("127.") || host.starts_with("::1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn pieces(parts: &[&'static str]) -> BoxStream<'static, Result<&'static str, String>> {
        stream::iter(parts.iter().map(|p| Ok(*p)).collect::<Vec<_>>()).boxed()
    }

    async fn collect(parts: &[&'static str]) -> Vec<Result<StreamChunk, ChatError>> {
        ndjson_chunks(pieces(parts)).collect().await
    }

    // ── Framing ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_lines_split_across_reads() {
        let items = collect(&[
            "{\"message\":{\"content\":\"Hel\"},\"do",
            "ne\":false}\n{\"message\":{\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true}\n",
        ])
        .await;
        let chunks: Vec<StreamChunk> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            chunks,
            vec![
                StreamChunk::new("Hel", false),
                StreamChunk::new("lo", false),
                StreamChunk::new("", true),
            ]
        );
    }

    #[tokio::test]
    async fn test_utf8_cut_inside_a_character() {
        let bytes: Vec<Vec<u8>> = {
            let line = "{\"message\":{\"content\":\"héllo\"},\"done\":true}\n".as_bytes();
            let cut = line.iter().position(|b| *b == 0xC3).unwrap() + 1;
            vec![line[..cut].to_vec(), line[cut..].to_vec()]
        };
        let source = stream::iter(bytes.into_iter().map(Ok)).boxed();
        let items: Vec<_> = ndjson_chunks(source).collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().content, "héllo");
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline_is_flushed() {
        let items = collect(&["{\"message\":{\"content\":\"end\"},\"done\":true}"]).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_end_stream() {
        let items = collect(&[
            "not json\n\n",
            "{\"message\":{\"content\":\"ok\"},\"done\":true}\n",
        ])
        .await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Err(ChatError::MalformedChunk { line, .. }) if line == "not json"));
        assert_eq!(items[1].as_ref().unwrap().content, "ok");
    }

    #[tokio::test]
    async fn test_read_error_becomes_interruption() {
        let source: BoxStream<'static, Result<&'static str, String>> = stream::iter(vec![
            Ok("{\"message\":{\"content\":\"par\"},\"done\":false}\n"),
            Err("connection reset by peer".to_string()),
            Ok("{\"message\":{\"content\":\"never\"},\"done\":true}\n"),
        ])
        .boxed();
        let items: Vec<_> = ndjson_chunks(source).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(&items[1], Err(ChatError::StreamInterrupted { message }) if message.contains("reset")));
    }

    #[tokio::test]
    async fn test_in_stream_error_object() {
        let items = collect(&["{\"error\":\"model requires more system memory\"}\n"]).await;
        assert!(matches!(&items[0], Err(ChatError::StreamInterrupted { message }) if message.contains("memory")));
    }

    // ── Request / error shapes ──────────────────────────────────────────────────

    #[test]
    fn test_request_wire_shape() {
        let req = ChatRequest::streaming(
            "llama2",
            vec![Message::system("be brief"), Message::user("hi")],
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "llama2",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hi"}
                ],
                "stream": true
            })
        );
    }

    #[test]
    fn test_upstream_error_message() {
        assert_eq!(upstream_error_message(404, r#"{"error":"model 'x' not found"}"#), "model 'x' not found");
        assert_eq!(upstream_error_message(502, "<html>bad gateway</html>"), "Ollama API error: 502");
        assert_eq!(upstream_error_message(500, ""), "Ollama API error: 500");
    }

    #[test]
    fn test_is_loopback() {
        assert!(is_loopback("http://localhost:11434"));
        assert!(is_loopback("http://127.0.0.1:11434"));
        assert!(is_loopback("http://[::1]:11434"));
        assert!(!is_loopback("https://ollama.example.com"));
    }

    // ── HTTP round trips against a loopback stub ────────────────────────────────

    /// Serve one canned HTTP response; the request body comes back on the channel.
    async fn serve_once(status: &'static str, body: String) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let request_body = read_request(&mut sock).await;
            let _ = tx.send(request_body);
            let resp = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/x-ndjson\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
            let _ = sock.shutdown().await;
        });
        (format!("http://{addr}"), rx)
    }

    async fn read_request(sock: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 1024];
        loop {
            let n = sock.read(&mut tmp).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + content_length {
                    return String::from_utf8_lossy(&buf[end + 4..end + 4 + content_length]).to_string();
                }
            }
        }
        String::new()
    }

    #[tokio::test]
    async fn test_open_streams_chunks() {
        let body = concat!(
            "{\"message\":{\"content\":\"Hi\"},\"done\":false}\n",
            "{\"message\":{\"content\":\" there\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true}\n",
        )
        .to_string();
        let (endpoint, request_rx) = serve_once("200 OK", body).await;
        let client = OllamaClient::new(endpoint, None).unwrap();

        let stream = client
            .open(ChatRequest::streaming("llama2", vec![Message::user("hello")]))
            .await
            .unwrap();
        let chunks: Vec<StreamChunk> = stream.map(|r| r.unwrap()).collect().await;
        let text: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(text, "Hi there");
        assert!(chunks.last().unwrap().done);

        let sent: serde_json::Value = serde_json::from_str(&request_rx.await.unwrap()).unwrap();
        assert_eq!(sent["model"], "llama2");
        assert_eq!(sent["stream"], true);
        assert_eq!(sent["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_open_rejected_with_upstream_error() {
        let (endpoint, _rx) =
            serve_once("404 Not Found", r#"{"error":"model 'nope' not found"}"#.to_string()).await;
        let client = OllamaClient::new(endpoint, None).unwrap();
        let err = match client.open(ChatRequest::streaming("nope", vec![])).await {
            Err(e) => e,
            Ok(_) => panic!("expected rejection"),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "model 'nope' not found");
    }

    #[tokio::test]
    async fn test_open_unreachable_is_transport_error() {
        // Bind and drop to get a port with nobody listening
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let client = OllamaClient::new(format!("http://{addr}"), None).unwrap();
        let err = match client.open(ChatRequest::streaming("llama2", vec![])).await {
            Err(e) => e,
            Ok(_) => panic!("expected connect failure"),
        };
        assert!(matches!(err, ChatError::Transport { status: None, .. }));
        assert!(err.to_string().starts_with("could not reach Ollama"));
    }

    #[tokio::test]
    async fn test_version_gives_up_on_silent_server() {
        // Accepts the connection, then never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let client = OllamaClient::new(format!("http://{addr}"), None).unwrap();

        let outcome = tokio::time::timeout(PROBE_TIMEOUT + Duration::from_secs(5), client.version()).await;
        let err = outcome.expect("version request must respect its bound").unwrap_err();
        assert!(matches!(err, ChatError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_version_probe() {
        let (endpoint, _rx) = serve_once("200 OK", r#"{"version":"0.5.7"}"#.to_string()).await;
        let client = OllamaClient::new(endpoint, None).unwrap();
        assert_eq!(client.version().await.unwrap(), "0.5.7");
    }
}
