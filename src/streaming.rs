//! Streaming chat support for assistant replies.
//!
//! The chat backend streams a reply as a chunked HTTP body of newline-framed
//! lines, each either empty or `data: <json>`. The transport splits that
//! body at arbitrary byte boundaries, so [`ChunkDecoder`] reassembles frames
//! before [`stream_chat`] turns them into real-time chunks on a channel.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

/// Marker prefix for protocol frames in the stream body.
const FRAME_MARKER: &str = "data: ";

/// A streaming chunk from the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamChunk {
    /// Text content delta
    Text(String),
    /// Stream finished
    Done,
    /// Error occurred (in-band or transport-level)
    Error(String),
}

/// One decoded protocol event from a frame line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Content(String),
    Done,
    Error(String),
}

/// Wire shape of one `data:` frame payload. Exactly one field is set per
/// frame; precedence below guards against servers that disagree.
#[derive(Debug, Deserialize)]
struct FramePayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

/// Reassembles protocol frames from arbitrarily split transport fragments.
///
/// Holds the trailing partial line between calls; fragments are fed as raw
/// bytes so a multi-byte codepoint torn across two reads stays intact in
/// the buffer until its line completes. Lines without the frame marker, and
/// marker lines whose payload fails to parse, are skipped: correct frames
/// always eventually complete the message, so a torn line is never fatal.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    buffer: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport fragment, yielding every event it completes.
    pub fn feed(&mut self, fragment: &[u8]) -> Vec<FrameEvent> {
        self.buffer.extend_from_slice(fragment);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(event) = parse_frame_line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_frame_line(line: &str) -> Option<FrameEvent> {
    let payload = line.strip_prefix(FRAME_MARKER)?;
    let frame: FramePayload = match serde_json::from_str::<FramePayload>(payload) {
        Ok(frame) => frame,
        Err(_) => {
            debug!(len = payload.len(), "skipping malformed stream frame");
            return None;
        }
    };
    if let Some(message) = frame.error {
        return Some(FrameEvent::Error(message));
    }
    if frame.done.unwrap_or(false) {
        return Some(FrameEvent::Done);
    }
    frame.content.map(FrameEvent::Content)
}

/// Request parameters for one streamed chat turn.
#[derive(Debug, Clone)]
pub struct ChatStreamRequest {
    pub base_url: String,
    pub access_token: Option<String>,
    pub message: String,
    pub conversation_id: Option<i64>,
    pub plant_id: Option<i64>,
}

/// Stream one chat turn, sending chunks to the provided channel.
///
/// Exactly one terminal chunk (`Done` or `Error`) is sent per call, on
/// every exit path. Transport-level failures (no response, or the body
/// dying mid-stream) report a distinct message from in-band `error` frames
/// so callers can tell "server said no" from "never reached the server".
pub async fn stream_chat(
    http: &reqwest::Client,
    req: &ChatStreamRequest,
    tx: mpsc::Sender<StreamChunk>,
) {
    let url = format!("{}/chat/stream", req.base_url.trim_end_matches('/'));

    let mut body = json!({ "message": req.message });
    if let Some(id) = req.conversation_id {
        body["conversation_id"] = json!(id);
    }
    if let Some(id) = req.plant_id {
        body["plant_id"] = json!(id);
    }

    let mut builder = http.post(&url).json(&body);
    if let Some(ref token) = req.access_token {
        builder = builder.bearer_auth(token);
    }

    let resp = match builder.send().await {
        Ok(resp) => resp,
        Err(e) => {
            let _ = tx
                .send(StreamChunk::Error(format!(
                    "could not reach the assistant service: {e}"
                )))
                .await;
            return;
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let _ = tx
            .send(StreamChunk::Error(format!("{} — {}", status, text)))
            .await;
        return;
    }

    let mut stream = resp.bytes_stream();
    let mut decoder = ChunkDecoder::new();

    while let Some(chunk_result) = stream.next().await {
        let chunk = match chunk_result {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx
                    .send(StreamChunk::Error(format!(
                        "connection lost while streaming: {e}"
                    )))
                    .await;
                return;
            }
        };

        for event in decoder.feed(&chunk) {
            match event {
                FrameEvent::Content(text) => {
                    let _ = tx.send(StreamChunk::Text(text)).await;
                }
                FrameEvent::Done => {
                    let _ = tx.send(StreamChunk::Done).await;
                    return;
                }
                FrameEvent::Error(message) => {
                    let _ = tx.send(StreamChunk::Error(message)).await;
                    return;
                }
            }
        }
    }

    // Body ended without a done frame; treat it as a clean finish.
    let _ = tx.send(StreamChunk::Done).await;
}
