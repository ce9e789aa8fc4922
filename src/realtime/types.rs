//! Wire types and call-surface events for the realtime voice session.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{AudioConfig, RealtimeConfig};
use crate::conversation::Role;

/// Call lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    RequestingPermission,
    GettingToken,
    Connecting,
    Ready,
    InCall,
    Error,
}

impl CallState {
    /// States with live call resources attached (socket and/or recording).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Ready | Self::InCall)
    }
}

/// Control operations accepted by a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCommand {
    /// Start capturing the user's next utterance.
    BeginUtterance,
    /// Stop capturing and send the utterance to the model.
    CommitUtterance,
    HangUp,
}

/// Updates published to the call screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    State(CallState),
    /// Assistant speaking indicator toggled.
    AssistantSpeaking(bool),
    /// Incremental assistant caption text.
    AssistantText(String),
    /// A finished user utterance transcription.
    UserTranscript(String),
    /// User-facing failure message.
    Failed(String),
}

/// One finished turn of the call transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub role: Role,
    pub content: String,
}

impl TranscriptTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Session settings sent as the first message after the socket opens.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub model: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub instructions: Option<String>,
}

impl SessionSettings {
    pub fn from_config(realtime: &RealtimeConfig, audio: &AudioConfig) -> Self {
        Self {
            model: realtime.model.clone(),
            voice: realtime.voice.clone(),
            input_audio_format: audio.input_format.clone(),
            output_audio_format: audio.output_format.clone(),
            instructions: realtime.instructions.clone(),
        }
    }

    /// Build the `session.update` configuration payload.
    pub fn configure_payload(&self) -> Value {
        let mut session = json!({
            "model": self.model,
            "voice": self.voice,
            "modalities": ["audio", "text"],
            "input_audio_format": self.input_audio_format,
            "output_audio_format": self.output_audio_format,
            "input_audio_transcription": { "model": "whisper-1" },
        });
        if let Some(ref instructions) = self.instructions {
            session["instructions"] = json!(instructions);
        }
        json!({ "type": "session.update", "session": session })
    }
}

/// Inbound server event, reduced to what the call session acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    SpeakingStarted,
    SpeakingStopped,
    AssistantTextDelta(String),
    AssistantTurnComplete,
    UserTranscriptCompleted(String),
    Error(String),
    Ignored,
}

/// Map one raw socket text frame onto a [`ServerEvent`].
///
/// Unknown event types, and frames that fail to parse, map to `Ignored` —
/// the stream is processed strictly in arrival order and a frame this
/// client does not understand must never end the call.
pub fn parse_server_event(raw: &str) -> ServerEvent {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return ServerEvent::Ignored;
    };
    let event_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("");

    match event_type {
        // Audio deltas imply the assistant started speaking; the payload
        // itself goes to the platform player, not this session.
        "output_audio_buffer.started"
        | "response.audio.delta"
        | "response.output_audio.delta" => ServerEvent::SpeakingStarted,

        "output_audio_buffer.stopped"
        | "response.audio.done"
        | "response.output_audio.done" => ServerEvent::SpeakingStopped,

        "response.audio_transcript.delta"
        | "response.output_text.delta"
        | "response.text.delta" => match delta_field(&value) {
            Some(delta) => ServerEvent::AssistantTextDelta(delta),
            None => ServerEvent::Ignored,
        },

        "response.audio_transcript.done"
        | "response.output_text.done"
        | "response.text.done"
        | "response.done" => ServerEvent::AssistantTurnComplete,

        "conversation.item.input_audio_transcription.completed" => {
            let transcript = value
                .get("transcript")
                .and_then(|t| t.as_str())
                .unwrap_or("")
                .to_string();
            ServerEvent::UserTranscriptCompleted(transcript)
        }

        "error" => {
            let message = value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .or_else(|| value.get("message").and_then(|m| m.as_str()))
                .unwrap_or("realtime error")
                .to_string();
            ServerEvent::Error(message)
        }

        _ => ServerEvent::Ignored,
    }
}

fn delta_field(value: &Value) -> Option<String> {
    value
        .get("delta")
        .and_then(|d| d.as_str())
        .or_else(|| value.get("text").and_then(|t| t.as_str()))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_payload_carries_formats_and_voice() {
        let settings = SessionSettings {
            model: "gpt-4o-realtime-preview".to_string(),
            voice: "alloy".to_string(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            instructions: Some("You are a friendly gardener.".to_string()),
        };

        let payload = settings.configure_payload();
        assert_eq!(payload["type"], "session.update");
        assert_eq!(payload["session"]["voice"], "alloy");
        assert_eq!(payload["session"]["input_audio_format"], "pcm16");
        assert_eq!(
            payload["session"]["instructions"],
            "You are a friendly gardener."
        );
    }

    #[test]
    fn parses_transcript_events() {
        let delta = parse_server_event(
            r#"{"type":"response.audio_transcript.delta","delta":"Your fern "}"#,
        );
        assert_eq!(
            delta,
            ServerEvent::AssistantTextDelta("Your fern ".to_string())
        );

        let done = parse_server_event(r#"{"type":"response.done"}"#);
        assert_eq!(done, ServerEvent::AssistantTurnComplete);

        let user = parse_server_event(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"is it thirsty"}"#,
        );
        assert_eq!(
            user,
            ServerEvent::UserTranscriptCompleted("is it thirsty".to_string())
        );
    }

    #[test]
    fn parses_error_with_nested_message() {
        let event =
            parse_server_event(r#"{"type":"error","error":{"message":"buffer too small"}}"#);
        assert_eq!(event, ServerEvent::Error("buffer too small".to_string()));
    }

    #[test]
    fn unknown_and_malformed_frames_are_ignored() {
        assert_eq!(
            parse_server_event(r#"{"type":"rate_limits.updated"}"#),
            ServerEvent::Ignored
        );
        assert_eq!(parse_server_event("not json"), ServerEvent::Ignored);
    }
}
