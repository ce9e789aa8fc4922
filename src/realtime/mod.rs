//! Realtime voice-call session.
//!
//! Owns the speech-model socket and drives the call state machine: request
//! microphone access, fetch an ephemeral credential, connect with it in the
//! subprotocol list, configure the session, then demultiplex inbound events
//! while sequencing outbound microphone commits. The transcript is flushed
//! and synced exactly once no matter how the call ends.

mod types;
pub use types::*;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::api::BackendClient;
use crate::audio::MicCapture;
use crate::config::Config;
use crate::conversation::{ConversationId, Role};
use crate::error::CallError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One step of the call loop, extracted so the socket borrow ends before
/// the session mutates itself.
enum Step {
    Command(Option<CallCommand>),
    Inbound(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
}

/// A single voice call. Owns the socket, the microphone controller, and
/// the transcript; every operation goes through this object so the
/// socket-open check before each send has one source of truth.
pub struct RealtimeVoiceSession {
    api: BackendClient,
    mic: Box<dyn MicCapture>,
    settings: SessionSettings,
    endpoint: String,
    conversation_id: Option<ConversationId>,
    plant_id: Option<i64>,
    state: CallState,
    socket: Option<WsStream>,
    transcript: Vec<TranscriptTurn>,
    pending_assistant: String,
    assistant_speaking: bool,
    flushed: bool,
    events: mpsc::UnboundedSender<CallEvent>,
}

impl RealtimeVoiceSession {
    pub fn new(
        api: BackendClient,
        mic: Box<dyn MicCapture>,
        config: &Config,
        events: mpsc::UnboundedSender<CallEvent>,
    ) -> Self {
        Self {
            api,
            mic,
            settings: SessionSettings::from_config(&config.realtime, &config.audio),
            endpoint: config.realtime.endpoint.clone(),
            conversation_id: None,
            plant_id: None,
            state: CallState::Idle,
            socket: None,
            transcript: Vec::new(),
            pending_assistant: String::new(),
            assistant_speaking: false,
            flushed: false,
            events,
        }
    }

    pub fn with_conversation(mut self, id: ConversationId) -> Self {
        self.conversation_id = Some(id);
        self
    }

    pub fn with_plant(mut self, id: i64) -> Self {
        self.plant_id = Some(id);
        self
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn transcript(&self) -> &[TranscriptTurn] {
        &self.transcript
    }

    /// Run the connect sequence: permission, credential, socket, configure.
    ///
    /// On failure the session lands in [`CallState::Error`] with a
    /// user-facing message published; the caller may retry by calling this
    /// again.
    pub async fn start_call(&mut self) -> Result<(), CallError> {
        match self.state {
            CallState::Idle | CallState::Error => {}
            _ => return Ok(()),
        }

        // A retried call starts from a clean slate.
        self.transcript.clear();
        self.pending_assistant.clear();
        self.assistant_speaking = false;
        self.flushed = false;

        if let Err(err) = self.connect().await {
            self.fail(&err);
            return Err(err);
        }
        Ok(())
    }

    async fn connect(&mut self) -> Result<(), CallError> {
        self.set_state(CallState::RequestingPermission);
        self.mic.check_access()?;

        self.set_state(CallState::GettingToken);
        let credential = self
            .api
            .fetch_realtime_token(self.conversation_id, self.plant_id)
            .await?;

        self.set_state(CallState::Connecting);
        let mut endpoint = url::Url::parse(&self.endpoint)
            .map_err(|e| CallError::Connect(format!("bad endpoint {}: {e}", self.endpoint)))?;
        endpoint
            .query_pairs_mut()
            .append_pair("model", &self.settings.model);

        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| CallError::Connect(e.to_string()))?;
        let protocols = format!(
            "realtime, openai-insecure-api-key.{}, openai-beta.realtime-v1",
            credential.secret
        );
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            protocols
                .parse()
                .map_err(|_| CallError::Connect("credential is not header-safe".to_string()))?,
        );

        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| CallError::Connect(e.to_string()))?;
        self.socket = Some(socket);
        debug!("realtime socket connected");

        let configure = self.settings.configure_payload().to_string();
        let sent = match self.socket.as_mut() {
            Some(socket) => socket.send(Message::Text(configure.into())).await,
            None => return Err(CallError::Connect("socket closed before configuration".to_string())),
        };
        if let Err(e) = sent {
            self.socket = None;
            return Err(CallError::Connect(format!("session configuration failed: {e}")));
        }

        self.set_state(CallState::Ready);
        Ok(())
    }

    /// Drive the call until hangup or socket termination. Returns
    /// immediately when there is no open socket (connect failed).
    pub async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<CallCommand>) {
        loop {
            let Some(socket) = self.socket.as_mut() else {
                break;
            };

            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                inbound = socket.next() => Step::Inbound(inbound),
            };

            match step {
                Step::Command(Some(CallCommand::BeginUtterance)) => self.begin_utterance(),
                Step::Command(Some(CallCommand::CommitUtterance)) => {
                    self.commit_utterance().await
                }
                Step::Command(Some(CallCommand::HangUp)) | Step::Command(None) => {
                    self.hang_up().await;
                    break;
                }
                Step::Inbound(Some(Ok(Message::Text(text)))) => {
                    self.handle_server_event(text.as_str())
                }
                Step::Inbound(Some(Ok(Message::Close(_)))) | Step::Inbound(None) => {
                    self.socket_closed(None).await;
                    break;
                }
                Step::Inbound(Some(Err(e))) => {
                    self.socket_closed(Some(e.to_string())).await;
                    break;
                }
                // Binary audio frames belong to the platform player; pings
                // are answered by the transport.
                Step::Inbound(Some(Ok(_))) => {}
            }
        }
    }

    /// Start capturing the user's next utterance. Only meaningful during
    /// an established call; anywhere else this is a guarded no-op.
    fn begin_utterance(&mut self) {
        if !matches!(self.state, CallState::Ready | CallState::InCall) {
            debug!(state = ?self.state, "ignoring begin_utterance outside an active call");
            return;
        }
        if let Err(err) = self.mic.start() {
            let _ = self.events.send(CallEvent::Failed(err.to_string()));
        }
    }

    /// Stop the recording and send append/commit/response-request in order.
    ///
    /// The stop-and-encode hop is an asynchronous gap: the socket may have
    /// gone away meanwhile, in which case the payload is dropped silently.
    async fn commit_utterance(&mut self) {
        if !matches!(self.state, CallState::Ready | CallState::InCall) {
            return;
        }

        // Stopping with no active recording is a no-op.
        let Some(audio) = self.mic.stop() else {
            return;
        };

        let payload = if self.settings.input_audio_format == "wav" {
            match audio.to_wav_base64() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "dropping utterance that failed to encode");
                    return;
                }
            }
        } else {
            audio.to_pcm16_base64()
        };

        let append =
            serde_json::json!({ "type": "input_audio_buffer.append", "audio": payload }).to_string();
        let commit = serde_json::json!({ "type": "input_audio_buffer.commit" }).to_string();
        let respond = serde_json::json!({ "type": "response.create" }).to_string();

        let mut send_failure = None;
        match self.socket.as_mut() {
            Some(socket) => {
                for frame in [append, commit, respond] {
                    if let Err(e) = socket.send(Message::Text(frame.into())).await {
                        send_failure = Some(e.to_string());
                        break;
                    }
                }
            }
            None => {
                warn!("socket closed while encoding utterance; dropping audio");
                return;
            }
        }

        if let Some(reason) = send_failure {
            self.socket_closed(Some(reason)).await;
            return;
        }
        self.set_state(CallState::InCall);
    }

    /// End the call. Safe to invoke in any state, any number of times;
    /// only the first call performs the flush-and-sync work.
    pub async fn hang_up(&mut self) {
        self.finish_call().await;
        self.set_state(CallState::Idle);
    }

    /// The transport ended the call rather than the user.
    async fn socket_closed(&mut self, reason: Option<String>) {
        let already_failed = self.state == CallState::Error;
        self.socket = None;

        match reason {
            Some(reason) => {
                let err = CallError::Socket(reason);
                let _ = self.events.send(CallEvent::Failed(err.to_string()));
                self.finish_call().await;
                self.set_state(CallState::Error);
            }
            None => {
                // Same flush/sync as a hangup, unless the session already
                // failed and reported it.
                self.finish_call().await;
                if !already_failed {
                    self.set_state(CallState::Idle);
                }
            }
        }
    }

    /// Release call resources and flush the transcript, exactly once.
    async fn finish_call(&mut self) {
        if self.flushed {
            return;
        }
        self.flushed = true;

        // Any in-flight recording is force-stopped; its audio has nowhere
        // to go once the call is over.
        let _ = self.mic.stop();
        self.flush_pending();
        self.set_speaking(false);

        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }

        if !self.transcript.is_empty() {
            if let Err(e) = self
                .api
                .sync_transcript(self.conversation_id, &self.transcript)
                .await
            {
                // Losing a transcript write must not keep the user on the
                // call screen.
                warn!(error = %e, "transcript sync failed");
            }
        }
    }

    /// Move a non-empty pending assistant fragment into the transcript.
    fn flush_pending(&mut self) {
        if !self.pending_assistant.is_empty() {
            let content = std::mem::take(&mut self.pending_assistant);
            self.transcript.push(TranscriptTurn::new(Role::Assistant, content));
        }
    }

    fn handle_server_event(&mut self, raw: &str) {
        match parse_server_event(raw) {
            ServerEvent::SpeakingStarted => self.set_speaking(true),
            ServerEvent::SpeakingStopped => self.set_speaking(false),
            ServerEvent::AssistantTextDelta(delta) => {
                self.pending_assistant.push_str(&delta);
                let _ = self.events.send(CallEvent::AssistantText(delta));
            }
            ServerEvent::AssistantTurnComplete => {
                self.flush_pending();
                self.set_speaking(false);
            }
            ServerEvent::UserTranscriptCompleted(text) => {
                self.transcript.push(TranscriptTurn::new(Role::User, text.clone()));
                let _ = self.events.send(CallEvent::UserTranscript(text));
            }
            ServerEvent::Error(message) => {
                // In-band errors are recoverable; only the socket's own
                // close or error ends the call.
                let _ = self.events.send(CallEvent::Failed(message));
            }
            ServerEvent::Ignored => {}
        }
    }

    fn set_speaking(&mut self, speaking: bool) {
        if self.assistant_speaking != speaking {
            self.assistant_speaking = speaking;
            let _ = self.events.send(CallEvent::AssistantSpeaking(speaking));
        }
    }

    fn set_state(&mut self, next: CallState) {
        if self.state != next {
            self.state = next;
            let _ = self.events.send(CallEvent::State(next));
        }
    }

    fn fail(&mut self, err: &CallError) {
        let _ = self.events.send(CallEvent::Failed(err.to_string()));
        self.set_state(CallState::Error);
    }
}
