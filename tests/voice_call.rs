//! Realtime voice-call integration tests against local mock servers.
//!
//! The credential endpoint is a scripted HTTP responder and the speech
//! model is a scripted WebSocket peer, so the full call state machine runs
//! without touching the network.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use floratalk::api::BackendClient;
use floratalk::audio::{CapturedAudio, MicCapture};
use floratalk::config::Config;
use floratalk::conversation::Role;
use floratalk::error::CallError;
use floratalk::realtime::{
    CallCommand, CallEvent, CallState, RealtimeVoiceSession, TranscriptTurn,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

struct ScriptedMic {
    recording: bool,
}

impl ScriptedMic {
    fn new() -> Self {
        Self { recording: false }
    }
}

impl MicCapture for ScriptedMic {
    fn check_access(&self) -> Result<(), CallError> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), CallError> {
        self.recording = true;
        Ok(())
    }

    fn stop(&mut self) -> Option<CapturedAudio> {
        if self.recording {
            self.recording = false;
            Some(CapturedAudio {
                samples: vec![128; 320],
                sample_rate: 16_000,
            })
        } else {
            None
        }
    }

    fn is_recording(&self) -> bool {
        self.recording
    }
}

/// Answer one HTTP request on the listener with a realtime credential.
async fn serve_credential_once(listener: TcpListener) {
    if let Ok((mut stream, _)) = listener.accept().await {
        let mut buf = [0u8; 8192];
        let _ = stream.read(&mut buf).await;
        let body = r#"{"secret":"test-credential"}"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Option<Value> {
    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

async fn test_config() -> (Config, TcpListener, TcpListener) {
    let token_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let mut config = Config::default();
    config.api.base_url = format!("http://{}", token_listener.local_addr().unwrap());
    config.realtime.endpoint = format!("ws://{}", ws_listener.local_addr().unwrap());

    (config, token_listener, ws_listener)
}

fn drain(events: &mut mpsc::UnboundedReceiver<CallEvent>) -> Vec<CallEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn close_before_ready_lands_in_error_and_sends_no_audio() {
    let (config, token_listener, ws_listener) = test_config().await;
    tokio::spawn(serve_credential_once(token_listener));

    // The "speech model" drops every connection before the handshake
    // completes.
    tokio::spawn(async move {
        while let Ok((stream, _)) = ws_listener.accept().await {
            drop(stream);
        }
    });

    let api = BackendClient::from_config(&config.api);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut session =
        RealtimeVoiceSession::new(api, Box::new(ScriptedMic::new()), &config, events_tx);

    let result = tokio::time::timeout(TEST_TIMEOUT, session.start_call())
        .await
        .unwrap();
    assert!(matches!(result, Err(CallError::Connect(_))));
    assert_eq!(session.state(), CallState::Error);

    // With no socket, the call loop exits immediately; a queued commit is
    // never acted on, so no audio is ever sent.
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    commands_tx.send(CallCommand::CommitUtterance).unwrap();
    tokio::time::timeout(TEST_TIMEOUT, session.run(commands_rx))
        .await
        .unwrap();

    assert_eq!(session.state(), CallState::Error);
    assert!(session.transcript().is_empty());

    let events = drain(&mut events_rx);
    assert!(events.contains(&CallEvent::State(CallState::Connecting)));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, CallEvent::Failed(msg) if msg.contains("connect")))
    );
}

#[tokio::test]
async fn full_call_commits_audio_and_collects_transcript() {
    let (config, token_listener, ws_listener) = test_config().await;
    tokio::spawn(serve_credential_once(token_listener));

    let server = tokio::spawn(async move {
        let (stream, _) = ws_listener.accept().await.unwrap();
        // Echo back one of the client's offered subprotocols so the
        // tungstenite client handshake completes (0.28 fails the connection
        // when a subprotocol was requested but the server selects none).
        let echo_subprotocol =
            |_req: &tokio_tungstenite::tungstenite::handshake::server::Request,
             mut response: tokio_tungstenite::tungstenite::handshake::server::Response| {
                response.headers_mut().insert(
                    "Sec-WebSocket-Protocol",
                    "realtime".parse().unwrap(),
                );
                Ok(response)
            };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, echo_subprotocol)
            .await
            .unwrap();

        // The first outbound message must configure the session.
        let configure = next_text(&mut ws).await.unwrap();
        assert_eq!(configure["type"], "session.update");
        assert_eq!(configure["session"]["input_audio_format"], "pcm16");

        for event in [
            r#"{"type":"output_audio_buffer.started"}"#,
            r#"{"type":"response.audio_transcript.delta","delta":"Hello"}"#,
            r#"{"type":"response.audio_transcript.delta","delta":" there"}"#,
            r#"{"type":"response.done"}"#,
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"can you hear me"}"#,
        ] {
            ws.send(Message::Text(event.to_string().into())).await.unwrap();
        }

        // The commit sequence arrives in order.
        let append = next_text(&mut ws).await.unwrap();
        assert_eq!(append["type"], "input_audio_buffer.append");
        assert!(append["audio"].as_str().is_some_and(|a| !a.is_empty()));
        let commit = next_text(&mut ws).await.unwrap();
        assert_eq!(commit["type"], "input_audio_buffer.commit");
        let respond = next_text(&mut ws).await.unwrap();
        assert_eq!(respond["type"], "response.create");

        ws.close(None).await.unwrap();
    });

    let api = BackendClient::from_config(&config.api);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut session = RealtimeVoiceSession::new(api, Box::new(ScriptedMic::new()), &config, events_tx)
        .with_conversation(11);

    tokio::time::timeout(TEST_TIMEOUT, session.start_call())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.state(), CallState::Ready);

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    commands_tx.send(CallCommand::BeginUtterance).unwrap();
    commands_tx.send(CallCommand::CommitUtterance).unwrap();

    // The server hangs up after the commit sequence; the session flushes
    // and returns to idle on its own.
    tokio::time::timeout(TEST_TIMEOUT, session.run(commands_rx))
        .await
        .unwrap();
    tokio::time::timeout(TEST_TIMEOUT, server).await.unwrap().unwrap();

    assert_eq!(session.state(), CallState::Idle);
    assert_eq!(
        session.transcript(),
        &[
            TranscriptTurn::new(Role::Assistant, "Hello there"),
            TranscriptTurn::new(Role::User, "can you hear me"),
        ]
    );

    let events = drain(&mut events_rx);
    assert!(events.contains(&CallEvent::State(CallState::Ready)));
    assert!(events.contains(&CallEvent::State(CallState::InCall)));
    assert!(events.contains(&CallEvent::AssistantSpeaking(true)));
    assert!(events.contains(&CallEvent::UserTranscript("can you hear me".to_string())));
}
