//! Failure taxonomy for the conversation client.

use thiserror::Error;

/// Failures surfaced by the voice-call and capture paths.
///
/// Every variant is recoverable from the user's point of view: the call
/// screen shows the message and the user may simply retry the call.
/// `Display` output is what the UI renders, so messages stay human-readable
/// and never include secrets.
#[derive(Debug, Error)]
pub enum CallError {
    /// Microphone access denied, or no usable input device.
    #[error("microphone access is not available: {0}")]
    Permission(String),

    /// The recorder could not start, stop, or encode a capture.
    #[error("audio capture failed: {0}")]
    Capture(String),

    /// The ephemeral credential could not be obtained.
    #[error("could not start the voice session: {0}")]
    Credential(String),

    /// The socket failed to open, or closed before the session became ready.
    #[error("could not connect to the voice service: {0}")]
    Connect(String),

    /// The open socket failed mid-call.
    #[error("voice connection lost: {0}")]
    Socket(String),
}
