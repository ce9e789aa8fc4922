//! floratalk — conversation client for the Flora plant-care assistant.
//!
//! Two paths into the assistant:
//! - **streaming text chat** over a chunked HTTP body ([`streaming`]),
//!   merged into the in-memory [`conversation::ConversationStore`];
//! - **realtime voice calls** over a WebSocket to the speech model
//!   ([`realtime`]), with microphone capture ([`audio`]) and end-of-call
//!   transcript sync ([`api`]).
//!
//! ## Example: stream a reply into the store
//!
//! ```rust,no_run
//! use floratalk::conversation::{ConversationStore, Message, Role, StreamingCursor};
//! use floratalk::streaming::{ChatStreamRequest, StreamChunk, stream_chat};
//! use tokio::sync::mpsc;
//!
//! # async fn example() {
//! let http = reqwest::Client::new();
//! let mut store = ConversationStore::new();
//! store.append_message(7, Message::new(Role::User, "Why are the leaves yellow?"));
//!
//! let request = ChatStreamRequest {
//!     base_url: "https://api.floragarden.app/v1".to_string(),
//!     access_token: None,
//!     message: "Why are the leaves yellow?".to_string(),
//!     conversation_id: Some(7),
//!     plant_id: None,
//! };
//!
//! let (tx, mut rx) = mpsc::channel(32);
//! tokio::spawn(async move { stream_chat(&http, &request, tx).await });
//!
//! let cursor = StreamingCursor { conversation_id: 7, message_id: "reply-1".to_string() };
//! let mut reply = String::new();
//! while let Some(chunk) = rx.recv().await {
//!     match chunk {
//!         StreamChunk::Text(delta) => {
//!             reply.push_str(&delta);
//!             store.update_streaming_message(cursor.conversation_id, &cursor.message_id, &reply);
//!         }
//!         StreamChunk::Done => break,
//!         StreamChunk::Error(message) => {
//!             eprintln!("stream failed: {message}");
//!             break;
//!         }
//!     }
//! }
//! # }
//! ```

pub mod api;
pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod realtime;
pub mod retry;
pub mod streaming;

pub use error::CallError;
