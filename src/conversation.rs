//! In-memory conversation state for the chat screens.
//!
//! The store owns every conversation the app has open and is the single
//! place streaming deltas get merged into a message. Persistence lives on
//! the backend; this layer only has to keep the visible state consistent
//! while a reply streams in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub type ConversationId = i64;

/// Conversation id used before the backend has assigned a real one.
pub const UNSAVED_CONVERSATION: ConversationId = -1;

const DEFAULT_TITLE: &str = "New conversation";

/// Speaker of a message or transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in a conversation. `content` is append-only while a reply
/// streams and fixed once the stream finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self::with_id(generate_message_id(), role, content)
    }

    pub fn with_id(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A conversation and its ordered messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    fn new(id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Identifies which message is receiving deltas while a stream is in
/// flight. Discarded on completion or error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingCursor {
    pub conversation_id: ConversationId,
    pub message_id: String,
}

/// Ordered collection of open conversations.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: ConversationId) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    /// Conversations sorted most-recently-updated first, for list screens.
    pub fn recent(&self) -> Vec<&Conversation> {
        let mut all: Vec<_> = self.conversations.iter().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all
    }

    fn ensure(&mut self, id: ConversationId) -> &mut Conversation {
        if let Some(index) = self.conversations.iter().position(|c| c.id == id) {
            return &mut self.conversations[index];
        }
        self.conversations.push(Conversation::new(id));
        let last = self.conversations.len() - 1;
        &mut self.conversations[last]
    }

    /// Append a message at the end of a conversation, creating the
    /// conversation if needed.
    pub fn append_message(&mut self, conversation_id: ConversationId, message: Message) {
        let conversation = self.ensure(conversation_id);
        conversation.messages.push(message);
        conversation.touch();
    }

    /// Merge a streaming delta into the tracked message.
    ///
    /// `content` is the cumulative reply so far, not a delta: when the
    /// conversation's last message carries `streaming_id` its content is
    /// replaced wholesale, otherwise a new assistant message is appended
    /// with that id. Repeated calls with a growing cumulative string
    /// therefore leave exactly one message holding the final text.
    pub fn update_streaming_message(
        &mut self,
        conversation_id: ConversationId,
        streaming_id: &str,
        content: &str,
    ) {
        let conversation = self.ensure(conversation_id);
        if let Some(last) = conversation.messages.last_mut() {
            if last.id == streaming_id {
                last.content = content.to_string();
                conversation.touch();
                return;
            }
        }
        conversation
            .messages
            .push(Message::with_id(streaming_id, Role::Assistant, content));
        conversation.touch();
    }

    /// Rebind the unsaved sentinel (or any stale id) to the id the backend
    /// assigned after the first round-trip. Returns false if no such
    /// conversation exists or the target id is already taken.
    pub fn adopt_conversation_id(&mut self, from: ConversationId, to: ConversationId) -> bool {
        if from == to || self.get(to).is_some() {
            return false;
        }
        match self.get_mut(from) {
            Some(conversation) => {
                conversation.id = to;
                conversation.touch();
                true
            }
            None => false,
        }
    }

    pub fn rename(&mut self, id: ConversationId, title: impl Into<String>) -> bool {
        match self.get_mut(id) {
            Some(conversation) => {
                conversation.title = title.into();
                conversation.touch();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: ConversationId) -> Option<Conversation> {
        let index = self.conversations.iter().position(|c| c.id == id)?;
        Some(self.conversations.remove(index))
    }
}

/// Generate a locally unique message id.
fn generate_message_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{:x}", timestamp)
}
