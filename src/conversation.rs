//! Per-conversation chat history.
//!
//! A [`ConversationLog`] is an append-only list of [`Turn`]s. The
//! [`ConversationRegistry`] hands out one lock per conversation; a chat
//! request holds that lock from the user turn through the assistant turn, so
//! concurrent requests on the same conversation cannot interleave.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DocChatError, Result};

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", content = "text", rename_all = "lowercase")]
pub enum Turn {
    User(String),
    #[serde(rename = "bot")]
    Assistant(String),
}

impl Turn {
    pub fn text(&self) -> &str {
        match self {
            Turn::User(text) | Turn::Assistant(text) => text,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ConversationLog {
    turns: Vec<Turn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_user(&mut self, text: impl Into<String>) -> &mut Self {
        self.turns.push(Turn::User(text.into()));
        self
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) -> &mut Self {
        self.turns.push(Turn::Assistant(text.into()));
        self
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// A conversation opened by an upload.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    /// Index snapshot published by the upload that opened the conversation.
    pub index_version: String,
    pub log: ConversationLog,
}

/// In-memory map of live conversations.
#[derive(Default)]
pub struct ConversationRegistry {
    conversations: RwLock<HashMap<String, Arc<Mutex<Conversation>>>>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new, empty conversation and return its id.
    pub async fn open(&self, index_version: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let conversation = Conversation {
            id: id.clone(),
            index_version: index_version.to_string(),
            log: ConversationLog::new(),
        };
        self.conversations
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(conversation)));
        debug!(conversation_id = %id, index_version, "opened conversation");
        id
    }

    /// Look up a conversation; lock the returned handle for the whole request.
    pub async fn get(&self, id: &str) -> Result<Arc<Mutex<Conversation>>> {
        self.conversations
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DocChatError::UnknownConversation(id.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conversations.read().await.is_empty()
    }
}
