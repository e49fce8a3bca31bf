use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnRole::User => write!(f, "User"),
            TurnRole::Assistant => write!(f, "Assistant"),
        }
    }
}

impl fmt::Display for ChatTurn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

// helper function to format a window of turns for prompt assembly
pub fn format_window(turns: &[ChatTurn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{turn}"))
        .collect::<Vec<String>>()
        .join("\n")
}

/// Process-wide rolling window of prior turns per conversation. Appends to
/// one conversation are serialised; nothing is persisted.
pub struct ConversationMemory {
    max_turns: usize,
    conversations: Mutex<HashMap<String, VecDeque<ChatTurn>>>,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub async fn window(&self, conversation_id: &str) -> Vec<ChatTurn> {
        let conversations = self.conversations.lock().await;
        conversations
            .get(conversation_id)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn append(&self, conversation_id: &str, role: TurnRole, content: impl Into<String>) {
        let mut conversations = self.conversations.lock().await;
        let turns = conversations
            .entry(conversation_id.to_string())
            .or_default();
        turns.push_back(ChatTurn {
            role,
            content: content.into(),
        });
        while turns.len() > self.max_turns {
            turns.pop_front();
        }
    }
}
