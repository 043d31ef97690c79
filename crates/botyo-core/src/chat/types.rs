use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{MessageId, ParticipantId, ThreadId};

/// An inbound (or historical) chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub thread_id: ThreadId,
    pub sender_id: ParticipantId,
    pub message_id: MessageId,
    pub body: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Message {
    pub fn new(
        thread_id: impl Into<ThreadId>,
        sender_id: impl Into<ParticipantId>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            sender_id: sender_id.into(),
            message_id: MessageId::default(),
            body: body.into(),
            timestamp: 0,
        }
    }

    pub fn with_id(mut self, message_id: impl Into<MessageId>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThreadInfo {
    pub name: Option<String>,
    pub participant_ids: Vec<ParticipantId>,
    pub nicknames: HashMap<ParticipantId, String>,
    pub message_count: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub name: String,
    pub first_name: String,
    pub vanity: Option<String>,
}

/// One hit of a user lookup by name or vanity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserIdSearchResult {
    pub user_id: ParticipantId,
    pub name: String,
    pub profile_url: Option<String>,
    /// `user`, `page`, `group`, ... as reported by the transport.
    pub kind: String,
}

impl UserIdSearchResult {
    pub fn is_user(&self) -> bool {
        self.kind == "user"
    }
}
