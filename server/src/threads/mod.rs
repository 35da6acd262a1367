//! Conversation thread detection over a user's mailbox

pub mod detector;
pub mod normalize;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadType {
    SingleMessage,
    Conversation,
    Announcement,
    FollowUpChain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    AwaitingReply,
    Resolved,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ThreadEventKind {
    Started,
    Reply,
    ParticipantJoined(String),
    SubjectChanged(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEvent {
    pub email_id: i32,
    pub at: DateTime<FixedOffset>,
    pub kind: ThreadEventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailThread {
    pub id: String,
    pub normalized_subject: String,
    pub email_ids: Vec<i32>,
    pub participants: Vec<String>,
    pub started_at: DateTime<FixedOffset>,
    pub last_activity: DateTime<FixedOffset>,
    pub message_count: usize,
    pub thread_type: ThreadType,
    pub priority: ThreadPriority,
    pub status: ThreadStatus,
    pub evolution: Vec<ThreadEvent>,
}
