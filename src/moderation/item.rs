use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What kind of content was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    /// A community post
    Post,

    /// A learning-module submission
    Submission,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentType::Post => write!(f, "post"),
            ContentType::Submission => write!(f, "submission"),
        }
    }
}

/// Queue priority. Lower rank sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Urgent = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Priority {
    /// Display ordering rank: urgent 0, high 1, normal 2, low 3.
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// One step more urgent, saturating at Urgent.
    pub fn raised(&self) -> Priority {
        match self {
            Priority::Low => Priority::Normal,
            Priority::Normal => Priority::High,
            Priority::High | Priority::Urgent => Priority::Urgent,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Urgent => write!(f, "urgent"),
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Lifecycle state of a flagged item. `Approved` and `Rejected` are
/// terminal; `Escalated` is re-entrant and raises the bar for resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    Pending,
    Approved,
    Rejected,
    Escalated,
}

impl ItemStatus {
    /// Whether the item can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Approved | ItemStatus::Rejected)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "pending"),
            ItemStatus::Approved => write!(f, "approved"),
            ItemStatus::Rejected => write!(f, "rejected"),
            ItemStatus::Escalated => write!(f, "escalated"),
        }
    }
}

/// One moderator action recorded against an item. The trail is
/// append-only; repeated escalations keep adding entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionNote {
    /// Who acted
    pub actor: Uuid,

    /// What they did ("approve", "reject", "escalate")
    pub action: String,

    /// Their notes
    pub notes: String,

    /// When
    pub at: DateTime<Utc>,
}

/// A flagged piece of content awaiting a moderation decision. Owned by
/// the moderation subsystem; content components only hold its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationItem {
    /// Queue-item id
    pub id: Uuid,

    /// Kind of flagged content
    pub content_type: ContentType,

    /// Id of the content in its own subsystem
    pub content_id: String,

    /// Author of the flagged content
    pub author_id: Uuid,

    /// Author's trust score at flag time; labels the row for
    /// moderators, never gates an action
    pub author_trust_score: f64,

    /// Current queue priority
    pub priority: Priority,

    /// Lifecycle state
    pub status: ItemStatus,

    /// Why the item was flagged
    pub flag_reason: String,

    /// How many community reports the content has drawn
    pub community_flag_count: u32,

    /// When the item entered the queue
    pub created_at: DateTime<Utc>,

    /// Append-only trail of moderator actions
    pub resolution_notes: Vec<ActionNote>,
}

impl ModerationItem {
    /// Creates a pending item for freshly flagged content.
    pub fn new(
        content_type: ContentType,
        content_id: String,
        author_id: Uuid,
        author_trust_score: f64,
        priority: Priority,
        flag_reason: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            content_type,
            content_id,
            author_id,
            author_trust_score,
            priority,
            status: ItemStatus::Pending,
            flag_reason,
            community_flag_count: 1,
            created_at: Utc::now(),
            resolution_notes: Vec::new(),
        }
    }

    /// Appends an action to the trail.
    pub fn record_action(&mut self, actor: Uuid, action: &str, notes: &str) {
        self.resolution_notes.push(ActionNote {
            actor,
            action: action.to_string(),
            notes: notes.to_string(),
            at: Utc::now(),
        });
    }
}
