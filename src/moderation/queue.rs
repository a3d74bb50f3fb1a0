use crate::identity::role::{trust_label, Permission, RoleError, TrustLabel, TrustRoleModel};
use crate::moderation::item::{ContentType, ItemStatus, ModerationItem, Priority};
use log::{debug, info};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ModerationError {
    #[error("Permission denied: {0} required")]
    PermissionDenied(Permission),

    #[error("Moderation item not found: {0}")]
    NotFound(Uuid),

    #[error("Item {0} is already resolved")]
    AlreadyResolved(Uuid),

    #[error(transparent)]
    Role(#[from] RoleError),
}

/// The three moderation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationAction {
    Approve,
    Reject,
    Escalate,
}

impl fmt::Display for ModerationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModerationAction::Approve => write!(f, "approve"),
            ModerationAction::Reject => write!(f, "reject"),
            ModerationAction::Escalate => write!(f, "escalate"),
        }
    }
}

/// Optional status/priority narrowing for queue listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModerationFilter {
    pub status: Option<ItemStatus>,
    pub priority: Option<Priority>,
}

/// Per-item results of a bulk action. One item failing never hides the
/// others succeeding.
#[derive(Debug, Clone, Default)]
pub struct BulkOutcome {
    /// Items the action applied to
    pub succeeded: Vec<Uuid>,

    /// Items it did not, with the reason
    pub failed: Vec<(Uuid, String)>,
}

/// Community-flag thresholds that bump an item's priority.
const FLAG_COUNT_RAISE: u32 = 3;
const FLAG_COUNT_URGENT: u32 = 5;

/// The moderation queue: intake of flagged content, prioritized
/// listings, and permission-gated approve/reject/escalate transitions.
///
/// The queue snapshot lives behind one async lock, so an action on an
/// item holds the lock across its status check and write; two
/// concurrent resolvers of the same item cannot both succeed.
pub struct ModerationQueueEngine {
    /// Permission gate and trust labeling
    roles: TrustRoleModel,

    /// Current queue snapshot
    items: Mutex<HashMap<Uuid, ModerationItem>>,
}

impl ModerationQueueEngine {
    /// Creates an empty queue gated by the given role model.
    pub fn new(roles: TrustRoleModel) -> Self {
        Self {
            roles,
            items: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a queue over an existing snapshot, e.g. one fetched from
    /// the platform API.
    pub fn with_items(roles: TrustRoleModel, snapshot: Vec<ModerationItem>) -> Self {
        let items = snapshot.into_iter().map(|item| (item.id, item)).collect();
        Self {
            roles,
            items: Mutex::new(items),
        }
    }

    /// Files a flag against content, either creating a queue item or
    /// bumping the flag count of the existing unresolved one. Repeated
    /// community flags raise the item's priority, saturating at urgent.
    pub async fn flag_content(
        &self,
        content_type: ContentType,
        content_id: &str,
        author_id: Uuid,
        author_trust_score: f64,
        flag_reason: &str,
    ) -> ModerationItem {
        let mut items = self.items.lock().await;

        let existing = items.values_mut().find(|item| {
            item.content_type == content_type
                && item.content_id == content_id
                && !item.status.is_terminal()
        });

        if let Some(item) = existing {
            item.community_flag_count += 1;
            if item.community_flag_count >= FLAG_COUNT_URGENT {
                item.priority = Priority::Urgent;
            } else if item.community_flag_count >= FLAG_COUNT_RAISE {
                item.priority = item.priority.raised();
            }
            debug!(
                "Content {} reflagged, {} flags, priority {}",
                content_id, item.community_flag_count, item.priority
            );
            return item.clone();
        }

        // Lower-trust authors enter the queue higher up
        let priority = match trust_label(author_trust_score) {
            TrustLabel::Low => Priority::High,
            TrustLabel::Medium => Priority::Normal,
            TrustLabel::High => Priority::Low,
        };

        let item = ModerationItem::new(
            content_type,
            content_id.to_string(),
            author_id,
            author_trust_score,
            priority,
            flag_reason.to_string(),
        );

        info!(
            "Flagged {} {} by {} ({}), priority {}",
            content_type, content_id, author_id, flag_reason, priority
        );

        items.insert(item.id, item.clone());
        item
    }

    /// Items matching the filter, ordered by priority rank and then age.
    pub async fn list(&self, filter: ModerationFilter) -> Vec<ModerationItem> {
        let items = self.items.lock().await;

        let mut matching: Vec<ModerationItem> = items
            .values()
            .filter(|item| {
                filter.status.map_or(true, |status| item.status == status)
                    && filter
                        .priority
                        .map_or(true, |priority| item.priority == priority)
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then(a.created_at.cmp(&b.created_at))
        });

        matching
    }

    /// One item by id.
    pub async fn get(&self, item_id: Uuid) -> Option<ModerationItem> {
        self.items.lock().await.get(&item_id).cloned()
    }

    /// Trust bucket shown beside an item. Context for the moderator,
    /// never an input to the permission check.
    pub fn author_trust_label(&self, item: &ModerationItem) -> TrustLabel {
        trust_label(item.author_trust_score)
    }

    /// Approves an item.
    pub async fn approve(
        &self,
        actor: Uuid,
        item_id: Uuid,
        notes: &str,
    ) -> Result<ModerationItem, ModerationError> {
        self.apply(actor, item_id, ModerationAction::Approve, notes)
            .await
    }

    /// Rejects an item.
    pub async fn reject(
        &self,
        actor: Uuid,
        item_id: Uuid,
        notes: &str,
    ) -> Result<ModerationItem, ModerationError> {
        self.apply(actor, item_id, ModerationAction::Reject, notes)
            .await
    }

    /// Escalates an item, raising its priority toward urgent. Allowed
    /// from pending or escalated; re-escalation adds notes.
    pub async fn escalate(
        &self,
        actor: Uuid,
        item_id: Uuid,
        notes: &str,
    ) -> Result<ModerationItem, ModerationError> {
        self.apply(actor, item_id, ModerationAction::Escalate, notes)
            .await
    }

    /// Applies one action to each id independently. An item that cannot
    /// take the action lands in `failed` with its reason; the rest of
    /// the batch still runs.
    pub async fn bulk_apply(
        &self,
        actor: Uuid,
        item_ids: &[Uuid],
        action: ModerationAction,
        notes: &str,
    ) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();

        for &item_id in item_ids {
            match self.apply(actor, item_id, action, notes).await {
                Ok(_) => outcome.succeeded.push(item_id),
                Err(e) => outcome.failed.push((item_id, e.to_string())),
            }
        }

        info!(
            "Bulk {}: {} succeeded, {} failed",
            action,
            outcome.succeeded.len(),
            outcome.failed.len()
        );

        outcome
    }

    async fn apply(
        &self,
        actor: Uuid,
        item_id: Uuid,
        action: ModerationAction,
        notes: &str,
    ) -> Result<ModerationItem, ModerationError> {
        if !self
            .roles
            .check_permission(actor, Permission::ApproveContent)?
        {
            return Err(ModerationError::PermissionDenied(Permission::ApproveContent));
        }

        let mut items = self.items.lock().await;

        let item = items
            .get_mut(&item_id)
            .ok_or(ModerationError::NotFound(item_id))?;

        if item.status.is_terminal() {
            return Err(ModerationError::AlreadyResolved(item_id));
        }

        // Resolving an escalated item takes an admin; escalating again
        // does not.
        if item.status == ItemStatus::Escalated
            && action != ModerationAction::Escalate
            && !self
                .roles
                .check_permission(actor, Permission::ManagePlatform)?
        {
            return Err(ModerationError::PermissionDenied(Permission::ManagePlatform));
        }

        match action {
            ModerationAction::Approve => item.status = ItemStatus::Approved,
            ModerationAction::Reject => item.status = ItemStatus::Rejected,
            ModerationAction::Escalate => {
                item.status = ItemStatus::Escalated;
                item.priority = item.priority.raised();
            }
        }

        item.record_action(actor, &action.to_string(), notes);

        info!("{} applied {} to item {}", actor, action, item_id);

        Ok(item.clone())
    }
}
