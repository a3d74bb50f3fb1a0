mod item;
mod queue;

pub use item::{ActionNote, ContentType, ItemStatus, ModerationItem, Priority};
pub use queue::{
    BulkOutcome, ModerationAction, ModerationError, ModerationFilter, ModerationQueueEngine,
};

/*
 * Moderation queue for Agora
 *
 * Flagged content enters here and waits for a moderator. Ordering and
 * trust labels come from the author's reputation; the actions
 * themselves are gated purely by role tier.
 */
