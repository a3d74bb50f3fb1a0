//! Integration tests for the moderation queue.
//!
//! These tests verify priority derivation from trust labels, permission
//! gating of actions, terminal-state protection, escalation semantics,
//! and the partial-success behavior of bulk operations.

use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

use agora_core::identity::{RoleRecord, RoleTier, TrustLabel, TrustRoleModel};
use agora_core::moderation::{
    ContentType, ItemStatus, ModerationAction, ModerationError, ModerationFilter,
    ModerationQueueEngine, Priority,
};
use agora_core::storage::{Database, IdentityStore};

struct Fixture {
    _dir: TempDir,
    queue: ModerationQueueEngine,
    moderator: Uuid,
    admin: Uuid,
    anonymous: Uuid,
}

fn new_fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db = Database::open(dir.path().join("db")).expect("Failed to open database");
    let store = IdentityStore::new(&db).expect("Failed to create store");

    let moderator = Uuid::new_v4();
    let admin = Uuid::new_v4();
    for (id, tier) in [(moderator, RoleTier::Moderator), (admin, RoleTier::Admin)] {
        store
            .save_role(
                &id,
                &RoleRecord {
                    tier,
                    granted_by: None,
                    granted_reason: "seeded".to_string(),
                    granted_at: Utc::now(),
                },
            )
            .unwrap();
    }

    let roles = TrustRoleModel::new(store, false);
    let queue = ModerationQueueEngine::new(roles);

    Fixture {
        _dir: dir,
        queue,
        moderator,
        admin,
        anonymous: Uuid::new_v4(),
    }
}

/// A low-trust author's content enters the queue at high priority; a
/// high-trust author's at low.
#[tokio::test]
async fn test_flag_priority_follows_trust_label() {
    let f = new_fixture();

    let low_trust = f
        .queue
        .flag_content(ContentType::Post, "post-1", Uuid::new_v4(), 0.5, "spam")
        .await;
    let high_trust = f
        .queue
        .flag_content(ContentType::Post, "post-2", Uuid::new_v4(), 3.5, "reported")
        .await;

    assert_eq!(low_trust.priority, Priority::High);
    assert_eq!(low_trust.status, ItemStatus::Pending);
    assert_eq!(high_trust.priority, Priority::Low);
    assert_eq!(f.queue.author_trust_label(&high_trust), TrustLabel::High);
}

/// Repeated flags on the same content bump the count and eventually
/// force urgent priority.
#[tokio::test]
async fn test_repeated_flags_raise_priority() {
    let f = new_fixture();
    let author = Uuid::new_v4();

    let mut item = f
        .queue
        .flag_content(ContentType::Post, "post-1", author, 3.5, "spam")
        .await;
    for _ in 0..4 {
        item = f
            .queue
            .flag_content(ContentType::Post, "post-1", author, 3.5, "spam")
            .await;
    }

    assert_eq!(item.community_flag_count, 5);
    assert_eq!(item.priority, Priority::Urgent);

    // Still a single queue entry
    assert_eq!(f.queue.list(ModerationFilter::default()).await.len(), 1);
}

/// Actions require the approve_content permission.
#[tokio::test]
async fn test_actions_gated_by_role() {
    let f = new_fixture();
    let item = f
        .queue
        .flag_content(ContentType::Submission, "sub-1", Uuid::new_v4(), 1.0, "off-topic")
        .await;

    let denied = f.queue.approve(f.anonymous, item.id, "looks fine").await;
    assert!(matches!(denied, Err(ModerationError::PermissionDenied(_))));

    let approved = f
        .queue
        .approve(f.moderator, item.id, "looks fine")
        .await
        .unwrap();
    assert_eq!(approved.status, ItemStatus::Approved);
    assert_eq!(approved.resolution_notes.len(), 1);
    assert_eq!(approved.resolution_notes[0].actor, f.moderator);
}

/// Approving an already approved item fails and changes nothing; the
/// audit trail keeps a single entry.
#[tokio::test]
async fn test_reapprove_fails_with_already_resolved() {
    let f = new_fixture();
    let item = f
        .queue
        .flag_content(ContentType::Post, "post-1", Uuid::new_v4(), 1.0, "spam")
        .await;

    f.queue.approve(f.moderator, item.id, "ok").await.unwrap();

    let second = f.queue.approve(f.moderator, item.id, "ok again").await;
    assert!(matches!(second, Err(ModerationError::AlreadyResolved(_))));

    let stored = f.queue.get(item.id).await.unwrap();
    assert_eq!(stored.status, ItemStatus::Approved);
    assert_eq!(stored.resolution_notes.len(), 1);
}

/// Acting on an unknown id reports NotFound.
#[tokio::test]
async fn test_unknown_item_not_found() {
    let f = new_fixture();

    let result = f.queue.reject(f.moderator, Uuid::new_v4(), "gone").await;

    assert!(matches!(result, Err(ModerationError::NotFound(_))));
}

/// Escalation raises priority one step at a time, saturating at urgent,
/// and may be repeated.
#[tokio::test]
async fn test_escalation_raises_priority() {
    let f = new_fixture();
    let item = f
        .queue
        .flag_content(ContentType::Post, "post-1", Uuid::new_v4(), 3.5, "borderline")
        .await;
    assert_eq!(item.priority, Priority::Low);

    let first = f.queue.escalate(f.moderator, item.id, "not sure").await.unwrap();
    assert_eq!(first.status, ItemStatus::Escalated);
    assert_eq!(first.priority, Priority::Normal);

    let second = f
        .queue
        .escalate(f.moderator, item.id, "second look please")
        .await
        .unwrap();
    assert_eq!(second.priority, Priority::High);
    assert_eq!(second.resolution_notes.len(), 2);
}

/// Resolving an escalated item takes an admin; a moderator can only
/// keep escalating it.
#[tokio::test]
async fn test_escalated_items_need_admin_to_resolve() {
    let f = new_fixture();
    let item = f
        .queue
        .flag_content(ContentType::Submission, "sub-1", Uuid::new_v4(), 1.0, "dispute")
        .await;

    f.queue.escalate(f.moderator, item.id, "above my pay grade").await.unwrap();

    let denied = f.queue.approve(f.moderator, item.id, "fine").await;
    assert!(matches!(denied, Err(ModerationError::PermissionDenied(_))));

    let resolved = f.queue.approve(f.admin, item.id, "reviewed").await.unwrap();
    assert_eq!(resolved.status, ItemStatus::Approved);
}

/// Two resolvers racing on the same item cannot both succeed: exactly
/// one approve lands and the other sees AlreadyResolved.
#[tokio::test]
async fn test_concurrent_resolvers_one_wins() {
    let f = new_fixture();
    let item = f
        .queue
        .flag_content(ContentType::Post, "post-1", Uuid::new_v4(), 1.0, "spam")
        .await;

    let (first, second) = tokio::join!(
        f.queue.approve(f.moderator, item.id, "first pass"),
        f.queue.approve(f.admin, item.id, "second pass"),
    );

    let wins = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);

    let loser = if first.is_ok() { second } else { first };
    assert!(matches!(loser, Err(ModerationError::AlreadyResolved(_))));

    let stored = f.queue.get(item.id).await.unwrap();
    assert_eq!(stored.status, ItemStatus::Approved);
    assert_eq!(stored.resolution_notes.len(), 1);
}

/// A bulk action applies per item: one already resolved item fails
/// without losing the rest.
#[tokio::test]
async fn test_bulk_apply_isolates_failures() {
    let f = new_fixture();
    let author = Uuid::new_v4();

    let a = f
        .queue
        .flag_content(ContentType::Post, "post-a", author, 1.0, "spam")
        .await;
    let b = f
        .queue
        .flag_content(ContentType::Post, "post-b", author, 1.0, "spam")
        .await;
    let c = f
        .queue
        .flag_content(ContentType::Post, "post-c", author, 1.0, "spam")
        .await;

    // b is resolved ahead of the bulk run
    f.queue.reject(f.moderator, b.id, "removed").await.unwrap();

    let outcome = f
        .queue
        .bulk_apply(
            f.moderator,
            &[a.id, b.id, c.id],
            ModerationAction::Approve,
            "sweep",
        )
        .await;

    assert_eq!(outcome.succeeded, vec![a.id, c.id]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, b.id);

    assert_eq!(f.queue.get(a.id).await.unwrap().status, ItemStatus::Approved);
    assert_eq!(f.queue.get(b.id).await.unwrap().status, ItemStatus::Rejected);
    assert_eq!(f.queue.get(c.id).await.unwrap().status, ItemStatus::Approved);
}

/// Listing filters by status and priority and orders urgent first.
#[tokio::test]
async fn test_list_filter_and_order() {
    let f = new_fixture();

    let urgent_author = Uuid::new_v4();
    f.queue
        .flag_content(ContentType::Post, "calm", Uuid::new_v4(), 3.5, "minor")
        .await;
    let flagged = f
        .queue
        .flag_content(ContentType::Post, "hot", urgent_author, 0.1, "abuse")
        .await;
    f.queue
        .flag_content(ContentType::Submission, "sub", Uuid::new_v4(), 2.5, "plagiarism")
        .await;

    let all = f.queue.list(ModerationFilter::default()).await;
    assert_eq!(all.len(), 3);
    // Low-trust author's item sorts ahead of the rest
    assert_eq!(all[0].id, flagged.id);

    let pending_high = f
        .queue
        .list(ModerationFilter {
            status: Some(ItemStatus::Pending),
            priority: Some(Priority::High),
        })
        .await;
    assert_eq!(pending_high.len(), 1);
    assert_eq!(pending_high[0].id, flagged.id);

    f.queue.approve(f.moderator, flagged.id, "ok").await.unwrap();
    let pending = f
        .queue
        .list(ModerationFilter {
            status: Some(ItemStatus::Pending),
            ..Default::default()
        })
        .await;
    assert_eq!(pending.len(), 2);
}
