use crate::storage::{IdentityStore, StoreError};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RoleError {
    #[error("Permission denied: {0} requires {1}")]
    PermissionDenied(Permission, RoleTier),

    #[error("Invalid tier: {0}")]
    InvalidTier(String),

    #[error("Revocation requires a non-empty reason")]
    MissingReason,

    #[error("Storage unavailable: {0}")]
    Store(#[from] StoreError),
}

/// The five role tiers, totally ordered. A tier never changes on its own;
/// it only moves through an explicit grant or revoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoleTier {
    /// Default tier, never granted
    Anonymous = 0,

    /// Earned community standing
    Trusted = 1,

    /// Can author learning content
    Educator = 2,

    /// Can act on the moderation queue
    Moderator = 3,

    /// Full platform control
    Admin = 4,
}

impl RoleTier {
    /// Checks whether this tier is at or above the given minimum.
    pub fn meets_minimum(&self, minimum: RoleTier) -> bool {
        *self as u8 >= minimum as u8
    }

    /// Creates a tier from its stored discriminant.
    pub fn from_u8(value: u8) -> Result<Self, RoleError> {
        match value {
            0 => Ok(RoleTier::Anonymous),
            1 => Ok(RoleTier::Trusted),
            2 => Ok(RoleTier::Educator),
            3 => Ok(RoleTier::Moderator),
            4 => Ok(RoleTier::Admin),
            _ => Err(RoleError::InvalidTier(format!("unknown tier: {}", value))),
        }
    }
}

impl fmt::Display for RoleTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleTier::Anonymous => write!(f, "anonymous"),
            RoleTier::Trusted => write!(f, "trusted"),
            RoleTier::Educator => write!(f, "educator"),
            RoleTier::Moderator => write!(f, "moderator"),
            RoleTier::Admin => write!(f, "admin"),
        }
    }
}

/// Named capabilities gated by role tier. Each permission names the lowest
/// tier holding it; higher tiers inherit everything below them, so the
/// permission sets are cumulative by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    ViewContent,
    SubmitContent,
    FlagContent,
    CommentWithoutReview,
    AuthorModules,
    ReviewSubmissions,
    ApproveContent,
    EscalateContent,
    AssignRoles,
    ManagePlatform,
}

impl Permission {
    /// The lowest tier granted this permission.
    pub fn required_tier(&self) -> RoleTier {
        match self {
            Permission::ViewContent | Permission::SubmitContent => RoleTier::Anonymous,
            Permission::FlagContent | Permission::CommentWithoutReview => RoleTier::Trusted,
            Permission::AuthorModules | Permission::ReviewSubmissions => RoleTier::Educator,
            Permission::ApproveContent | Permission::EscalateContent => RoleTier::Moderator,
            Permission::AssignRoles | Permission::ManagePlatform => RoleTier::Admin,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::ViewContent => write!(f, "view_content"),
            Permission::SubmitContent => write!(f, "submit_content"),
            Permission::FlagContent => write!(f, "flag_content"),
            Permission::CommentWithoutReview => write!(f, "comment_without_review"),
            Permission::AuthorModules => write!(f, "author_modules"),
            Permission::ReviewSubmissions => write!(f, "review_submissions"),
            Permission::ApproveContent => write!(f, "approve_content"),
            Permission::EscalateContent => write!(f, "escalate_content"),
            Permission::AssignRoles => write!(f, "assign_roles"),
            Permission::ManagePlatform => write!(f, "manage_platform"),
        }
    }
}

/// The stored role grant for one identity, stamped on every grant and
/// revoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRecord {
    /// Granted tier
    pub tier: RoleTier,

    /// Who performed the grant, None for the never-granted default
    pub granted_by: Option<Uuid>,

    /// Why the grant happened
    pub granted_reason: String,

    /// When the grant happened
    pub granted_at: DateTime<Utc>,
}

impl Default for RoleRecord {
    fn default() -> Self {
        Self {
            tier: RoleTier::Anonymous,
            granted_by: None,
            granted_reason: String::new(),
            granted_at: Utc::now(),
        }
    }
}

/// Stored trust score for one identity. The score is maintained outside
/// this subsystem and only labels content for moderators; it never feeds
/// a permission decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustRecord {
    /// The reputation value
    pub score: f64,

    /// Last write
    pub updated_at: DateTime<Utc>,
}

/// Coarse trust bucket used for sorting and coloring in moderator views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustLabel {
    High,
    Medium,
    Low,
}

impl fmt::Display for TrustLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustLabel::High => write!(f, "high"),
            TrustLabel::Medium => write!(f, "medium"),
            TrustLabel::Low => write!(f, "low"),
        }
    }
}

/// Buckets a trust score for display. Pure and total; display only.
pub fn trust_label(score: f64) -> TrustLabel {
    if score >= 3.0 {
        TrustLabel::High
    } else if score >= 2.0 {
        TrustLabel::Medium
    } else {
        TrustLabel::Low
    }
}

/// Record of a completed grant or revoke, returned to the caller and
/// suitable for an audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Who performed the change
    pub actor: Uuid,

    /// Whose role changed
    pub target: Uuid,

    /// Tier before the change
    pub previous_tier: RoleTier,

    /// Tier after the change
    pub new_tier: RoleTier,

    /// Stated reason
    pub reason: String,

    /// When the change happened
    pub at: DateTime<Utc>,
}

/// Maps stored role grants and trust scores into effective roles,
/// permission answers, and display labels.
#[derive(Clone)]
pub struct TrustRoleModel {
    /// Backing store
    store: IdentityStore,

    /// Policy flag: an admin may grant Admin to themselves
    allow_admin_self_assign: bool,

    /// Serialization point for grant/revoke read-modify-write
    write_lock: Arc<Mutex<()>>,
}

impl TrustRoleModel {
    /// Creates a model over the given store.
    pub fn new(store: IdentityStore, allow_admin_self_assign: bool) -> Self {
        Self {
            store,
            allow_admin_self_assign,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The explicitly granted tier, Anonymous when none was ever granted.
    /// Trust score has no bearing on the answer.
    pub fn effective_role(&self, identity_id: Uuid) -> Result<RoleTier, RoleError> {
        Ok(self
            .store
            .load_role(&identity_id)?
            .map(|record| record.tier)
            .unwrap_or(RoleTier::Anonymous))
    }

    /// Whether the identity's tier holds the permission. The single
    /// gate every other layer calls; nothing else compares tiers.
    pub fn check_permission(
        &self,
        identity_id: Uuid,
        permission: Permission,
    ) -> Result<bool, RoleError> {
        let tier = self.effective_role(identity_id)?;
        Ok(tier.meets_minimum(permission.required_tier()))
    }

    /// Stored trust score, 0.0 for an identity that never received one.
    pub fn trust_score(&self, identity_id: Uuid) -> Result<f64, RoleError> {
        Ok(self
            .store
            .load_trust(&identity_id)?
            .map(|record| record.score)
            .unwrap_or(0.0))
    }

    /// Writes the externally maintained trust score.
    pub fn set_trust_score(&self, identity_id: Uuid, score: f64) -> Result<(), RoleError> {
        let record = TrustRecord {
            score,
            updated_at: Utc::now(),
        };
        self.store.save_trust(&identity_id, &record)?;
        Ok(())
    }

    /// Grants a tier to the target. The actor must hold `assign_roles`;
    /// regranting the current tier is rejected, as is self-assigning
    /// Admin unless the policy flag allows it.
    pub async fn assign_role(
        &self,
        actor: Uuid,
        target: Uuid,
        new_tier: RoleTier,
        reason: &str,
    ) -> Result<AuditRecord, RoleError> {
        if !self.check_permission(actor, Permission::AssignRoles)? {
            return Err(RoleError::PermissionDenied(
                Permission::AssignRoles,
                Permission::AssignRoles.required_tier(),
            ));
        }

        let _guard = self.write_lock.lock().await;

        let previous_tier = self.effective_role(target)?;

        if new_tier == RoleTier::Admin && actor == target && !self.allow_admin_self_assign {
            return Err(RoleError::InvalidTier(
                "admin cannot be self-assigned".to_string(),
            ));
        }

        if new_tier == previous_tier {
            return Err(RoleError::InvalidTier(format!(
                "{} already holds {}",
                target, new_tier
            )));
        }

        let at = Utc::now();
        let record = RoleRecord {
            tier: new_tier,
            granted_by: Some(actor),
            granted_reason: reason.to_string(),
            granted_at: at,
        };
        self.store.save_role(&target, &record)?;

        info!("{} granted {} to {} ({})", actor, new_tier, target, reason);

        Ok(AuditRecord {
            actor,
            target,
            previous_tier,
            new_tier,
            reason: reason.to_string(),
            at,
        })
    }

    /// Resets the target to Anonymous. A non-empty reason is checked
    /// before anything else; a blank one leaves the tier untouched.
    pub async fn revoke_role(
        &self,
        actor: Uuid,
        target: Uuid,
        reason: &str,
    ) -> Result<AuditRecord, RoleError> {
        if reason.trim().is_empty() {
            return Err(RoleError::MissingReason);
        }

        if !self.check_permission(actor, Permission::AssignRoles)? {
            return Err(RoleError::PermissionDenied(
                Permission::AssignRoles,
                Permission::AssignRoles.required_tier(),
            ));
        }

        let _guard = self.write_lock.lock().await;

        let previous_tier = self.effective_role(target)?;

        let at = Utc::now();
        let record = RoleRecord {
            tier: RoleTier::Anonymous,
            granted_by: Some(actor),
            granted_reason: reason.to_string(),
            granted_at: at,
        };
        self.store.save_role(&target, &record)?;

        info!("{} revoked {} from {} ({})", actor, previous_tier, target, reason);

        Ok(AuditRecord {
            actor,
            target,
            previous_tier,
            new_tier: RoleTier::Anonymous,
            reason: reason.to_string(),
            at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(RoleTier::Anonymous < RoleTier::Trusted);
        assert!(RoleTier::Trusted < RoleTier::Educator);
        assert!(RoleTier::Educator < RoleTier::Moderator);
        assert!(RoleTier::Moderator < RoleTier::Admin);
    }

    #[test]
    fn test_permissions_cumulative() {
        // Every permission held by a tier is held by each tier above it
        let all = [
            Permission::ViewContent,
            Permission::SubmitContent,
            Permission::FlagContent,
            Permission::CommentWithoutReview,
            Permission::AuthorModules,
            Permission::ReviewSubmissions,
            Permission::ApproveContent,
            Permission::EscalateContent,
            Permission::AssignRoles,
            Permission::ManagePlatform,
        ];
        let tiers = [
            RoleTier::Anonymous,
            RoleTier::Trusted,
            RoleTier::Educator,
            RoleTier::Moderator,
            RoleTier::Admin,
        ];

        for pair in tiers.windows(2) {
            for permission in &all {
                if pair[0].meets_minimum(permission.required_tier()) {
                    assert!(pair[1].meets_minimum(permission.required_tier()));
                }
            }
        }
    }

    #[test]
    fn test_approve_content_needs_moderator() {
        assert!(!RoleTier::Anonymous.meets_minimum(Permission::ApproveContent.required_tier()));
        assert!(!RoleTier::Educator.meets_minimum(Permission::ApproveContent.required_tier()));
        assert!(RoleTier::Moderator.meets_minimum(Permission::ApproveContent.required_tier()));
        assert!(RoleTier::Admin.meets_minimum(Permission::ApproveContent.required_tier()));
    }

    #[test]
    fn test_trust_label_boundaries() {
        assert_eq!(trust_label(3.0), TrustLabel::High);
        assert_eq!(trust_label(4.5), TrustLabel::High);
        assert_eq!(trust_label(2.0), TrustLabel::Medium);
        assert_eq!(trust_label(2.5), TrustLabel::Medium);
        assert_eq!(trust_label(1.99), TrustLabel::Low);
        assert_eq!(trust_label(0.0), TrustLabel::Low);
        assert_eq!(trust_label(-1.0), TrustLabel::Low);
    }

    #[test]
    fn test_tier_from_u8() {
        assert_eq!(RoleTier::from_u8(0).unwrap(), RoleTier::Anonymous);
        assert_eq!(RoleTier::from_u8(4).unwrap(), RoleTier::Admin);
        assert!(RoleTier::from_u8(5).is_err());
    }
}
