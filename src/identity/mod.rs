pub mod progression;
pub mod role;
pub mod session;
pub mod user;

pub use progression::{
    level_for_xp, ProgressionEngine, ProgressionError, ProgressionState, XpAward,
    LEVEL_THRESHOLDS,
};
pub use role::{
    trust_label, AuditRecord, Permission, RoleError, RoleRecord, RoleTier, TrustLabel,
    TrustRecord, TrustRoleModel,
};
pub use session::{
    IdentitySession, IdentityVerifier, LocalVerifier, SessionError, SessionState,
};
pub use user::{
    CredentialHash, Identity, IdentityError, PrivacySettings, ProfileUpdate, Visibility,
};

/*
 * Identity management for Agora
 *
 * This module owns the pseudonymous identity lifecycle and everything
 * derived from it:
 *
 * - Anonymous and claimed identities with privacy settings
 * - XP, level, streak, and badge progression
 * - The five-tier role hierarchy and its permission table
 * - The session orchestrator the rest of the app talks to
 */
