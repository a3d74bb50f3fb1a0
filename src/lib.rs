pub mod identity;
pub mod moderation;
pub mod storage;
pub mod utils;

/*
 * Agora core: anonymous identity, trust, and role-gated moderation.
 *
 * This crate is the stateful core behind the Agora platform's user-facing
 * screens. It owns the pseudonymous identity lifecycle, the XP/level/streak
 * progression that feeds trust, the five-tier role hierarchy with its
 * permission table, and the moderation queue whose ordering and available
 * actions are derived from that trust and role data.
 *
 * Everything else in the platform (content editors, rendering, the remote
 * API) talks to this crate through `IdentitySession` and
 * `ModerationQueueEngine`; it is an in-process service boundary with no
 * wire format of its own.
 */
