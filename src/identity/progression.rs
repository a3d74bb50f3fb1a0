use crate::storage::{IdentityStore, StoreError};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ProgressionError {
    #[error("Invalid XP amount: {0}")]
    InvalidAmount(i64),

    #[error("Storage unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Cumulative XP required for each level. Level n requires
/// `LEVEL_THRESHOLDS[n - 1]` XP; the table caps progression at level 10.
pub const LEVEL_THRESHOLDS: [u64; 10] = [0, 100, 250, 500, 1000, 2000, 3500, 5500, 8000, 11000];

/// Largest level whose threshold is at or below the given XP.
pub fn level_for_xp(xp: u64) -> u32 {
    let mut level = 1;
    for (index, threshold) in LEVEL_THRESHOLDS.iter().enumerate() {
        if xp >= *threshold {
            level = index as u32 + 1;
        }
    }
    level
}

/// Streak grace window: a gap of 24 to 48 hours since the last counted
/// day extends the streak; anything longer resets it.
const STREAK_WINDOW_MIN_HOURS: i64 = 24;
const STREAK_WINDOW_MAX_HOURS: i64 = 48;

/// XP, level, streak, and badge counters for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressionState {
    /// Lifetime XP, never decreases
    pub xp: u64,

    /// Derived from `xp` via the threshold table, never decreases
    pub level: u32,

    /// Consecutive active days
    pub streak_days: u32,

    /// The day the streak last advanced
    pub last_streak_day: Option<DateTime<Utc>>,

    /// Earned badge identifiers, append-only
    pub badges: BTreeSet<String>,
}

impl Default for ProgressionState {
    fn default() -> Self {
        Self {
            xp: 0,
            level: 1,
            streak_days: 0,
            last_streak_day: None,
            badges: BTreeSet::new(),
        }
    }
}

/// Result of an XP grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpAward {
    /// New XP total
    pub xp: u64,

    /// New level
    pub level: u32,

    /// True iff the grant crossed a level threshold
    pub leveled_up: bool,
}

/// Applies activity events to an identity's progression counters.
///
/// All mutations for a given engine go through one write lock, so two
/// near-simultaneous grants are applied in call order rather than losing
/// one to a stale read.
#[derive(Clone)]
pub struct ProgressionEngine {
    /// Backing store
    store: IdentityStore,

    /// Serialization point for read-modify-write sequences
    write_lock: Arc<Mutex<()>>,
}

impl ProgressionEngine {
    /// Creates an engine over the given store.
    pub fn new(store: IdentityStore) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Grants XP for an activity and recomputes the level. Negative
    /// amounts are rejected before any state is touched.
    pub async fn add_xp(
        &self,
        identity_id: Uuid,
        amount: i64,
        reason: &str,
    ) -> Result<XpAward, ProgressionError> {
        if amount < 0 {
            return Err(ProgressionError::InvalidAmount(amount));
        }

        let _guard = self.write_lock.lock().await;

        let mut state = self.store.load_progression(&identity_id)?.unwrap_or_default();
        let old_level = state.level;

        state.xp += amount as u64;
        state.level = level_for_xp(state.xp);

        self.store.save_progression(&identity_id, &state)?;

        let leveled_up = state.level > old_level;
        if leveled_up {
            info!(
                "{} reached level {} ({} XP, {})",
                identity_id, state.level, state.xp, reason
            );
        } else {
            debug!("{} gained {} XP ({})", identity_id, amount, reason);
        }

        Ok(XpAward {
            xp: state.xp,
            level: state.level,
            leveled_up,
        })
    }

    /// Advances the daily streak. Repeated calls within the same day are
    /// idempotent; a gap inside the grace window extends the streak; a
    /// longer gap resets it to 1.
    pub async fn update_streak(&self, identity_id: Uuid) -> Result<u32, ProgressionError> {
        let _guard = self.write_lock.lock().await;

        let mut state = self.store.load_progression(&identity_id)?.unwrap_or_default();
        let now = Utc::now();

        let new_streak = match state.last_streak_day {
            None => 1,
            Some(last) => {
                let hours = now.signed_duration_since(last).num_hours();
                if hours < STREAK_WINDOW_MIN_HOURS {
                    // Already counted today
                    return Ok(state.streak_days);
                } else if hours <= STREAK_WINDOW_MAX_HOURS {
                    state.streak_days + 1
                } else {
                    1
                }
            }
        };

        state.streak_days = new_streak;
        state.last_streak_day = Some(now);

        self.store.save_progression(&identity_id, &state)?;

        debug!("{} streak now {} days", identity_id, new_streak);

        Ok(new_streak)
    }

    /// Awards a badge. Re-awarding an already held badge is a no-op.
    pub async fn add_badge(
        &self,
        identity_id: Uuid,
        badge_id: &str,
    ) -> Result<(), ProgressionError> {
        let _guard = self.write_lock.lock().await;

        let mut state = self.store.load_progression(&identity_id)?.unwrap_or_default();

        if state.badges.insert(badge_id.to_string()) {
            self.store.save_progression(&identity_id, &state)?;
            info!("{} earned badge {}", identity_id, badge_id);
        }

        Ok(())
    }

    /// Current progression counters, defaults for an identity that has
    /// never earned anything.
    pub fn state(&self, identity_id: Uuid) -> Result<ProgressionState, ProgressionError> {
        Ok(self.store.load_progression(&identity_id)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_xp_tracks_thresholds() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(250), 3);
        assert_eq!(level_for_xp(10999), 9);
        assert_eq!(level_for_xp(11000), 10);
        assert_eq!(level_for_xp(u64::MAX), 10);
    }

    #[test]
    fn test_thresholds_strictly_increase() {
        for pair in LEVEL_THRESHOLDS.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_default_state() {
        let state = ProgressionState::default();

        assert_eq!(state.xp, 0);
        assert_eq!(state.level, 1);
        assert_eq!(state.streak_days, 0);
        assert!(state.badges.is_empty());
    }
}
