use crate::identity::progression::ProgressionEngine;
use crate::identity::role::{Permission, RoleError, TrustRoleModel};
use crate::identity::user::{Identity, IdentityError, ProfileUpdate};
use crate::identity::ProgressionError;
use crate::storage::{Database, IdentityStore, StoreError};
use crate::utils::Config;
use log::{info, warn};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Identity not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Verification did not answer in time")]
    NetworkUnavailable,

    #[error("Operation not valid in state {0}")]
    WrongState(SessionState),

    #[error("Storage unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Role(#[from] RoleError),

    #[error(transparent)]
    Progression(#[from] ProgressionError),
}

/// Lifecycle position of the device's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// `initialize()` has not run yet
    Uninitialized,

    /// First run, onboarding never completed
    OnboardingRequired,

    /// Onboarding done, identity creation still pending
    SetupRequired,

    /// A login or setup is needed before anything else
    LoginRequired,

    /// A current identity is loaded
    Active,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::OnboardingRequired => write!(f, "onboarding-required"),
            SessionState::SetupRequired => write!(f, "setup-required"),
            SessionState::LoginRequired => write!(f, "login-required"),
            SessionState::Active => write!(f, "active"),
        }
    }
}

/// Answers a login attempt with the verified identity. The production
/// implementation fronts the platform's verify endpoint; `LocalVerifier`
/// answers from the device's own records.
pub trait IdentityVerifier: Send + Sync {
    fn verify(
        &self,
        id: Uuid,
        credential: Option<&str>,
    ) -> impl Future<Output = Result<Identity, SessionError>> + Send;
}

/// Verifies logins against identities stored on this device.
#[derive(Clone)]
pub struct LocalVerifier {
    store: IdentityStore,
}

impl LocalVerifier {
    pub fn new(store: IdentityStore) -> Self {
        Self { store }
    }
}

impl IdentityVerifier for LocalVerifier {
    async fn verify(
        &self,
        id: Uuid,
        credential: Option<&str>,
    ) -> Result<Identity, SessionError> {
        let identity = self
            .store
            .load_identity(&id)?
            .ok_or(SessionError::NotFound(id))?;

        identity
            .verify_credential(credential)
            .map_err(|_| SessionError::InvalidCredential)?;

        Ok(identity)
    }
}

struct SessionInner {
    state: SessionState,
    current: Option<Identity>,
}

/// The single "current user" view the rest of the platform talks to.
///
/// Composes the store, the progression engine, and the role model into
/// one lifecycle: first-run detection, onboarding, setup, login,
/// profile updates, logout, and wipe. Every mutating method holds the
/// session lock for its whole read-modify-write, which serializes
/// operations on the current identity in call order.
pub struct IdentitySession<V: IdentityVerifier = LocalVerifier> {
    store: IdentityStore,
    progression: ProgressionEngine,
    roles: TrustRoleModel,
    verifier: V,
    config: Config,
    inner: Mutex<SessionInner>,
}

impl IdentitySession<LocalVerifier> {
    /// Builds a session over the database with the device-local verifier.
    pub fn new(db: &Database, config: Config) -> Result<Self, SessionError> {
        let store = IdentityStore::new(db)?;
        let verifier = LocalVerifier::new(store.clone());
        Self::with_verifier(db, config, verifier)
    }
}

impl<V: IdentityVerifier> IdentitySession<V> {
    /// Builds a session with a caller-supplied verifier.
    pub fn with_verifier(db: &Database, config: Config, verifier: V) -> Result<Self, SessionError> {
        let store = IdentityStore::new(db)?;
        let progression = ProgressionEngine::new(store.clone());
        let roles = TrustRoleModel::new(store.clone(), config.allow_admin_self_assign);

        Ok(Self {
            store,
            progression,
            roles,
            verifier,
            config,
            inner: Mutex::new(SessionInner {
                state: SessionState::Uninitialized,
                current: None,
            }),
        })
    }

    /// Determines the starting state from the stored records.
    ///
    /// When `force_reverify_on_start` is set (the default), a stored
    /// current identity is discarded and the session lands on
    /// `LoginRequired` even though the identity record itself remains
    /// loadable through a fresh login. With the flag off, a stored
    /// identity or remembered session resumes straight to `Active`.
    ///
    /// This is the one place a storage read failure degrades to
    /// first-run semantics instead of propagating.
    pub async fn initialize(&self) -> Result<SessionState, SessionError> {
        let mut inner = self.inner.lock().await;

        let stored = match self.store.load_current_identity() {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Storage unavailable at startup, treating as first run: {}", e);
                inner.state = SessionState::OnboardingRequired;
                return Ok(inner.state);
            }
        };

        if let Some(identity) = stored {
            if self.config.force_reverify_on_start {
                info!("Discarding stored identity {}, re-verification required", identity.id);
                self.store.clear_current_identity()?;
                self.store.clear_remembered_session()?;
                inner.state = SessionState::LoginRequired;
            } else {
                inner.current = Some(identity);
                inner.state = SessionState::Active;
            }
            return Ok(inner.state);
        }

        if !self.config.force_reverify_on_start {
            if let Some(token) = self.store.load_remembered_session().unwrap_or(None) {
                if let Some(identity) = self.store.load_identity(&token.identity_id)? {
                    self.store.set_current_identity(&identity.id)?;
                    info!("Resumed remembered session for {}", identity.id);
                    inner.current = Some(identity);
                    inner.state = SessionState::Active;
                    return Ok(inner.state);
                }
            }
        }

        let onboarded = self.store.onboarding_complete().unwrap_or(false);
        inner.state = if onboarded {
            SessionState::LoginRequired
        } else {
            SessionState::OnboardingRequired
        };

        Ok(inner.state)
    }

    /// Marks onboarding as done. Identity creation is deferred to
    /// `complete_setup`.
    pub async fn complete_onboarding(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;

        if inner.state != SessionState::OnboardingRequired {
            return Err(SessionError::WrongState(inner.state));
        }

        self.store.set_onboarding_complete()?;
        inner.state = SessionState::SetupRequired;

        Ok(())
    }

    /// Creates the device's anonymous identity with fresh progression
    /// records and activates the session.
    pub async fn complete_setup(&self) -> Result<Identity, SessionError> {
        let mut inner = self.inner.lock().await;

        if inner.state != SessionState::SetupRequired {
            return Err(SessionError::WrongState(inner.state));
        }

        let identity = Identity::new_anonymous();
        self.store.save_identity(&identity)?;
        self.store.set_current_identity(&identity.id)?;
        self.store
            .save_progression(&identity.id, &Default::default())?;

        info!("Created anonymous identity {}", identity.id);

        inner.current = Some(identity.clone());
        inner.state = SessionState::Active;

        Ok(identity)
    }

    /// Verifies the identity and activates the session. The verifier is
    /// given a bounded wait; an unanswered verification surfaces as
    /// `NetworkUnavailable` rather than hanging the caller.
    pub async fn login_with_identity(
        &self,
        id: Uuid,
        credential: Option<&str>,
        remember: bool,
    ) -> Result<Identity, SessionError> {
        let mut inner = self.inner.lock().await;

        let wait = Duration::from_millis(self.config.io_timeout_ms);
        let identity = match tokio::time::timeout(wait, self.verifier.verify(id, credential)).await
        {
            Ok(verified) => verified?,
            Err(_) => return Err(SessionError::NetworkUnavailable),
        };

        self.store.set_current_identity(&identity.id)?;

        if remember {
            self.store.save_remembered_session(&identity)?;
        } else {
            self.store.clear_remembered_session()?;
        }

        info!("Logged in as {}", identity);

        inner.current = Some(identity.clone());
        inner.state = SessionState::Active;

        Ok(identity)
    }

    /// Sets a credential on the current identity, turning it into a
    /// claimed identity that can log in from other devices.
    pub async fn claim_identity(&self, credential: &str) -> Result<Identity, SessionError> {
        let mut inner = self.inner.lock().await;

        let state = inner.state;
        if state != SessionState::Active {
            return Err(SessionError::WrongState(state));
        }
        let identity = match inner.current.as_mut() {
            Some(identity) => identity,
            None => return Err(SessionError::WrongState(state)),
        };

        identity.claim(credential)?;
        self.store.save_identity(identity)?;

        info!("Identity {} claimed a credential", identity.id);

        Ok(identity.clone())
    }

    /// Merges allowed profile fields into the current identity. The id
    /// and credential hash are not part of `ProfileUpdate`, so they
    /// cannot change through this path.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Identity, SessionError> {
        let mut inner = self.inner.lock().await;

        let state = inner.state;
        if state != SessionState::Active {
            return Err(SessionError::WrongState(state));
        }
        let identity = match inner.current.as_mut() {
            Some(identity) => identity,
            None => return Err(SessionError::WrongState(state)),
        };

        identity.apply_update(update);
        self.store.save_identity(identity)?;

        Ok(identity.clone())
    }

    /// Records activity on the current identity and advances the daily
    /// streak; returns the streak length. Content screens call this on
    /// any meaningful user action.
    pub async fn touch_activity(&self) -> Result<u32, SessionError> {
        let mut inner = self.inner.lock().await;

        let state = inner.state;
        if state != SessionState::Active {
            return Err(SessionError::WrongState(state));
        }
        let identity = match inner.current.as_mut() {
            Some(identity) => identity,
            None => return Err(SessionError::WrongState(state)),
        };

        identity.touch();
        self.store.save_identity(identity)?;
        let id = identity.id;

        drop(inner);

        Ok(self.progression.update_streak(id).await?)
    }

    /// Ends the session without deleting the identity record, so a later
    /// login can resume it.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;

        self.store.clear_current_identity()?;
        self.store.clear_remembered_session()?;

        if let Some(identity) = inner.current.take() {
            info!("Logged out {}", identity.id);
        }
        inner.state = SessionState::LoginRequired;

        Ok(())
    }

    /// Deletes every local record: identities, progression, roles, trust
    /// scores, the remembered session, and the onboarding marker.
    pub async fn wipe(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;

        self.store.wipe()?;
        // The wipe must hit disk before the caller treats it as done
        self.store.close()?;

        inner.current = None;
        inner.state = SessionState::LoginRequired;

        info!("Wiped all local identity data");

        Ok(())
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// The current identity, if the session is active.
    pub async fn current_identity(&self) -> Option<Identity> {
        self.inner.lock().await.current.clone()
    }

    /// Whether the current identity holds the permission. With no
    /// current identity the answer is always false.
    pub async fn check_permission(&self, permission: Permission) -> Result<bool, SessionError> {
        let current = self.current_identity().await;
        match current {
            Some(identity) => Ok(self.roles.check_permission(identity.id, permission)?),
            None => Ok(false),
        }
    }

    /// The progression engine for the stored identities.
    pub fn progression(&self) -> &ProgressionEngine {
        &self.progression
    }

    /// The trust and role model for the stored identities.
    pub fn roles(&self) -> &TrustRoleModel {
        &self.roles
    }

    /// Direct store access for collaborators that read identity records.
    pub fn store(&self) -> &IdentityStore {
        &self.store
    }
}
