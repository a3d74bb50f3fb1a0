use crate::identity::{Identity, ProgressionState, RoleRecord, TrustRecord};
use crate::storage::{Database, DatabaseError};
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(#[from] DatabaseError),
}

const TREE_IDENTITIES: &str = "identities";
const TREE_PROGRESSION: &str = "progression";
const TREE_ROLES: &str = "roles";
const TREE_TRUST: &str = "trust";
const TREE_META: &str = "meta";

const META_CURRENT: &[u8] = b"current";
const META_ONBOARDING: &[u8] = b"onboarding";
const META_SESSION: &[u8] = b"session";

/// Persisted "remember me" record allowing login to resume without
/// re-entering credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    /// The identity this token resumes
    pub identity_id: Uuid,

    /// Opaque random value minted when the record is saved. Local
    /// resume keys off `identity_id` alone; this value is only
    /// presented to the platform API when a remote session is
    /// re-validated, so nothing on the device reads it back
    pub token: String,

    /// When the token was written
    pub issued_at: DateTime<Utc>,
}

/// Durable records for identities and everything keyed off them:
/// progression counters, role grants, trust scores, the current-identity
/// pointer, the onboarding marker, and the remembered session.
pub struct IdentityStore {
    /// Backing database
    db: Database,
}

impl IdentityStore {
    /// Creates a store over the database, opening its trees up front so
    /// storage trouble surfaces here rather than mid-operation.
    pub fn new(db: &Database) -> Result<Self, StoreError> {
        let _ = db.get_tree(TREE_IDENTITIES)?;
        let _ = db.get_tree(TREE_PROGRESSION)?;
        let _ = db.get_tree(TREE_ROLES)?;
        let _ = db.get_tree(TREE_TRUST)?;
        let _ = db.get_tree(TREE_META)?;

        Ok(Self { db: db.clone() })
    }

    /// Saves an identity record. The write fully replaces any previous
    /// record for the same id.
    pub fn save_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        self.db
            .put_serialized(TREE_IDENTITIES, identity.id.as_bytes(), identity)?;
        Ok(())
    }

    /// Loads an identity record by id.
    pub fn load_identity(&self, id: &Uuid) -> Result<Option<Identity>, StoreError> {
        Ok(self.db.get_serialized(TREE_IDENTITIES, id.as_bytes())?)
    }

    /// The id of the device's current identity, if one is set.
    pub fn current_identity_id(&self) -> Result<Option<Uuid>, StoreError> {
        match self.db.get(TREE_META, META_CURRENT)? {
            Some(bytes) => Ok(Uuid::from_slice(&bytes).ok()),
            None => Ok(None),
        }
    }

    /// Marks an identity as the device's current one.
    pub fn set_current_identity(&self, id: &Uuid) -> Result<(), StoreError> {
        self.db.put(TREE_META, META_CURRENT, id.as_bytes())?;
        Ok(())
    }

    /// Clears the current-identity pointer without touching the identity
    /// record itself.
    pub fn clear_current_identity(&self) -> Result<(), StoreError> {
        self.db.delete(TREE_META, META_CURRENT)?;
        Ok(())
    }

    /// Loads the device's current identity, following the pointer.
    pub fn load_current_identity(&self) -> Result<Option<Identity>, StoreError> {
        match self.current_identity_id()? {
            Some(id) => self.load_identity(&id),
            None => Ok(None),
        }
    }

    /// Loads progression counters for an identity.
    pub fn load_progression(&self, id: &Uuid) -> Result<Option<ProgressionState>, StoreError> {
        Ok(self.db.get_serialized(TREE_PROGRESSION, id.as_bytes())?)
    }

    /// Saves progression counters for an identity.
    pub fn save_progression(&self, id: &Uuid, state: &ProgressionState) -> Result<(), StoreError> {
        self.db.put_serialized(TREE_PROGRESSION, id.as_bytes(), state)?;
        Ok(())
    }

    /// Loads the role grant for an identity.
    pub fn load_role(&self, id: &Uuid) -> Result<Option<RoleRecord>, StoreError> {
        Ok(self.db.get_serialized(TREE_ROLES, id.as_bytes())?)
    }

    /// Saves the role grant for an identity.
    pub fn save_role(&self, id: &Uuid, record: &RoleRecord) -> Result<(), StoreError> {
        self.db.put_serialized(TREE_ROLES, id.as_bytes(), record)?;
        Ok(())
    }

    /// Loads the trust score record for an identity.
    pub fn load_trust(&self, id: &Uuid) -> Result<Option<TrustRecord>, StoreError> {
        Ok(self.db.get_serialized(TREE_TRUST, id.as_bytes())?)
    }

    /// Saves the trust score record for an identity.
    pub fn save_trust(&self, id: &Uuid, record: &TrustRecord) -> Result<(), StoreError> {
        self.db.put_serialized(TREE_TRUST, id.as_bytes(), record)?;
        Ok(())
    }

    /// Loads the remembered session, if one was saved.
    pub fn load_remembered_session(&self) -> Result<Option<SessionToken>, StoreError> {
        Ok(self.db.get_serialized(TREE_META, META_SESSION)?)
    }

    /// Writes a remembered session for the identity and returns it.
    pub fn save_remembered_session(&self, identity: &Identity) -> Result<SessionToken, StoreError> {
        let token_value: u128 = rand::Rng::gen(&mut rand::thread_rng());
        let token = SessionToken {
            identity_id: identity.id,
            token: format!("{:032x}", token_value),
            issued_at: Utc::now(),
        };

        self.db.put_serialized(TREE_META, META_SESSION, &token)?;

        Ok(token)
    }

    /// Removes any remembered session.
    pub fn clear_remembered_session(&self) -> Result<(), StoreError> {
        self.db.delete(TREE_META, META_SESSION)?;
        Ok(())
    }

    /// Whether onboarding was ever completed on this device.
    pub fn onboarding_complete(&self) -> Result<bool, StoreError> {
        Ok(self.db.get(TREE_META, META_ONBOARDING)?.is_some())
    }

    /// Marks onboarding as completed.
    pub fn set_onboarding_complete(&self) -> Result<(), StoreError> {
        self.db.put(TREE_META, META_ONBOARDING, &[1])?;
        Ok(())
    }

    /// Deletes every record this store owns in one transaction, so no
    /// caller can observe a partial wipe.
    pub fn wipe(&self) -> Result<(), StoreError> {
        let trees = [
            TREE_IDENTITIES,
            TREE_PROGRESSION,
            TREE_ROLES,
            TREE_TRUST,
            TREE_META,
        ];

        let mut keys: Vec<Vec<Vec<u8>>> = Vec::with_capacity(trees.len());
        for tree in &trees {
            keys.push(self.db.keys(tree)?);
        }

        self.db.remove_atomically(&trees, &keys)?;

        Ok(())
    }

    /// Flushes the backing database to disk.
    pub fn close(&self) -> Result<(), StoreError> {
        self.db.close()?;
        Ok(())
    }

    /// All identity records known to this device. Undecodable records are
    /// logged and skipped rather than failing the listing.
    pub fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let mut identities = Vec::new();

        for (_, data) in self.db.scan_prefix(TREE_IDENTITIES, &[])? {
            match bincode::deserialize::<Identity>(&data) {
                Ok(identity) => identities.push(identity),
                Err(e) => error!("Failed to deserialize identity: {}", e),
            }
        }

        Ok(identities)
    }
}

impl Clone for IdentityStore {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
        }
    }
}
