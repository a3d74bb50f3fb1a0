use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Credential hashing failed: {0}")]
    CredentialFailed(String),

    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Identity operation failed: {0}")]
    OperationFailed(String),
}

/// Who can see the profile behind an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    /// Only the owner
    Private,

    /// Logged-in community members
    Community,

    /// Anyone, including crawlers
    Public,
}

/// Fixed set of privacy toggles attached to every identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacySettings {
    /// Attach coarse location to activity
    pub share_location: bool,

    /// Show recent activity on the profile
    pub show_activity: bool,

    /// Show the current streak on the profile
    pub show_streak: bool,

    /// Profile visibility level
    pub profile_visibility: Visibility,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            share_location: false,
            show_activity: true,
            show_streak: true,
            profile_visibility: Visibility::Community,
        }
    }
}

/// Salted credential digest for a claimed identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialHash {
    /// Hex-encoded random salt
    salt: String,

    /// Hex-encoded SHA-256 of salt followed by the credential
    digest: String,
}

impl CredentialHash {
    /// Hashes a credential with a fresh random salt.
    pub fn new(credential: &str) -> Self {
        let mut salt = [0u8; 16];
        rand::Rng::fill(&mut rand::thread_rng(), &mut salt);

        let digest = Self::digest_with_salt(&salt, credential);

        Self {
            salt: hex::encode(salt),
            digest,
        }
    }

    /// Checks a credential against the stored digest.
    pub fn matches(&self, credential: &str) -> bool {
        let salt = match hex::decode(&self.salt) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };

        Self::digest_with_salt(&salt, credential) == self.digest
    }

    fn digest_with_salt(salt: &[u8], credential: &str) -> String {
        let mut hasher = ring::digest::Context::new(&ring::digest::SHA256);
        hasher.update(salt);
        hasher.update(credential.as_bytes());
        hex::encode(hasher.finish().as_ref())
    }
}

/// The allowed fields of a profile update. `id` and the credential hash
/// are not representable here, so they cannot be changed through this path.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub nickname: Option<String>,
    pub avatar_token: Option<String>,
    pub privacy: Option<PrivacySettings>,
}

/// A device-local pseudonymous user record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque identifier, generated at setup, immutable afterwards
    pub id: Uuid,

    /// Display name, defaults derived from the id
    pub nickname: String,

    /// Avatar selector, defaults derived from the id
    pub avatar_token: String,

    /// Present once the identity has been claimed with a password
    pub credential_hash: Option<CredentialHash>,

    /// True until a credential is set
    pub is_anonymous: bool,

    /// When the identity was created
    pub created_at: DateTime<Utc>,

    /// Last recorded activity
    pub last_active_at: DateTime<Utc>,

    /// Privacy toggles
    pub privacy: PrivacySettings,
}

impl Identity {
    /// Creates a fresh anonymous identity with defaults derived from a
    /// newly generated id.
    pub fn new_anonymous() -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let simple = id.simple().to_string();
        let short = &simple[..8];

        Self {
            id,
            nickname: format!("citizen-{}", short),
            avatar_token: format!("avatar-{}", short),
            credential_hash: None,
            is_anonymous: true,
            created_at: now,
            last_active_at: now,
            privacy: PrivacySettings::default(),
        }
    }

    /// Claims the identity with a password, flipping it out of anonymous
    /// mode. Claiming an already claimed identity replaces the credential.
    pub fn claim(&mut self, credential: &str) -> Result<(), IdentityError> {
        if credential.is_empty() {
            return Err(IdentityError::CredentialFailed(
                "empty credential".to_string(),
            ));
        }

        self.credential_hash = Some(CredentialHash::new(credential));
        self.is_anonymous = false;

        Ok(())
    }

    /// Verifies a login credential. Anonymous identities accept a login
    /// without a credential; claimed identities require a matching one.
    pub fn verify_credential(&self, credential: Option<&str>) -> Result<(), IdentityError> {
        match (&self.credential_hash, credential) {
            (None, _) => Ok(()),
            (Some(hash), Some(given)) if hash.matches(given) => Ok(()),
            (Some(_), _) => Err(IdentityError::InvalidCredential),
        }
    }

    /// Merges a profile update into the identity. Only nickname, avatar,
    /// and privacy settings are reachable through this path.
    pub fn apply_update(&mut self, update: ProfileUpdate) {
        if let Some(nickname) = update.nickname {
            self.nickname = nickname;
        }

        if let Some(avatar_token) = update.avatar_token {
            self.avatar_token = avatar_token;
        }

        if let Some(privacy) = update.privacy {
            self.privacy = privacy;
        }

        self.last_active_at = Utc::now();
    }

    /// Records activity on the identity.
    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.nickname, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_anonymous_defaults() {
        let identity = Identity::new_anonymous();

        assert!(identity.is_anonymous);
        assert!(identity.credential_hash.is_none());
        assert!(identity.nickname.starts_with("citizen-"));
        assert!(identity.avatar_token.starts_with("avatar-"));
        assert_eq!(identity.privacy, PrivacySettings::default());
    }

    #[test]
    fn test_claim_and_verify() {
        let mut identity = Identity::new_anonymous();

        // Anonymous identities accept a login without a credential
        assert!(identity.verify_credential(None).is_ok());

        identity.claim("hunter2").unwrap();

        assert!(!identity.is_anonymous);
        assert!(identity.verify_credential(Some("hunter2")).is_ok());
        assert!(matches!(
            identity.verify_credential(Some("wrong")),
            Err(IdentityError::InvalidCredential)
        ));
        assert!(matches!(
            identity.verify_credential(None),
            Err(IdentityError::InvalidCredential)
        ));
    }

    #[test]
    fn test_empty_credential_rejected() {
        let mut identity = Identity::new_anonymous();

        assert!(identity.claim("").is_err());
        assert!(identity.is_anonymous);
    }

    #[test]
    fn test_apply_update_merges_only_given_fields() {
        let mut identity = Identity::new_anonymous();
        let original_avatar = identity.avatar_token.clone();
        let id = identity.id;

        identity.apply_update(ProfileUpdate {
            nickname: Some("Marcus".to_string()),
            avatar_token: None,
            privacy: None,
        });

        assert_eq!(identity.nickname, "Marcus");
        assert_eq!(identity.avatar_token, original_avatar);
        assert_eq!(identity.id, id);
    }
}
