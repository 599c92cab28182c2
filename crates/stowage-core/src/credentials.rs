//! Credentials and the provider that hands out snapshots of them.
//!
//! A logical call captures one [`Arc<Credentials>`] when it starts and signs
//! every attempt against that snapshot. Rotating the provider's credentials
//! mid-call therefore never changes the key used by a retry.

use std::sync::Arc;

use parking_lot::RwLock;

/// Access key, secret key and optional session token.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// The access key ID.
    pub access_key_id: String,
    /// The secret access key.
    pub secret_access_key: String,
    /// Optional session token for temporary credentials.
    pub session_token: Option<String>,
}

impl Credentials {
    /// Create long-term credentials without a session token.
    #[must_use]
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Attach a session token.
    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Whether both the access key and the secret are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.access_key_id.is_empty() && !self.secret_access_key.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Source of credential snapshots.
///
/// Implementations may refresh their credentials at any time. Callers must
/// hold on to the returned snapshot for the lifetime of one logical call.
pub trait CredentialProvider: Send + Sync + std::fmt::Debug {
    /// Return the current credentials.
    fn credentials(&self) -> Arc<Credentials>;
}

/// A provider holding one set of credentials that can be replaced at runtime.
///
/// # Examples
///
/// ```
/// use stowage_core::{CredentialProvider, Credentials, StaticCredentialProvider};
///
/// let provider = StaticCredentialProvider::new(Credentials::new("AKID", "secret"));
/// let snapshot = provider.credentials();
/// provider.rotate(Credentials::new("AKID2", "secret2"));
///
/// assert_eq!(snapshot.access_key_id, "AKID");
/// assert_eq!(provider.credentials().access_key_id, "AKID2");
/// ```
#[derive(Debug)]
pub struct StaticCredentialProvider {
    current: RwLock<Arc<Credentials>>,
}

impl StaticCredentialProvider {
    /// Create a provider from a fixed set of credentials.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            current: RwLock::new(Arc::new(credentials)),
        }
    }

    /// Replace the credentials handed out to future calls.
    pub fn rotate(&self, credentials: Credentials) {
        *self.current.write() = Arc::new(credentials);
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn credentials(&self) -> Arc<Credentials> {
        Arc::clone(&self.current.read())
    }
}
