//! Bearer credentials and the providers that hand them out.

use async_trait::async_trait;
use std::sync::{Arc, RwLock};

/// Bearer token sent with every request
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a bearer token
    pub fn bearer(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Value for the `Authorization` header
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Source of the credential used on each poll
///
/// Called once per poll so a session picks up refreshed tokens. Returning
/// `None` means the user is signed out; the session stops as unauthorized.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current credential, if any
    async fn credential(&self) -> Option<Credential>;
}

/// Provider that always returns the same credential
#[derive(Clone, Debug)]
pub struct StaticCredential(pub Credential);

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn credential(&self) -> Option<Credential> {
        Some(self.0.clone())
    }
}

/// Provider whose credential can be replaced or cleared at runtime
#[derive(Clone, Debug, Default)]
pub struct SharedCredential {
    inner: Arc<RwLock<Option<Credential>>>,
}

impl SharedCredential {
    /// Provider holding an initial credential
    pub fn new(credential: Option<Credential>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(credential)),
        }
    }

    /// Replace the credential (e.g., after a token refresh)
    pub fn set(&self, credential: Credential) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Some(credential);
        }
    }

    /// Forget the credential (sign-out)
    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = None;
        }
    }
}

#[async_trait]
impl CredentialProvider for SharedCredential {
    async fn credential(&self) -> Option<Credential> {
        self.inner.read().ok().and_then(|guard| guard.clone())
    }
}
