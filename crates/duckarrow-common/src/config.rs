//! Connection configuration and the process-wide config snapshot

use sha2::{Digest, Sha256};
use std::sync::{Arc, RwLock};

/// Connection parameters for a Flight SQL endpoint. Immutable once a
/// connection is opened; also the pool key material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// e.g. `grpc+tls://localhost:31337`
    pub uri: String,
    pub username: String,
    pub password: String,
    pub token: Option<String>,
    /// Skip TLS peer-certificate verification (development only).
    pub skip_verify: bool,
}

impl ConnectionConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn uses_tls(&self) -> bool {
        self.uri.starts_with("grpc+tls://")
    }

    /// Pool key: SHA-256 over the NUL-delimited fields.
    ///
    /// The delimiter keeps field boundaries unambiguous: username "u\0p"
    /// with an empty password must not produce the same key as username
    /// "u" with password "\0p".
    pub fn pool_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.uri.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.username.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.password.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.token.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(if self.skip_verify {
            b"true".as_slice()
        } else {
            b"false".as_slice()
        });
        hex::encode(hasher.finalize())
    }
}

/// Process-wide configuration snapshot set by `remote_configure`.
///
/// Writers swap the snapshot atomically; readers clone the current `Arc`.
/// A query that already read a snapshot keeps it for its whole lifetime,
/// so reconfiguring never aborts in-flight queries.
#[derive(Debug, Default)]
pub struct GlobalConfig {
    inner: RwLock<Option<Arc<ConnectionConfig>>>,
}

impl GlobalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, config: ConnectionConfig) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Arc::new(config));
    }

    pub fn snapshot(&self) -> Option<Arc<ConnectionConfig>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn uri(&self) -> Option<String> {
        self.snapshot().map(|c| c.uri.clone())
    }

    pub fn clear(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }
}
