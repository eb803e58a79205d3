//! Credential provider — the secure-storage collaborator.
//!
//! The pipeline only ever asks for a secret by name. A missing or blank value
//! means "run without the remote model", never an error.

use std::collections::HashMap;
use std::fmt;

/// A remote API key. Only ever rendered into the `Authorization` header.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

pub trait CredentialProvider: Send + Sync {
    fn get_secret(&self, name: &str) -> Option<String>;

    fn api_key(&self, name: &str) -> Option<ApiKey> {
        self.get_secret(name).map(ApiKey::new)
    }
}

/// Reads secrets from the process environment (`.env` is loaded by the binary).
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
    fn get_secret(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }
}

/// Fixed in-process secrets.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    secrets: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn get_secret(&self, name: &str) -> Option<String> {
        self.secrets
            .get(name)
            .filter(|v| !v.trim().is_empty())
            .cloned()
    }
}
