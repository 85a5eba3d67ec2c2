//! Shared types used across Tidepool crates.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::DataSourceConfig;

/// Username/password pair a connection is opened under.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "************"))
            .finish()
    }
}

/// Where and how physical connections are opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataSource {
    pub url: String,
    pub credentials: Credentials,
    /// Driver-specific properties passed through to the connection factory.
    pub properties: BTreeMap<String, String>,
    /// Auto-commit mode applied to freshly opened connections, if set.
    pub auto_commit: Option<bool>,
}

impl DataSource {
    pub fn new(url: &str, credentials: Credentials) -> Self {
        Self {
            url: url.to_string(),
            credentials,
            properties: BTreeMap::new(),
            auto_commit: None,
        }
    }

    pub fn from_config(config: &DataSourceConfig) -> Self {
        Self {
            url: config.url.clone(),
            credentials: Credentials {
                username: config.username.clone(),
                password: config.password.clone(),
            },
            properties: config.properties.clone().unwrap_or_default(),
            auto_commit: config.auto_commit,
        }
    }

    /// Fingerprint of the configured endpoint and credentials.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.url, &self.credentials)
    }

    /// Fingerprint of the configured endpoint under alternate credentials.
    pub fn fingerprint_for(&self, credentials: &Credentials) -> Fingerprint {
        Fingerprint::of(&self.url, credentials)
    }
}

/// Identity of an endpoint + credentials combination.
///
/// A connection carries the fingerprint it was checked out under; after a
/// reconfiguration the pool's expected fingerprint changes and stale
/// connections are closed instead of being returned to the idle set.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(url: &str, credentials: &Credentials) -> Self {
        let mut hasher = Sha256::new();
        for part in [
            Some(url),
            credentials.username.as_deref(),
            credentials.password.as_deref(),
        ] {
            // Length-prefix each part so ("ab", "c") and ("a", "bc") differ.
            match part {
                Some(value) => {
                    hasher.update((value.len() as u64).to_be_bytes());
                    hasher.update(value.as_bytes());
                }
                None => hasher.update(u64::MAX.to_be_bytes()),
            }
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}
