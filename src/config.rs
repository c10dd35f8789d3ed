//! Client configuration

use std::env;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Default root endpoint of Deta Base
pub const BASE_ENDPOINT: &str = "https://database.deta.sh/v1";
/// Default root endpoint of Deta Drive
pub const DRIVE_ENDPOINT: &str = "https://drive.deta.sh/v1";

/// Environment variable holding the project key
pub const PROJECT_KEY_ENV: &str = "DETA_PROJECT_KEY";
/// Environment variable overriding the Base root endpoint
pub const BASE_ENDPOINT_ENV: &str = "DETA_BASE_ROOT_ENDPOINT";
/// Environment variable overriding the Drive root endpoint
pub const DRIVE_ENDPOINT_ENV: &str = "DETA_DRIVE_ROOT_ENDPOINT";

/// Configuration options for a [`Deta`](crate::Deta) instance
#[derive(Debug, Clone)]
pub struct Config {
    /// Project key of the form `{project_id}_{secret}`
    pub project_key: String,
    /// Base root endpoint (default: https://database.deta.sh/v1)
    pub base_endpoint: String,
    /// Drive root endpoint (default: https://drive.deta.sh/v1)
    pub drive_endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_key: String::new(),
            base_endpoint: BASE_ENDPOINT.to_string(),
            drive_endpoint: DRIVE_ENDPOINT.to_string(),
        }
    }
}

impl Config {
    /// Configuration with the given project key.
    ///
    /// `DETA_BASE_ROOT_ENDPOINT` and `DETA_DRIVE_ROOT_ENDPOINT` still override
    /// the public endpoints when set.
    pub fn new(project_key: &str) -> Self {
        Self {
            project_key: project_key.to_string(),
            base_endpoint: endpoint_from_env(BASE_ENDPOINT_ENV, BASE_ENDPOINT),
            drive_endpoint: endpoint_from_env(DRIVE_ENDPOINT_ENV, DRIVE_ENDPOINT),
        }
    }

    /// Load configuration from `DETA_PROJECT_KEY`, `DETA_BASE_ROOT_ENDPOINT`
    /// and `DETA_DRIVE_ROOT_ENDPOINT`.
    ///
    /// The project key is required, the endpoints fall back to the public ones.
    pub fn from_env() -> Result<Self> {
        let project_key = env::var(PROJECT_KEY_ENV)
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or(Error::BadProjectKey)?;
        let base_endpoint = endpoint_from_env(BASE_ENDPOINT_ENV, BASE_ENDPOINT);
        let drive_endpoint = endpoint_from_env(DRIVE_ENDPOINT_ENV, DRIVE_ENDPOINT);

        Ok(Config {
            project_key,
            base_endpoint,
            drive_endpoint,
        })
    }
}

fn endpoint_from_env(var: &str, default: &str) -> String {
    env::var(var)
        .ok()
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// A validated project key.
///
/// The key doubles as the API key sent with every request; the part before
/// the underscore is the project id used in endpoint paths.
#[derive(Clone, PartialEq, Eq)]
pub struct ProjectKey {
    key: String,
    id_len: usize,
}

impl ProjectKey {
    /// Parse a `{project_id}_{secret}` key
    pub fn parse(key: &str) -> Result<Self> {
        let mut parts = key.split('_');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(secret), None) if !id.is_empty() && !secret.is_empty() => Ok(Self {
                key: key.to_string(),
                id_len: id.len(),
            }),
            _ => Err(Error::BadProjectKey),
        }
    }

    /// Project id part of the key
    pub fn project_id(&self) -> &str {
        &self.key[..self.id_len]
    }

    /// Full key, as sent in the `X-API-Key` header
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl FromStr for ProjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// Never print the secret part
impl fmt::Debug for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectKey")
            .field("project_id", &self.project_id())
            .finish_non_exhaustive()
    }
}
