//! Entry point binding a project key to Base and Drive handles

use crate::base::Base;
use crate::client::{build_connection, encode_segment, AuthInfo, Connection, HttpClient};
use crate::config::{Config, ProjectKey};
use crate::drive::Drive;
use crate::error::{Error, Result};

/// A Deta project.
///
/// Holds the validated project key and one pooled connection shared by all
/// [`Base`] and [`Drive`] handles created from it.
///
/// # Example
///
/// ```
/// use deta::Deta;
/// let deta = Deta::new("a0abcyxz_aSecretValue").unwrap();
/// assert_eq!(deta.project_id(), "a0abcyxz");
/// ```
#[derive(Clone)]
pub struct Deta {
    key: ProjectKey,
    config: Config,
    connection: Connection,
}

impl Deta {
    /// Project on the public endpoints, unless `DETA_BASE_ROOT_ENDPOINT` or
    /// `DETA_DRIVE_ROOT_ENDPOINT` override them
    ///
    /// # Errors
    /// [`Error::BadProjectKey`] unless the key is `{project_id}_{secret}`
    pub fn new(project_key: &str) -> Result<Self> {
        Self::with_config(Config::new(project_key))
    }

    /// Project from the `DETA_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::with_config(Config::from_env()?)
    }

    /// Project with custom configuration
    pub fn with_config(mut config: Config) -> Result<Self> {
        let key = ProjectKey::parse(&config.project_key)?;
        config.base_endpoint = trim_endpoint(&config.base_endpoint);
        config.drive_endpoint = trim_endpoint(&config.drive_endpoint);

        Ok(Self {
            key,
            config,
            connection: build_connection()?,
        })
    }

    /// Project id, the part of the key before the underscore
    pub fn project_id(&self) -> &str {
        self.key.project_id()
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle to the Base called `name`
    ///
    /// # Errors
    /// [`Error::BadBaseName`] if `name` is empty
    pub fn base(&self, name: &str) -> Result<Base> {
        if name.is_empty() {
            return Err(Error::BadBaseName);
        }
        Ok(Base::new(self.client(&self.config.base_endpoint, name)?))
    }

    /// Handle to the Drive called `name`
    ///
    /// # Errors
    /// [`Error::BadDriveName`] if `name` is empty
    pub fn drive(&self, name: &str) -> Result<Drive> {
        if name.is_empty() {
            return Err(Error::BadDriveName);
        }
        Ok(Drive::new(self.client(&self.config.drive_endpoint, name)?))
    }

    fn client(&self, endpoint: &str, name: &str) -> Result<HttpClient> {
        let root = format!(
            "{}/{}/{}",
            endpoint,
            encode_segment(self.key.project_id()),
            encode_segment(name)
        );
        HttpClient::new(
            root,
            AuthInfo::api_key(self.key.as_str()),
            self.connection.clone(),
        )
    }
}

impl std::fmt::Debug for Deta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deta")
            .field("key", &self.key)
            .field("base_endpoint", &self.config.base_endpoint)
            .field("drive_endpoint", &self.config.drive_endpoint)
            .finish_non_exhaustive()
    }
}

fn trim_endpoint(endpoint: &str) -> String {
    endpoint.trim().trim_end_matches('/').to_string()
}
