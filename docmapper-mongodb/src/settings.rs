//! Connection settings for the MongoDB backend.
//!
//! Settings deserialize from any serde format, falling back to a local server:
//!
//! ```ignore
//! let settings: ConnectionSettings = serde_json::from_value(json!({
//!     "hosts": ["db1.example.com", "db2.example.com:27018"],
//!     "database": "app",
//!     "username": "app",
//!     "password": "secret",
//!     "auth_source": "admin",
//! }))?;
//! assert_eq!(settings.to_uri(), "mongodb://db1.example.com:27017,db2.example.com:27018/app");
//! ```

use mongodb::options::{AuthMechanism, ClientOptions, Credential};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use docmapper_core::error::{DocumentError, DocumentResult};

fn default_hosts() -> Vec<String> {
    vec!["localhost".to_string()]
}

fn default_port() -> u16 {
    27017
}

fn default_database() -> String {
    "test".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Host names, `host:port` pairs, or a single full `mongodb://` URI.
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,
    /// Port used for hosts that do not name one.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Database holding the user's credentials; defaults to `database`.
    #[serde(default)]
    pub auth_source: Option<String>,
    /// Authentication mechanism such as `SCRAM-SHA-256`.
    #[serde(default)]
    pub auth_mechanism: Option<String>,
    #[serde(default)]
    pub replica_set: Option<String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            port: default_port(),
            database: default_database(),
            username: None,
            password: None,
            auth_source: None,
            auth_mechanism: None,
            replica_set: None,
        }
    }
}

impl ConnectionSettings {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Default::default()
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.hosts = vec![host.into()];
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn auth_source(mut self, source: impl Into<String>) -> Self {
        self.auth_source = Some(source.into());
        self
    }

    pub fn auth_mechanism(mut self, mechanism: impl Into<String>) -> Self {
        self.auth_mechanism = Some(mechanism.into());
        self
    }

    /// Renders the connection URI without credentials.
    ///
    /// A host that already is a `mongodb://` or `mongodb+srv://` URI is returned unchanged.
    pub fn to_uri(&self) -> String {
        if let Some(uri) = self
            .hosts
            .iter()
            .find(|host| host.starts_with("mongodb://") || host.starts_with("mongodb+srv://"))
        {
            return uri.clone();
        }

        let hosts = self
            .hosts
            .iter()
            .map(|host| {
                if host.contains(':') {
                    host.clone()
                } else {
                    format!("{host}:{}", self.port)
                }
            })
            .collect::<Vec<_>>()
            .join(",");

        match &self.replica_set {
            Some(replica_set) => format!("mongodb://{hosts}/{}?replicaSet={replica_set}", self.database),
            None => format!("mongodb://{hosts}/{}", self.database),
        }
    }

    /// The credential to authenticate with, if a user name or mechanism is configured.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Initialization`] for an unknown authentication mechanism.
    pub fn credential(&self) -> DocumentResult<Option<Credential>> {
        if self.username.is_none() && self.auth_mechanism.is_none() {
            return Ok(None);
        }

        let mechanism = self
            .auth_mechanism
            .as_deref()
            .map(AuthMechanism::from_str)
            .transpose()
            .map_err(|e| DocumentError::Initialization(e.to_string()))?;

        let mut credential = Credential::default();
        credential.username = self.username.clone();
        credential.password = self.password.clone();
        credential.source = Some(self.auth_source.clone().unwrap_or_else(|| self.database.clone()));
        credential.mechanism = mechanism;
        Ok(Some(credential))
    }

    /// Parses the URI and applies the credential.
    pub async fn client_options(&self) -> DocumentResult<ClientOptions> {
        let mut options = ClientOptions::parse(self.to_uri())
            .await
            .map_err(|e| DocumentError::Initialization(e.to_string()))?;
        if let Some(credential) = self.credential()? {
            options.credential = Some(credential);
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_a_local_server() {
        let settings: ConnectionSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, ConnectionSettings::default());
        assert_eq!(settings.to_uri(), "mongodb://localhost:27017/test");
        assert!(settings.credential().unwrap().is_none());
    }

    #[test]
    fn hosts_ports_and_replica_sets() {
        let settings: ConnectionSettings = serde_json::from_value(serde_json::json!({
            "hosts": ["db1.example.com", "db2.example.com:27018"],
            "port": 27020,
            "database": "app",
            "replica_set": "rs0",
        }))
        .unwrap();
        assert_eq!(
            settings.to_uri(),
            "mongodb://db1.example.com:27020,db2.example.com:27018/app?replicaSet=rs0"
        );

        let uri = ConnectionSettings::new("app").host("mongodb+srv://cluster.example.com");
        assert_eq!(uri.to_uri(), "mongodb+srv://cluster.example.com");
    }

    #[test]
    fn credentials_default_their_source_to_the_database() {
        let settings = ConnectionSettings::new("app")
            .credentials("app", "secret")
            .auth_mechanism("SCRAM-SHA-256");
        let credential = settings.credential().unwrap().unwrap();
        assert_eq!(credential.username.as_deref(), Some("app"));
        assert_eq!(credential.source.as_deref(), Some("app"));
        assert_eq!(credential.mechanism, Some(AuthMechanism::ScramSha256));

        let serialized = serde_json::to_value(&settings).unwrap();
        assert!(serialized.get("password").is_none());

        let invalid = ConnectionSettings::new("app").auth_mechanism("NOT-A-MECHANISM");
        assert!(invalid.credential().is_err());
    }
}
