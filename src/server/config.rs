//! Server configuration.
//!
//! Built in code with the `with_*` builder methods or loaded from a TOML
//! file. Every field has a default, so a config file only needs to name
//! what it changes:
//!
//! ```toml
//! listen_address = "0.0.0.0:7687"
//! default_database = "movies"
//! supported_versions = [1]
//! failure_policy = "auto_clear"
//! handshake_timeout = 5
//!
//! [[users]]
//! name = "neo4j"
//! password = "secret"
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use super::engine::{Authentication, BasicAuthentication, NoAuthentication};
use super::error::{ServerError, ServerResult};
use crate::bolt::codec::{DEFAULT_MAX_MESSAGE_SIZE, MAX_CHUNK_SIZE};
use crate::bolt::message::FailurePolicy;
use crate::bolt::BoltVersion;

// ============================================================================
// UserConfig
// ============================================================================

/// One entry of the basic authentication user table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserConfig {
    pub name: String,
    pub password: String,
    /// Report `credentials_expired` after a successful INIT.
    #[serde(default)]
    pub credentials_expired: bool,
}

impl UserConfig {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            credentials_expired: false,
        }
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

/// Bolt server settings.
///
/// | Field | Default |
/// |-------|---------|
/// | `listen_address` | `127.0.0.1:7687` |
/// | `server_agent` | `boltd/<version>` |
/// | `default_database` | `neo4j` |
/// | `max_message_size` | 16 MiB |
/// | `max_chunk_size` | 16 KiB |
/// | `output_flush_threshold` | 8 KiB |
/// | `supported_versions` | `[2, 1]` |
/// | `close_on_auth_failure` | `true` |
/// | `failure_policy` | per protocol version |
/// | `handshake_timeout` | 10 s |
/// | `users` | empty (authentication disabled) |
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen_address: String,
    /// Agent string reported as `server` in the INIT response.
    pub server_agent: String,
    /// Database used when RUN does not name one.
    pub default_database: String,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
    /// Largest outbound chunk, in bytes.
    pub max_chunk_size: usize,
    /// Completed output is handed to the socket once this many bytes are
    /// pending, even if more requests are queued.
    pub output_flush_threshold: usize,
    /// Versions offered in the handshake, most preferred first.
    #[serde(deserialize_with = "deserialize_versions")]
    pub supported_versions: Vec<BoltVersion>,
    /// Whether a failed INIT ends the connection.
    pub close_on_auth_failure: bool,
    /// Overrides the negotiated version's failure policy when set.
    pub failure_policy: Option<FailurePolicy>,
    /// Handshake timeout, in seconds in config files.
    #[serde(deserialize_with = "deserialize_secs")]
    pub handshake_timeout: Duration,
    pub users: Vec<UserConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:7687".to_string(),
            server_agent: format!("boltd/{}", env!("CARGO_PKG_VERSION")),
            default_database: "neo4j".to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            output_flush_threshold: 8 * 1024,
            supported_versions: BoltVersion::ALL.to_vec(),
            close_on_auth_failure: true,
            failure_policy: None,
            handshake_timeout: Duration::from_secs(10),
            users: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config file. Missing fields keep their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> ServerResult<Self> {
        let config: ServerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> ServerResult<()> {
        if self.supported_versions.is_empty() {
            return Err(ServerError::InvalidConfig(
                "supported_versions must name at least one version".to_string(),
            ));
        }
        if self.max_chunk_size == 0 || self.max_chunk_size > u16::MAX as usize {
            return Err(ServerError::InvalidConfig(format!(
                "max_chunk_size must be between 1 and {}, got {}",
                u16::MAX,
                self.max_chunk_size
            )));
        }
        if self.max_message_size == 0 {
            return Err(ServerError::InvalidConfig(
                "max_message_size must be positive".to_string(),
            ));
        }
        if self.default_database.is_empty() {
            return Err(ServerError::InvalidConfig(
                "default_database must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured failure policy, or the negotiated version's `default`.
    pub fn failure_policy_for(&self, default: FailurePolicy) -> FailurePolicy {
        self.failure_policy.unwrap_or(default)
    }

    /// Authentication provider for the configured user table.
    pub fn authentication(&self) -> Arc<dyn Authentication> {
        if self.users.is_empty() {
            Arc::new(NoAuthentication)
        } else {
            Arc::new(BasicAuthentication::new(self.users.iter().cloned()))
        }
    }

    pub fn with_listen_address(mut self, address: impl Into<String>) -> Self {
        self.listen_address = address.into();
        self
    }

    pub fn with_server_agent(mut self, agent: impl Into<String>) -> Self {
        self.server_agent = agent.into();
        self
    }

    pub fn with_default_database(mut self, database: impl Into<String>) -> Self {
        self.default_database = database.into();
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_max_chunk_size(mut self, size: usize) -> Self {
        self.max_chunk_size = size;
        self
    }

    pub fn with_output_flush_threshold(mut self, threshold: usize) -> Self {
        self.output_flush_threshold = threshold;
        self
    }

    pub fn with_supported_versions(mut self, versions: Vec<BoltVersion>) -> Self {
        self.supported_versions = versions;
        self
    }

    pub fn with_close_on_auth_failure(mut self, close: bool) -> Self {
        self.close_on_auth_failure = close;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_user(mut self, user: UserConfig) -> Self {
        self.users.push(user);
        self
    }
}

fn deserialize_versions<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<BoltVersion>, D::Error> {
    let raw = Vec::<u32>::deserialize(d)?;
    raw.into_iter()
        .map(|v| {
            BoltVersion::try_from(v)
                .map_err(|v| serde::de::Error::custom(format!("unsupported Bolt version {}", v)))
        })
        .collect()
}

fn deserialize_secs<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_secs)
}
