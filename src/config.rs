//! Server configuration.
//!
//! `galleyd` reads an optional YAML file into [`ServerConfig`] and then lets
//! command-line flags override individual values.
//!
//! ```yaml
//! host: 0.0.0.0
//! port: 8080
//! database_url: postgres://galley@localhost/galley
//! public_url: https://cloud.galley.run
//! cors_origins: [https://app.galley.run]
//! jwt:
//!   secret: change-me
//!   pepper: change-me-too
//! agents:
//!   handshake_limit_per_min: 60
//!   request_timeout_secs: 30
//!   require_token: true
//! oauth:
//!   github: { client_id: abc, client_secret: def }
//!   gitlab: { client_id: abc, client_secret: def, site: https://gitlab.example.com }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::jwt::DEFAULT_AGENT_TOKEN_TTL_SECS;

/// Errors raised while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(std::io::Error),
    /// The file is not valid YAML for [`ServerConfig`].
    Parse(String),
    /// A required value is missing or unusable.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config: {}", e),
            ConfigError::Parse(msg) => write!(f, "failed to parse config: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

/// Token signing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// HS256 signing secret.
    pub secret: String,
    /// Keys refresh-token hashes and derives the credential vault key.
    pub pepper: String,
    pub agent_token_ttl_secs: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            pepper: String::new(),
            agent_token_ttl_secs: DEFAULT_AGENT_TOKEN_TTL_SECS,
        }
    }
}

/// Agent tunnel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Handshakes accepted per client IP per minute.
    pub handshake_limit_per_min: u32,
    /// How long an HTTP request waits for an agent reply.
    pub request_timeout_secs: u64,
    /// Require a valid agent token on every handshake.
    pub require_token: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            handshake_limit_per_min: 60,
            request_timeout_secs: 30,
            require_token: false,
        }
    }
}

/// Client registration at one OAuth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Base URL for self-hosted providers (GitLab).
    #[serde(default)]
    pub site: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub github: Option<OAuthProviderConfig>,
    pub gitlab: Option<OAuthProviderConfig>,
    pub bitbucket: Option<OAuthProviderConfig>,
    pub dockerhub: Option<OAuthProviderConfig>,
}

/// Everything `galleyd` needs to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Externally visible base URL, used for OAuth redirect URIs.
    pub public_url: String,
    pub cors_origins: Vec<String>,
    pub jwt: JwtConfig,
    pub agents: AgentConfig,
    pub oauth: OAuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            database_url: String::new(),
            public_url: "http://localhost:8080".to_string(),
            cors_origins: Vec::new(),
            jwt: JwtConfig::default(),
            agents: AgentConfig::default(),
            oauth: OAuthConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parses a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads and parses a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    /// Checks the values the server cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::Invalid("database_url is required".to_string()));
        }
        if self.jwt.secret.is_empty() {
            return Err(ConfigError::Invalid("jwt.secret is required".to_string()));
        }
        if self.jwt.pepper.is_empty() {
            return Err(ConfigError::Invalid("jwt.pepper is required".to_string()));
        }
        if self.agents.handshake_limit_per_min == 0 {
            return Err(ConfigError::Invalid(
                "agents.handshake_limit_per_min must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The listen address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
