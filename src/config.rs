//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via PUSHGATE_CONFIG or --config)
//! 3. Environment variables

use pushgate_client::{ClientConfig, ConnectionConfig, Endpoint, Environment, TlsClientConfig};
use pushgate_protocol::{DEFAULT_FEEDBACK_PORT, DEFAULT_GATEWAY_PORT, MAX_PAYLOAD_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// pushgate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway and feedback addresses.
    pub gateway: GatewayConfig,
    /// TLS configuration.
    pub tls: TlsConfig,
    /// Connection timeouts.
    pub timeouts: TimeoutConfig,
    /// Payload limits.
    pub payload: PayloadConfig,
}

impl Config {
    /// Loads configuration from `path` if given, then applies environment
    /// variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        self.gateway.apply_env_overrides();
        self.tls.apply_env_overrides();
        self.timeouts.apply_env_overrides();
        self.payload.apply_env_overrides();
    }

    /// Validates the configuration and builds the client configuration.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        self.tls.validate()?;
        if self.payload.max_size == 0 {
            return Err(ConfigError::Validation(
                "payload.max_size must be positive".to_string(),
            ));
        }

        let (gateway, feedback) = self.gateway.endpoints()?;

        let mut connection = ConnectionConfig::new(gateway.host.clone(), gateway.port)
            .with_connect_timeout(Duration::from_secs(self.timeouts.connect_secs))
            .with_read_timeout(Duration::from_secs(self.timeouts.read_secs))
            .with_idle_timeout(Duration::from_secs(self.timeouts.idle_secs))
            .with_error_wait(Duration::from_secs(self.timeouts.error_wait_secs))
            .with_max_payload_size(self.payload.max_size);
        if let Some(tls) = self.tls.client_config() {
            connection = connection.with_tls(tls);
        }

        let mut config = ClientConfig::new(gateway)
            .with_connection(connection)
            .with_max_send_attempts(self.gateway.max_send_attempts);
        if let Some(feedback) = feedback {
            config = config.with_feedback(feedback);
        }
        Ok(config)
    }
}

/// Gateway addresses.
///
/// An explicit `host` takes precedence over `platform`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Well-known deployment: `production` or `sandbox`.
    pub platform: String,
    /// Explicit gateway host.
    pub host: Option<String>,
    /// Explicit gateway port.
    pub port: Option<u16>,
    /// Explicit feedback host. Only used with an explicit gateway host.
    pub feedback_host: Option<String>,
    /// Explicit feedback port.
    pub feedback_port: Option<u16>,
    /// Connections tried for one notification.
    pub max_send_attempts: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            platform: "sandbox".to_string(),
            host: None,
            port: None,
            feedback_host: None,
            feedback_port: None,
            max_send_attempts: 3,
        }
    }
}

impl GatewayConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(platform) = std::env::var("PUSHGATE_PLATFORM") {
            self.platform = platform;
        }
    }

    fn endpoints(&self) -> Result<(Endpoint, Option<Endpoint>), ConfigError> {
        if let Some(host) = &self.host {
            let gateway = Endpoint::new(host.clone(), self.port.unwrap_or(DEFAULT_GATEWAY_PORT));
            let feedback = self.feedback_host.as_ref().map(|feedback_host| {
                Endpoint::new(
                    feedback_host.clone(),
                    self.feedback_port.unwrap_or(DEFAULT_FEEDBACK_PORT),
                )
            });
            return Ok((gateway, feedback));
        }

        let environment: Environment = self
            .platform
            .parse()
            .map_err(ConfigError::Validation)?;
        let mut gateway = environment.gateway();
        if let Some(port) = self.port {
            gateway.port = port;
        }
        let mut feedback = environment.feedback();
        if let Some(port) = self.feedback_port {
            feedback.port = port;
        }
        Ok((gateway, Some(feedback)))
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Connect over TLS. Only local test gateways run without it.
    pub enabled: bool,
    /// Path to the PEM-encoded provider certificate.
    pub cert_path: Option<PathBuf>,
    /// Path to the PEM-encoded private key. Read from `cert_path` if unset.
    pub key_path: Option<PathBuf>,
    /// Path to PEM-encoded CA certificate(s). Web PKI roots if unset.
    pub ca_cert_path: Option<PathBuf>,
    /// Server name for SNI (defaults to the gateway host).
    pub server_name: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cert_path: None,
            key_path: None,
            ca_cert_path: None,
            server_name: None,
        }
    }
}

impl TlsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("PUSHGATE_CERT") {
            self.cert_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("PUSHGATE_KEY") {
            self.key_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("PUSHGATE_CA_CERT") {
            self.ca_cert_path = Some(PathBuf::from(path));
        }
    }

    /// Validates TLS configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.cert_path.is_none() {
            return Err(ConfigError::Validation(
                "TLS enabled but cert_path not set".to_string(),
            ));
        }
        Ok(())
    }

    fn client_config(&self) -> Option<TlsClientConfig> {
        if !self.enabled {
            return None;
        }
        let mut tls = TlsClientConfig::new();
        if let Some(cert) = &self.cert_path {
            tls = tls.with_client_cert(cert.clone(), self.key_path.clone());
        }
        if let Some(ca) = &self.ca_cert_path {
            tls = tls.with_ca_cert(ca.clone());
        }
        if let Some(name) = &self.server_name {
            tls = tls.with_server_name(name.clone());
        }
        Some(tls)
    }
}

/// Timeouts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    pub read_secs: u64,
    /// Retire a connection unused for this long.
    pub idle_secs: u64,
    /// Wait this long after the last send for a late error before closing.
    pub error_wait_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            read_secs: 10,
            idle_secs: 30,
            error_wait_secs: 60,
        }
    }
}

impl TimeoutConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(timeout) = std::env::var("PUSHGATE_IDLE_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.idle_secs = secs;
            }
        }
        if let Ok(wait) = std::env::var("PUSHGATE_ERROR_WAIT") {
            if let Ok(secs) = wait.parse() {
                self.error_wait_secs = secs;
            }
        }
    }
}

/// Payload limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadConfig {
    /// Payload budget in bytes.
    pub max_size: usize,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            max_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl PayloadConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(max) = std::env::var("PUSHGATE_MAX_PAYLOAD") {
            if let Ok(n) = max.parse() {
                self.max_size = n;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
