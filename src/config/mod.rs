//! Application configuration.
//!
//! Loaded from `config.yaml` and `DSS__`-prefixed environment variables;
//! command-line flags on the binaries override individual fields.

use serde::Deserialize;

use crate::geo::Winding;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Store configuration.
    pub store: StoreConfig,
    /// Authentication configuration.
    pub auth: AuthConfig,
    /// Geometry configuration.
    pub geo: GeoConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Sources in priority order (later overrides earlier):
    /// 1. `config.yaml` in the current directory, if present
    /// 2. The file at `path`, when given
    /// 3. Environment variables with the `DSS` prefix (`DSS__STORE__URI`)
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new("config", FileFormat::Yaml).required(false))
            .add_source(File::new("config.yaml", FileFormat::Yaml).required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::new(path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("DSS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

/// gRPC server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
        }
    }
}

impl ServerConfig {
    /// The socket address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Override host and port from a combined `host:port` flag value.
    pub fn set_addr(&mut self, addr: &str) {
        if let Some((host, port)) = addr.rsplit_once(':') {
            if let Ok(port) = port.parse() {
                self.host = host.to_string();
                self.port = port;
            }
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database DSN.
    pub uri: String,
    /// Connect timeout at startup, in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: "postgres://root@localhost:26257/dss?sslmode=disable".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Path to the PEM public key used to verify bearer tokens.
    pub public_key_file: String,
}

/// Geometry configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// Winding order expected of client polygon strings.
    pub winding: Winding,
}
