//! Server configuration.
//!
//! Layered typed sections with `#[serde(default = "...")]` fallbacks,
//! loaded from an optional file plus `PARSEC_`-prefixed environment
//! variables.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub ballpark: BallparkSettings,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Organizations to seed on startup, each with its one-time bootstrap
    /// token (spec.md §2: "per-organization bootstrap tokens source").
    /// Re-applying the same seed list on every restart is a no-op for
    /// organizations that already exist.
    #[serde(default)]
    pub organizations: Vec<OrganizationSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds to let in-flight requests finish during graceful shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("invalid socket address")
    }

    pub fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Which [`parsec_db::Datamodel`]/[`parsec_db::Blockstore`] backend to run
/// against. `postgres_url: None` (the default) keeps the in-memory
/// datamodel and blockstore, the same thing `AppState::test` uses, so the
/// server runs out of the box with no external dependency.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub postgres_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Number of `MemoryBlockstore` nodes to stripe block payloads across
    /// with XOR parity (spec.md §3: "RAID5-style", §9). `1` (the default)
    /// skips striping entirely and stores blocks directly.
    #[serde(default = "default_blockstore_node_count")]
    pub blockstore_node_count: usize,
}

/// Ballpark window offsets (spec.md §4.3, §8 Glossary "Ballpark"),
/// overriding [`parsec_certs::BallparkConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallparkSettings {
    #[serde(default = "default_ballpark_early")]
    pub client_early_offset_secs: i64,

    #[serde(default = "default_ballpark_late")]
    pub client_late_offset_secs: i64,
}

impl Default for BallparkSettings {
    fn default() -> Self {
        Self {
            client_early_offset_secs: default_ballpark_early(),
            client_late_offset_secs: default_ballpark_late(),
        }
    }
}

impl From<BallparkSettings> for parsec_certs::BallparkConfig {
    fn from(settings: BallparkSettings) -> Self {
        parsec_certs::BallparkConfig {
            client_early_offset_secs: settings.client_early_offset_secs,
            client_late_offset_secs: settings.client_late_offset_secs,
        }
    }
}

/// SSE event bus tuning (spec.md §2: "SSE replay-buffer size", §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_replay_buffer_size")]
    pub replay_buffer_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { replay_buffer_size: default_replay_buffer_size() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `"json"` or `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationSeed {
    pub id: String,
    pub bootstrap_token: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6770
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    20
}

fn default_blockstore_node_count() -> usize {
    1
}

fn default_ballpark_early() -> i64 {
    300
}

fn default_ballpark_late() -> i64 {
    320
}

fn default_replay_buffer_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl ServerConfig {
    /// Load from an optional config file plus `PARSEC_`-prefixed
    /// environment variables (`PARSEC__SERVER__PORT=6771`, etc.), falling
    /// back to defaults if nothing is found or deserialization fails.
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("PARSEC").separator("__").try_parsing(true));

        let config = builder.build()?;
        let server_config: ServerConfig = config.try_deserialize().unwrap_or_else(|_| {
            tracing::warn!("using default configuration - some settings may need adjustment");
            ServerConfig::default()
        });
        Ok(server_config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            database: DatabaseConfig::default(),
            ballpark: BallparkSettings::default(),
            events: EventsConfig::default(),
            logging: LoggingConfig::default(),
            organizations: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_in_memory_database() {
        let config = ServerConfig::default();
        assert!(config.database.postgres_url.is_none());
        assert_eq!(config.server.port, 6770);
    }

    #[test]
    fn ballpark_settings_convert_to_engine_config() {
        let settings = BallparkSettings { client_early_offset_secs: 10, client_late_offset_secs: 20 };
        let ballpark: parsec_certs::BallparkConfig = settings.into();
        assert_eq!(ballpark.client_early_offset_secs, 10);
        assert_eq!(ballpark.client_late_offset_secs, 20);
    }
}
