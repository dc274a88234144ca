//! Configuration for fiskusd

use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Daywatch configuration
    #[serde(default)]
    pub daywatch: DaywatchSection,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (for development/testing)
    Memory,

    /// PostgreSQL storage
    Postgres {
        /// Connection URL
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Connection timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

impl StorageConfig {
    pub fn mode(&self) -> &'static str {
        match self {
            StorageConfig::Memory => "memory",
            StorageConfig::Postgres { .. } => "postgres",
        }
    }

    /// Postgres storage with default pool sizing.
    pub fn postgres(url: impl Into<String>) -> Self {
        StorageConfig::Postgres {
            url: url.into(),
            max_connections: default_pool_size(),
            connect_timeout_secs: default_connection_timeout(),
        }
    }
}

/// Daywatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaywatchSection {
    /// Sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Minutes after midnight during which closed days are opened
    #[serde(default = "default_window_minutes")]
    pub open_window_minutes: u32,

    /// Minutes before midnight during which open days are closed
    #[serde(default = "default_window_minutes")]
    pub close_window_minutes: u32,
}

impl Default for DaywatchSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            open_window_minutes: 30,
            close_window_minutes: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// Default value helpers
fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_window_minutes() -> u32 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from defaults, an optional file and the
    /// FISKUS_ environment.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("FISKUS")
                .separator("_")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_runs_in_memory() {
        let config = DaemonConfig::default();
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert_eq!(config.storage.mode(), "memory");
        assert_eq!(config.daywatch.sweep_interval_secs, 60);
    }

    #[test]
    fn daywatch_defaults_match_the_legal_windows() {
        let section = DaywatchSection::default();
        assert_eq!(section.open_window_minutes, 30);
        assert_eq!(section.close_window_minutes, 30);
    }

    #[test]
    fn postgres_section_deserializes_with_defaults() {
        let section: StorageConfig = serde_json::from_str(
            r#"{ "type": "postgres", "url": "postgres://localhost/fiskus" }"#,
        )
        .unwrap();
        match section {
            StorageConfig::Postgres {
                url,
                max_connections,
                connect_timeout_secs,
            } => {
                assert_eq!(url, "postgres://localhost/fiskus");
                assert_eq!(max_connections, 10);
                assert_eq!(connect_timeout_secs, 5);
            }
            other => panic!("expected postgres config, got {other:?}"),
        }
    }
}
