use std::time::Duration;

use config::{Config, ConfigError};
use serde::Deserialize;

use crate::domain::core::Money;

pub mod domain;
pub mod infrastructure;

#[derive(Clone, Debug, Deserialize)]
pub struct BookingConfig {
    pub server: Server,
    pub storage: Storage,
    pub allocation: Allocation,
    pub logger: Logger,
    #[serde(default)]
    pub hotels: Vec<HotelSeed>,
}

impl BookingConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("server.bind", "0.0.0.0:8080")?
            .set_default("storage.kind", "memory")?
            .set_default("allocation.max_attempts", 10)?
            .set_default("allocation.insert_attempts", 5)?
            .set_default("allocation.deadline_ms", 5000)?
            .set_default("logger.level", "INFO")?
            .add_source(config::File::with_name("booking").required(false))
            .add_source(config::Environment::with_prefix("BOOKING").separator("__"))
            .build()?
            .try_deserialize::<BookingConfig>()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Server {
    pub bind: String,
}

/// Where reservations and hotels are kept
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Storage {
    Memory,
    #[serde(rename = "eventstore")]
    EventStore {
        url: String,
        /// gRPC deadline for each write
        #[serde(default = "default_write_deadline_ms")]
        write_deadline_ms: u64,
    },
}

fn default_write_deadline_ms() -> u64 {
    10_000
}

#[derive(Clone, Debug, Deserialize)]
pub struct Allocation {
    /// Existence checks per allocation before giving up
    pub max_attempts: u32,
    /// Allocate-then-insert rounds per reservation request
    pub insert_attempts: u32,
    pub deadline_ms: u64,
}

impl Allocation {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// A hotel created at start-up by the in-memory backend
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct HotelSeed {
    pub name: String,
    pub price: Money,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Logger {
    pub level: Level,
}

#[derive(Clone, Debug, Deserialize)]
pub enum Level {
    TRACE,
    DEBUG,
    INFO,
    WARN,
    ERROR,
}

impl From<&Level> for tracing::Level {
    fn from(value: &Level) -> Self {
        match value {
            Level::TRACE => tracing::Level::TRACE,
            Level::DEBUG => tracing::Level::DEBUG,
            Level::INFO => tracing::Level::INFO,
            Level::WARN => tracing::Level::WARN,
            Level::ERROR => tracing::Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use config::{Config, File, FileFormat};

    use super::*;

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [server]
            bind = "127.0.0.1:9000"

            [storage]
            kind = "eventstore"
            url = "esdb://localhost:2113?tls=false"

            [allocation]
            max_attempts = 3
            insert_attempts = 2
            deadline_ms = 250

            [logger]
            level = "DEBUG"

            [[hotels]]
            name = "Harbour View"
            price = "150.00"
        "#;
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize::<BookingConfig>()
            .unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(
            config.storage,
            Storage::EventStore {
                url: "esdb://localhost:2113?tls=false".to_owned(),
                write_deadline_ms: 10_000,
            }
        );
        assert_eq!(config.allocation.max_attempts, 3);
        assert_eq!(config.allocation.deadline(), Duration::from_millis(250));
        assert_eq!(
            tracing::Level::from(&config.logger.level),
            tracing::Level::DEBUG
        );
        assert_eq!(
            config.hotels,
            vec![HotelSeed {
                name: "Harbour View".to_owned(),
                price: Money::from_cents(15000),
            }]
        );
    }

    #[test]
    fn test_memory_storage_needs_no_url() {
        let config = Config::builder()
            .add_source(File::from_str("kind = \"memory\"", FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize::<Storage>()
            .unwrap();
        assert_eq!(config, Storage::Memory);
    }
}
