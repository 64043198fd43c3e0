//! Environment-driven configuration for the store backend.

use std::sync::Arc;

use thiserror::Error;

use crate::error::StoreError;
use crate::store::{InMemoryStore, PostgresStore, Store};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Which store backs the services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

impl StoreConfig {
    /// Reads `TRADEERP_STORE`, `DATABASE_URL` and `TRADEERP_DB_MAX_CONNECTIONS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let kind = lookup("TRADEERP_STORE").unwrap_or_else(|| "memory".to_string());

        let backend = match kind.as_str() {
            "memory" => StoreBackend::Memory,
            "postgres" => {
                let database_url =
                    lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
                let max_connections = match lookup("TRADEERP_DB_MAX_CONNECTIONS") {
                    None => DEFAULT_MAX_CONNECTIONS,
                    Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                        key: "TRADEERP_DB_MAX_CONNECTIONS",
                        value: raw,
                    })?,
                };
                StoreBackend::Postgres {
                    database_url,
                    max_connections,
                }
            }
            _ => {
                return Err(ConfigError::Invalid {
                    key: "TRADEERP_STORE",
                    value: kind,
                });
            }
        };

        Ok(Self { backend })
    }

    /// Build the configured store. Postgres schemas are migrated on connect.
    pub async fn connect(&self) -> Result<Arc<dyn Store>, StoreError> {
        match &self.backend {
            StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
            StoreBackend::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresStore::connect(database_url, *max_connections).await?;
                store.migrate().await?;
                Ok(Arc::new(store))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_to_memory() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.backend, StoreBackend::Memory);
    }

    #[test]
    fn postgres_requires_database_url() {
        let err = StoreConfig::from_lookup(lookup(&[("TRADEERP_STORE", "postgres")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn postgres_reads_pool_size() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("TRADEERP_STORE", "postgres"),
            ("DATABASE_URL", "postgres://localhost/tradeerp"),
            ("TRADEERP_DB_MAX_CONNECTIONS", "12"),
        ]))
        .unwrap();
        assert_eq!(
            config.backend,
            StoreBackend::Postgres {
                database_url: "postgres://localhost/tradeerp".to_string(),
                max_connections: 12,
            }
        );
    }

    #[test]
    fn rejects_unknown_backend() {
        let err = StoreConfig::from_lookup(lookup(&[("TRADEERP_STORE", "sqlite")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TRADEERP_STORE", .. }));
    }
}
