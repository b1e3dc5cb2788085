//! Table-oriented data store client.
//!
//! The application talks to its data through [`TableStore`], a small
//! select/insert/update/delete/count interface with equality, ordering and
//! pagination filters. Two backends implement it:
//!
//! - [`PostgrestStore`] speaks the PostgREST dialect used by hosted
//!   Supabase projects.
//! - [`SqliteStore`] keeps the same tables in a local SQLite file and is used
//!   for development and tests.
//!
//! Hosted stores distinguish a restricted key from a service-role key;
//! [`StoreClients`] carries one client per [`Privilege`].

pub mod postgrest;
pub mod query;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::{Config, StoreBackend};

pub use postgrest::PostgrestStore;
pub use query::{Direction, Filter, Query, Row};
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("store returned no rows for {0}")]
    EmptyResult(String),

    #[error("row range out of bounds: {0}")]
    Range(u64),

    #[error("blocking store task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),

    #[error("invalid store URL: {0}")]
    Url(#[from] url::ParseError),
}

#[async_trait]
pub trait TableStore: Send + Sync {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError>;

    async fn count(&self, query: &Query) -> Result<u64, StoreError>;

    /// Insert one row and return it as stored.
    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError>;

    /// Apply `changes` to every row matching the query's filters.
    async fn update(&self, query: &Query, changes: Row) -> Result<Vec<Row>, StoreError>;

    /// Delete every row matching the query's filters. Returns the number removed.
    async fn delete(&self, query: &Query) -> Result<u64, StoreError>;

    async fn first(&self, query: &Query) -> Result<Option<Row>, StoreError> {
        let limited = query.clone().range(0, 1);
        Ok(self.select(&limited).await?.into_iter().next())
    }
}

/// Deserialize a store row into a typed record.
pub fn decode<T: DeserializeOwned>(row: Row) -> Result<T, StoreError> {
    Ok(serde_json::from_value(serde_json::Value::Object(row))?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// Public key, subject to row-level policies.
    Restricted,
    /// Server-side key that bypasses row-level policies.
    ServiceRole,
}

#[derive(Clone)]
pub struct StoreClients {
    restricted: Arc<dyn TableStore>,
    service: Arc<dyn TableStore>,
}

impl StoreClients {
    pub fn new(restricted: Arc<dyn TableStore>, service: Arc<dyn TableStore>) -> Self {
        Self {
            restricted,
            service,
        }
    }

    /// Use one client for both privilege levels (local stores have no policies).
    pub fn shared(store: Arc<dyn TableStore>) -> Self {
        Self {
            restricted: store.clone(),
            service: store,
        }
    }

    pub fn get(&self, privilege: Privilege) -> &dyn TableStore {
        match privilege {
            Privilege::Restricted => self.restricted.as_ref(),
            Privilege::ServiceRole => self.service.as_ref(),
        }
    }

    pub fn service(&self) -> &dyn TableStore {
        self.get(Privilege::ServiceRole)
    }

    pub fn service_arc(&self) -> Arc<dyn TableStore> {
        self.service.clone()
    }
}

/// Build the store clients selected by configuration.
pub fn connect(config: &Config) -> anyhow::Result<StoreClients> {
    match config.store.backend {
        StoreBackend::Postgrest => {
            if config.store.url.is_empty() {
                anyhow::bail!("store.url (SUPABASE_URL) is required for the postgrest backend");
            }
            let restricted = PostgrestStore::new(&config.store.url, &config.store.anon_key)?;
            let service = PostgrestStore::new(&config.store.url, &config.store.service_role_key)?;
            tracing::info!("Using PostgREST store at {}", config.store.url);
            Ok(StoreClients::new(Arc::new(restricted), Arc::new(service)))
        }
        StoreBackend::Sqlite => {
            let path = config.db_path();
            let store = SqliteStore::open(&path)?;
            tracing::info!("Using SQLite store at {}", path.display());
            Ok(StoreClients::shared(Arc::new(store)))
        }
    }
}
