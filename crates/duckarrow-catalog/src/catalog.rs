//! Attached-database catalog
//!
//! One catalog per ATTACH, holding the connection opened at attach time
//! and a lazily populated, case-sensitively keyed schema cache.

use crate::read_only;
use crate::schema::RemoteSchemaEntry;
use dashmap::DashMap;
use duckarrow_common::validation::validate_uri;
use duckarrow_common::{ConnectionConfig, Result};
use duckarrow_flight::FlightClient;
use std::sync::Arc;

/// Key-value options accepted by ATTACH. Unknown keys are ignored, like
/// any other storage extension's.
#[derive(Debug, Clone, Default)]
pub struct AttachOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub skip_verify: Option<bool>,
}

impl AttachOptions {
    pub fn from_pairs<I, K, V>(pairs: I) -> AttachOptions
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = AttachOptions::default();
        for (key, value) in pairs {
            match key.as_ref().to_ascii_lowercase().as_str() {
                "username" | "user" => options.username = Some(value.as_ref().to_string()),
                "password" => options.password = Some(value.as_ref().to_string()),
                "token" => options.token = Some(value.as_ref().to_string()),
                "skip_verify" => {
                    options.skip_verify = Some(matches!(
                        value.as_ref().to_ascii_lowercase().as_str(),
                        "true" | "1" | "yes"
                    ))
                }
                other => tracing::debug!(option = other, "ignoring unknown ATTACH option"),
            }
        }
        options
    }

    /// Attach-time credentials win; anything missing falls back to the
    /// global config snapshot.
    pub fn into_config(
        self,
        uri: &str,
        fallback: Option<Arc<ConnectionConfig>>,
    ) -> ConnectionConfig {
        let fallback = fallback.as_deref();
        ConnectionConfig {
            uri: uri.to_string(),
            username: self
                .username
                .or_else(|| fallback.map(|f| f.username.clone()))
                .unwrap_or_default(),
            password: self
                .password
                .or_else(|| fallback.map(|f| f.password.clone()))
                .unwrap_or_default(),
            token: self.token.or_else(|| fallback.and_then(|f| f.token.clone())),
            skip_verify: self
                .skip_verify
                .or(fallback.map(|f| f.skip_verify))
                .unwrap_or(false),
        }
    }
}

/// Catalog for one attached Flight SQL database.
#[derive(Debug)]
pub struct RemoteCatalog {
    name: String,
    config: ConnectionConfig,
    client: Arc<FlightClient>,
    schemas: DashMap<String, Arc<RemoteSchemaEntry>>,
}

impl RemoteCatalog {
    /// Validate the URI and open the connection up front, so ATTACH
    /// fails fast instead of on first query.
    pub async fn attach(
        name: &str,
        uri: &str,
        options: AttachOptions,
        global_fallback: Option<Arc<ConnectionConfig>>,
    ) -> Result<Arc<RemoteCatalog>> {
        validate_uri(uri)?;
        let config = options.into_config(uri, global_fallback);
        let client = Arc::new(FlightClient::connect(&config).await?);
        tracing::info!(name, uri, "attached Flight SQL database");

        Ok(Arc::new(RemoteCatalog {
            name: name.to_string(),
            config,
            client,
            schemas: DashMap::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> &str {
        &self.config.uri
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Cache-first schema lookup. The remote may not pre-declare
    /// schemas, so existence is not verified here; it surfaces on first
    /// table access.
    pub fn lookup_schema(&self, schema_name: &str) -> Arc<RemoteSchemaEntry> {
        if let Some(entry) = self.schemas.get(schema_name) {
            return entry.value().clone();
        }
        let entry = Arc::new(RemoteSchemaEntry::new(
            schema_name,
            self.client.clone(),
            self.config.clone(),
        ));
        self.schemas
            .entry(schema_name.to_string())
            .or_insert(entry)
            .value()
            .clone()
    }

    /// Materialize a schema entry for every schema the remote reports.
    pub async fn scan_schemas(&self) -> Result<Vec<Arc<RemoteSchemaEntry>>> {
        let names = self.client.get_schemas().await?;
        Ok(names.iter().map(|name| self.lookup_schema(name)).collect())
    }

    pub fn create_schema(&self, _name: &str) -> Result<()> {
        read_only("CREATE SCHEMA")
    }

    pub fn drop_schema(&self, _name: &str) -> Result<()> {
        read_only("DROP SCHEMA")
    }

    /// Close the catalog's connection and drop the cached entries.
    pub fn detach(&self) {
        self.client.close();
        self.schemas.clear();
        tracing::info!(name = %self.name, "detached Flight SQL database");
    }
}
