use std::sync::{Arc, PoisonError, RwLock};

use katana_payload::{codec, Map, Path, PathDocument, Value};
use tracing::debug;

use crate::config::RegistryConfig;
use crate::error::{Result, SchemaError};
use crate::service::ServiceSchema;
use crate::versions::VersionString;

/// Holds the latest schema mappings: `{service: {version: schema}}`.
///
/// Updates replace the whole table. Readers take a [`SchemaSnapshot`] and
/// keep using it for the rest of their request.
pub struct SchemaRegistry {
    current: RwLock<Arc<SchemaSnapshot>>,
    config: RegistryConfig,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        let empty = SchemaSnapshot::new(Map::new(), &config);
        Self {
            current: RwLock::new(Arc::new(empty)),
            config,
        }
    }

    /// Replace the mappings table.
    pub fn update(&self, mappings: Map) {
        let services = mappings.len();
        let snapshot = Arc::new(SchemaSnapshot::new(mappings, &self.config));
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
        debug!(services, "schema mappings updated");
    }

    /// Decode and install an encoded mappings table.
    pub fn update_from_bytes(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.config.max_mappings_size {
            return Err(SchemaError::MappingsTooLarge {
                size: bytes.len(),
                max: self.config.max_mappings_size,
            });
        }
        let mappings = codec::unpack_document(bytes, None)?.into_map();
        self.update(mappings);
        Ok(())
    }

    /// The current table.
    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn has_mappings(&self) -> bool {
        self.snapshot().has_mappings()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.snapshot().service_names()
    }

    pub fn service_schema(&self, name: &str, version: &str) -> Result<ServiceSchema> {
        self.snapshot().service_schema(name, version)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A read-only view of one mappings table.
#[derive(Debug)]
pub struct SchemaSnapshot {
    mappings: PathDocument,
}

impl SchemaSnapshot {
    fn new(mappings: Map, config: &RegistryConfig) -> Self {
        Self {
            mappings: PathDocument::from_map(mappings, config.field_names.clone()),
        }
    }

    pub fn has_mappings(&self) -> bool {
        !self.mappings.as_map().is_empty()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.mappings.as_map().keys().cloned().collect()
    }

    /// Schema for a service, resolving `*` in `version` to the highest
    /// known match.
    pub fn service_schema(&self, name: &str, version: &str) -> Result<ServiceSchema> {
        let not_found = || SchemaError::ServiceNotFound {
            service: name.to_string(),
            version: version.to_string(),
        };

        let versions = self
            .mappings
            .get(Path::default().raw(name))
            .and_then(Value::as_map)
            .ok_or_else(not_found)?;

        let pattern = VersionString::new(version).map_err(|_| not_found())?;
        let resolved = pattern
            .resolve(versions.keys().map(String::as_str))
            .map_err(|_| not_found())?;

        let schema = versions
            .get(resolved)
            .cloned()
            .ok_or_else(not_found)?;
        let document = PathDocument::from_value(schema, self.mappings.names().cloned())
            .map_err(|_| not_found())?;
        Ok(ServiceSchema::new(name, resolved, document))
    }
}
