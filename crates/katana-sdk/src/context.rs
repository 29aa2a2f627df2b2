use std::collections::BTreeMap;
use std::sync::Arc;

use katana_payload::{FieldNames, Value};
use katana_schema::{RegistryConfig, SchemaRegistry, ServiceSchema};
use tracing::debug;

use crate::component::Component;
use crate::config::DispatcherConfig;
use crate::error::Result;
use crate::runtime::RuntimeCaller;

/// Logged values are cut to this many characters.
pub const MAX_LOG_CHARS: usize = 100_000;

/// Name and versions of a running component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
    pub name: String,
    pub version: String,
    pub framework_version: String,
}

impl ComponentInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        framework_version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            framework_version: framework_version.into(),
        }
    }
}

/// Everything a handler can reach besides its request: component
/// identity, configuration, resources, schemas and the runtime caller.
pub struct Context {
    info: ComponentInfo,
    config: DispatcherConfig,
    component: Arc<Component>,
    registry: Arc<SchemaRegistry>,
    runtime: Option<Arc<dyn RuntimeCaller>>,
}

impl Context {
    pub fn new(component: Arc<Component>, info: ComponentInfo, config: DispatcherConfig) -> Self {
        let registry = SchemaRegistry::with_config(
            RegistryConfig::default().with_field_names(config.field_names.clone()),
        );
        Self {
            info,
            config,
            component,
            registry: Arc::new(registry),
            runtime: None,
        }
    }

    /// Share an existing registry instead of a private one.
    pub fn with_registry(mut self, registry: Arc<SchemaRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<dyn RuntimeCaller>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn info(&self) -> &ComponentInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn version(&self) -> &str {
        &self.info.version
    }

    pub fn framework_version(&self) -> &str {
        &self.info.framework_version
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn field_names(&self) -> Option<&FieldNames> {
        self.config.field_names.as_ref()
    }

    pub fn is_debug(&self) -> bool {
        self.config.debug
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.config.variables
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.config.variables.get(name).map(String::as_str)
    }

    pub fn component(&self) -> &Arc<Component> {
        &self.component
    }

    pub fn resource<T: std::any::Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        self.component.resource(name)
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn runtime(&self) -> Option<&Arc<dyn RuntimeCaller>> {
        self.runtime.as_ref()
    }

    /// Schema of a service, resolving wildcard versions.
    pub fn service_schema(&self, name: &str, version: &str) -> Result<ServiceSchema> {
        Ok(self.registry.service_schema(name, version)?)
    }

    /// Log a value at debug level when debug mode is on.
    pub fn log(&self, value: &Value) {
        if self.config.debug {
            debug!(component = %self.info.name, "{}", log_string(value));
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("info", &self.info)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Text form of a value for logs, cut to [`MAX_LOG_CHARS`].
pub fn log_string(value: &Value) -> String {
    let text = match value {
        Value::String(text) => text.clone(),
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|err| format!("<{err}>")),
    };
    match text.char_indices().nth(MAX_LOG_CHARS) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text,
    }
}
