//! Typed server configuration.
//!
//! `ServerOptions` is deserialized once (JSON value or YAML file) and is
//! immutable after the container is built from it; reloads construct a new
//! snapshot rather than mutating the old one. Components and instances are
//! registered as typed values on the snapshot — there is no runtime lookup
//! of configured type names.

use crate::engine::EngineComponent;
use crate::error::ServerError;
use serde::Deserialize;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default maximum request body size in bytes (1 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576;

const DEFAULT_ACCEPT_BACKLOG: u32 = 10_000;

/// TLS key material locations (PEM encoded).
#[derive(Debug, Clone, Deserialize)]
pub struct TlsOptions {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Typed component and instance registrations handed to the engine factory.
///
/// Carried outside the serialized configuration: the composition root
/// registers concrete values at startup instead of naming types in config.
#[derive(Clone, Default)]
pub struct Registrations {
    components: Vec<Arc<dyn EngineComponent>>,
    instances: Vec<Arc<dyn Any + Send + Sync>>,
}

impl Registrations {
    pub fn register_component(&mut self, component: Arc<dyn EngineComponent>) {
        self.components.push(component);
    }

    pub fn register_instance(&mut self, instance: Arc<dyn Any + Send + Sync>) {
        self.instances.push(instance);
    }

    pub fn components(&self) -> &[Arc<dyn EngineComponent>] {
        &self.components
    }

    pub fn instances(&self) -> &[Arc<dyn Any + Send + Sync>] {
        &self.instances
    }
}

impl fmt::Debug for Registrations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registrations")
            .field(
                "components",
                &self
                    .components
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect::<Vec<_>>(),
            )
            .field("instances", &self.instances.len())
            .finish()
    }
}

/// Immutable-after-init server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    /// Serve HTTPS using [`ServerOptions::tls`] material.
    pub ssl: bool,
    pub tls: Option<TlsOptions>,
    /// Read chunk size for body ingestion; `None` uses the 8 KiB default.
    pub receive_buffer_size: Option<usize>,
    pub accept_backlog: u32,
    base_path: String,
    pub max_body_size: usize,
    pub compression_enabled: bool,
    resources: Vec<String>,
    packages: Vec<String>,
    /// Free-form properties passed through to the engine factory.
    pub properties: serde_json::Map<String, Value>,
    #[serde(skip)]
    pub registrations: Registrations,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 80,
            ssl: false,
            tls: None,
            receive_buffer_size: None,
            accept_backlog: DEFAULT_ACCEPT_BACKLOG,
            base_path: "/".to_string(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            compression_enabled: false,
            resources: Vec::new(),
            packages: Vec::new(),
            properties: serde_json::Map::new(),
            registrations: Registrations::default(),
        }
    }
}

impl ServerOptions {
    /// Build options from a raw JSON configuration value.
    pub fn from_value(config: Value) -> Result<Self, ServerError> {
        serde_json::from_value(config)
            .map_err(|e| ServerError::Configuration(format!("invalid options: {e}")))
    }

    /// Build options from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&text).map_err(|e| {
            ServerError::Configuration(format!("invalid options in {}: {e}", path.display()))
        })
    }

    /// Kept for callers that still pass the runtime handle alongside the
    /// configuration; the handle is no longer consulted.
    #[deprecated(note = "use `from_value`; the runtime handle is ignored")]
    pub fn from_value_with_runtime(
        config: Value,
        _runtime: crate::runtime::RuntimeOptions,
    ) -> Result<Self, ServerError> {
        Self::from_value(config)
    }

    /// Resource packages for the engine: the `resources` entries followed by
    /// the `packages` entries.
    pub fn packages(&self) -> Vec<String> {
        self.resources
            .iter()
            .chain(self.packages.iter())
            .cloned()
            .collect()
    }

    pub fn add_package(&mut self, package: impl Into<String>) {
        self.packages.push(package.into());
    }

    /// Base path with a trailing slash.
    pub fn base_path(&self) -> String {
        if self.base_path.ends_with('/') {
            self.base_path.clone()
        } else {
            format!("{}/", self.base_path)
        }
    }

    pub fn set_base_path(&mut self, base_path: impl Into<String>) {
        self.base_path = base_path.into();
    }

    pub fn receive_buffer_size(&self) -> usize {
        self.receive_buffer_size.unwrap_or(8 * 1024)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let opts = ServerOptions::default();
        assert_eq!(opts.host, "0.0.0.0");
        assert_eq!(opts.port, 80);
        assert_eq!(opts.max_body_size, 1_048_576);
        assert_eq!(opts.accept_backlog, 10_000);
        assert_eq!(opts.base_path(), "/");
        assert!(!opts.ssl);
        assert!(!opts.compression_enabled);
        assert!(opts.packages().is_empty());
    }

    #[test]
    fn test_from_value() {
        let opts = ServerOptions::from_value(json!({
            "host": "127.0.0.1",
            "port": 8080,
            "max_body_size": 2048,
            "packages": ["app.resources"],
            "resources": ["app.extra"],
            "properties": { "trace": true }
        }))
        .unwrap();
        assert_eq!(opts.host, "127.0.0.1");
        assert_eq!(opts.port, 8080);
        assert_eq!(opts.max_body_size, 2048);
        // `resources` entries come first, matching the merge order of the
        // two configuration keys.
        assert_eq!(opts.packages(), vec!["app.extra", "app.resources"]);
        assert_eq!(opts.properties.get("trace"), Some(&json!(true)));
    }

    #[test]
    fn test_from_value_rejects_malformed_config() {
        assert!(ServerOptions::from_value(json!({ "port": "not-a-port" })).is_err());
        assert!(ServerOptions::from_value(Value::Null).is_err());
    }

    #[test]
    fn test_base_path_normalized() {
        let mut opts = ServerOptions::default();
        opts.set_base_path("/api");
        assert_eq!(opts.base_path(), "/api/");
        opts.set_base_path("/api/");
        assert_eq!(opts.base_path(), "/api/");
    }

    #[test]
    fn test_typed_registrations() {
        struct FakeComponent;
        impl crate::engine::EngineComponent for FakeComponent {
            fn name(&self) -> &str {
                "fake"
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }

        let mut opts = ServerOptions::default();
        opts.registrations
            .register_component(Arc::new(FakeComponent));
        opts.registrations.register_instance(Arc::new(42usize));
        assert_eq!(opts.registrations.components()[0].name(), "fake");
        assert_eq!(opts.registrations.instances().len(), 1);
        assert!(format!("{:?}", opts.registrations).contains("fake"));
    }

    #[test]
    #[allow(deprecated)]
    fn test_deprecated_initializer_delegates() {
        let opts = ServerOptions::from_value_with_runtime(
            json!({ "port": 9090 }),
            crate::runtime::RuntimeOptions::default(),
        )
        .unwrap();
        assert_eq!(opts.port, 9090);
    }
}
