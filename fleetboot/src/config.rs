//! Runner configuration.
//!
//! The runner configuration selects the provider and worker
//! implementation and carries the base worker configuration that
//! providers merge their own contributions into.

use std::path::Path;

use fleetboot_shared::{FleetbootError, FleetbootResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The accumulating configuration document destined for the worker
/// process.
///
/// An opaque JSON object. [`WorkerConfig::merge`] is right-biased per
/// key: nested objects merge recursively, anything else is replaced by
/// the later value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerConfig(Map<String, Value>);

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value, which must be an object.
    pub fn from_value(value: Value) -> FleetbootResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(FleetbootError::Config(format!(
                "worker config must be a JSON object, got {other}"
            ))),
        }
    }

    /// Merge `other` over this config, returning the result. Keys in
    /// `other` win; objects present on both sides merge recursively.
    pub fn merge(&self, other: &WorkerConfig) -> WorkerConfig {
        let mut merged = self.0.clone();
        merge_objects(&mut merged, &other.0);
        WorkerConfig(merged)
    }

    /// Return a copy with `key` set to `value`.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> WorkerConfig {
        let mut map = self.0.clone();
        map.insert(key.to_string(), value.into());
        WorkerConfig(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

fn merge_objects(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        if let (Some(Value::Object(existing)), Value::Object(incoming)) =
            (base.get_mut(key), value)
        {
            merge_objects(existing, incoming);
            continue;
        }
        base.insert(key.clone(), value.clone());
    }
}

/// Top-level configuration for one bootstrap run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    pub provider: ProviderConfig,
    pub worker: WorkerImplementationConfig,

    /// Base worker configuration; providers merge theirs over it.
    #[serde(default)]
    pub worker_config: WorkerConfig,

    /// Seconds between termination-signal polls for cloud providers.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    30
}

impl RunnerConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> FleetbootResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| FleetbootError::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Provider selection plus the provider-specific configuration block.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Run-time type tag selecting the provider implementation.
    pub provider_type: String,

    /// Provider-specific fields, interpreted by the selected provider.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl ProviderConfig {
    /// Deserialize the provider-specific fields into a typed struct.
    pub fn unpack<T: DeserializeOwned>(&self) -> FleetbootResult<T> {
        serde_json::from_value(Value::Object(self.data.clone())).map_err(|e| {
            FleetbootError::Config(format!(
                "invalid {} provider configuration: {}",
                self.provider_type, e
            ))
        })
    }
}

/// Which worker implementation to launch, and how.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerImplementationConfig {
    pub implementation: String,

    /// Command line used to launch the worker process.
    #[serde(default)]
    pub command: Vec<String>,
}
