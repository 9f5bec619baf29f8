//! Thread-safe container for data accumulated during a bootstrap run.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fleetboot_shared::{FleetbootError, FleetbootResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::WorkerConfig;

/// Credentials issued by the fleet manager.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub client_id: String,
    pub access_token: String,
    #[serde(default)]
    pub certificate: String,
}

/// Data used to access the fleet deployment this worker belongs to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Access {
    /// Root URL of the fleet deployment. Never ends with `/` once set.
    pub root_url: String,

    /// Credentials for the worker and their expiry. Shortly before the
    /// expiry the run should wind down.
    pub credentials: Credentials,
    pub credentials_expire: Option<DateTime<Utc>>,
}

/// This worker's identity within the fleet. Immutable once set for the
/// duration of the run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Identity {
    pub worker_pool_id: String,
    pub worker_group: String,
    pub worker_id: String,
}

/// A file a provider wants delivered to the worker before it starts.
/// Writing it out is the orchestrator's concern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSpec {
    pub description: String,
    pub path: String,
    /// Base64-encoded content.
    pub content: String,
}

#[derive(Default)]
struct StateInner {
    access: Access,
    identity: Identity,

    // Metadata from the provider, useful to display to the user for
    // debugging (instance id, region, addresses, ...). Free-form.
    provider_metadata: Map<String, Value>,

    worker_config: WorkerConfig,
    worker_location: HashMap<String, String>,
    files: Vec<FileSpec>,
}

/// State of the worker run, built up bit by bit during bootstrap.
///
/// All contents are private behind a read/write lock and can only be
/// read or changed through the accessors, which copy values in and out.
/// Callers never hold an alias into the state, so the lock is held only
/// for the duration of the copy, never across an external call. Safe
/// for concurrent use from the main flow and background tasks.
#[derive(Default)]
pub struct RunState {
    inner: RwLock<StateInner>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of the current access data.
    pub fn access(&self) -> Access {
        self.inner.read().access.clone()
    }

    /// Replace the access data wholesale.
    pub fn set_access(&self, access: Access) {
        self.inner.write().access = access;
    }

    /// Get a copy of the current identity.
    pub fn identity(&self) -> Identity {
        self.inner.read().identity.clone()
    }

    pub fn set_identity(&self, identity: Identity) {
        self.inner.write().identity = identity;
    }

    /// Get a copy of the current provider metadata.
    pub fn provider_metadata(&self) -> Map<String, Value> {
        self.inner.read().provider_metadata.clone()
    }

    /// Add or update a single provider metadata entry.
    pub fn update_provider_metadata(&self, key: &str, value: Value) {
        self.inner
            .write()
            .provider_metadata
            .insert(key.to_string(), value);
    }

    /// Replace all provider metadata.
    pub fn set_provider_metadata(&self, metadata: Map<String, Value>) {
        self.inner.write().provider_metadata = metadata;
    }

    /// Get a copy of the accumulated worker config.
    pub fn worker_config(&self) -> WorkerConfig {
        self.inner.read().worker_config.clone()
    }

    /// Merge the given config over the accumulated one.
    pub fn merge_worker_config(&self, config: &WorkerConfig) {
        let mut inner = self.inner.write();
        inner.worker_config = inner.worker_config.merge(config);
    }

    /// Get a copy of the current worker location.
    pub fn worker_location(&self) -> HashMap<String, String> {
        self.inner.read().worker_location.clone()
    }

    pub fn set_worker_location(&self, location: HashMap<String, String>) {
        self.inner.write().worker_location = location;
    }

    /// Get a copy of the files to deliver.
    pub fn files(&self) -> Vec<FileSpec> {
        self.inner.read().files.clone()
    }

    pub fn append_files(&self, files: impl IntoIterator<Item = FileSpec>) {
        self.inner.write().files.extend(files);
    }

    /// Check that the provider supplied everything it was supposed to.
    /// Returns the first missing field, in a stable order.
    pub fn check_provider_results(&self) -> FleetbootResult<()> {
        let inner = self.inner.read();

        if inner.access.root_url.is_empty() {
            return Err(FleetbootError::Validation(
                "provider did not set rootUrl".into(),
            ));
        }

        if inner.access.root_url.ends_with('/') {
            return Err(FleetbootError::Validation(
                "rootUrl must not end with `/`".into(),
            ));
        }

        if inner.access.credentials.client_id.is_empty() {
            return Err(FleetbootError::Validation(
                "provider did not set credentials.clientId".into(),
            ));
        }

        if inner.identity.worker_pool_id.is_empty() {
            return Err(FleetbootError::Validation(
                "provider did not set workerPoolId".into(),
            ));
        }

        if inner.identity.worker_group.is_empty() {
            return Err(FleetbootError::Validation(
                "provider did not set workerGroup".into(),
            ));
        }

        if inner.identity.worker_id.is_empty() {
            return Err(FleetbootError::Validation(
                "provider did not set workerId".into(),
            ));
        }

        if inner
            .worker_location
            .get("cloud")
            .is_none_or(|cloud| cloud.is_empty())
        {
            return Err(FleetbootError::Validation(
                "provider did not set the cloud name".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn make_state() -> RunState {
        let state = RunState::new();
        state.set_access(Access {
            root_url: "https://fm.example.com".into(),
            credentials: Credentials {
                client_id: "cli".into(),
                ..Default::default()
            },
            credentials_expire: None,
        });
        state.set_identity(Identity {
            worker_pool_id: "wp/id".into(),
            worker_group: "wg".into(),
            worker_id: "wid".into(),
        });
        state.set_worker_location(HashMap::from([("cloud".to_string(), "mushroom".to_string())]));
        state
    }

    #[test]
    fn complete_state_passes() {
        assert!(make_state().check_provider_results().is_ok());
    }

    #[test]
    fn missing_root_url_fails() {
        let state = make_state();
        let mut access = state.access();
        access.root_url = String::new();
        state.set_access(access);
        let err = state.check_provider_results().unwrap_err();
        assert!(err.to_string().contains("rootUrl"));
    }

    #[test]
    fn trailing_slash_fails() {
        let state = make_state();
        let mut access = state.access();
        access.root_url = "https://fm.example.com/".into();
        state.set_access(access);
        let err = state.check_provider_results().unwrap_err();
        assert!(err.to_string().contains("must not end"));
    }

    #[test]
    fn missing_client_id_fails() {
        let state = make_state();
        let mut access = state.access();
        access.credentials.client_id = String::new();
        state.set_access(access);
        let err = state.check_provider_results().unwrap_err();
        assert!(err.to_string().contains("clientId"));
    }

    #[test]
    fn missing_identity_fields_fail_in_order() {
        for (field, expected) in [
            ("pool", "workerPoolId"),
            ("group", "workerGroup"),
            ("id", "workerId"),
        ] {
            let state = make_state();
            let mut identity = state.identity();
            match field {
                "pool" => identity.worker_pool_id = String::new(),
                "group" => identity.worker_group = String::new(),
                _ => identity.worker_id = String::new(),
            }
            state.set_identity(identity);
            let err = state.check_provider_results().unwrap_err();
            assert!(err.to_string().contains(expected), "for {field}: {err}");
        }
    }

    #[test]
    fn missing_cloud_fails() {
        let state = make_state();
        state.set_worker_location(HashMap::new());
        let err = state.check_provider_results().unwrap_err();
        assert!(err.to_string().contains("cloud"));

        let state = make_state();
        state.set_worker_location(HashMap::from([("cloud".to_string(), String::new())]));
        assert!(state.check_provider_results().is_err());
    }

    #[test]
    fn validation_order_reports_earliest_failure() {
        // Blank both rootUrl and clientId: rootUrl is reported first.
        let state = make_state();
        state.set_access(Access::default());
        let err = state.check_provider_results().unwrap_err();
        assert!(err.to_string().contains("rootUrl"));
    }

    #[test]
    fn accessors_return_copies() {
        let state = make_state();
        let mut location = state.worker_location();
        location.insert("region".into(), "moon".into());
        // The copy does not write back.
        assert!(!state.worker_location().contains_key("region"));
    }

    #[test]
    fn provider_metadata_update_and_replace() {
        let state = RunState::new();
        state.update_provider_metadata("instance-type", json!("medium"));
        state.update_provider_metadata("region", json!("uswest"));
        assert_eq!(state.provider_metadata().len(), 2);

        state.update_provider_metadata("region", json!("useast"));
        assert_eq!(state.provider_metadata()["region"], json!("useast"));

        state.set_provider_metadata(Map::new());
        assert!(state.provider_metadata().is_empty());
    }

    #[test]
    fn merge_worker_config_accumulates() {
        let state = RunState::new();
        state.merge_worker_config(&WorkerConfig::new().set("from-runner-cfg", true));
        state.merge_worker_config(&WorkerConfig::new().set("from-register-worker", true));
        let config = state.worker_config();
        assert_eq!(config.get("from-runner-cfg"), Some(&json!(true)));
        assert_eq!(config.get("from-register-worker"), Some(&json!(true)));
    }

    #[test]
    fn files_append() {
        let state = RunState::new();
        state.append_files([FileSpec {
            description: "worker secrets".into(),
            path: "/etc/worker/secrets.json".into(),
            content: "e30=".into(),
        }]);
        assert_eq!(state.files().len(), 1);
    }

    // Writers store matched pairs; readers must never observe a torn
    // value mixing two writes.
    #[test]
    fn concurrent_access_is_consistent() {
        let state = Arc::new(RunState::new());
        state.set_access(Access {
            root_url: "https://fm.example.com".into(),
            credentials: Credentials {
                client_id: "seed".into(),
                access_token: "seed".into(),
                ..Default::default()
            },
            credentials_expire: None,
        });

        let mut handles = Vec::new();
        for w in 0..4 {
            let state = Arc::clone(&state);
            handles.push(std::thread::spawn(move || {
                for i in 0..500 {
                    let tag = format!("writer-{w}-{i}");
                    state.set_access(Access {
                        root_url: "https://fm.example.com".into(),
                        credentials: Credentials {
                            client_id: tag.clone(),
                            access_token: tag,
                            ..Default::default()
                        },
                        credentials_expire: None,
                    });
                    state.update_provider_metadata("tick", json!(i));
                }
            }));
        }
        for _ in 0..4 {
            let state = Arc::clone(&state);
            handles.push(std::thread::spawn(move || {
                for _ in 0..500 {
                    let access = state.access();
                    assert_eq!(access.credentials.client_id, access.credentials.access_token);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
