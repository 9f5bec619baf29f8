//! Provider for instances provisioned by the fleet manager on Azure.
//!
//! Identity comes from the instance tags and the proof of legitimacy is
//! the metadata service's signed attestation document. Preemption and
//! maintenance notices arrive through the scheduled-events endpoint and
//! are relayed to the worker by a [`TerminationMonitor`].

pub mod metadata;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetboot_shared::protocol::{Protocol, GRACEFUL_TERMINATION};
use fleetboot_shared::{FleetbootError, FleetbootResult};
use serde_json::{json, Map};

use self::metadata::MetadataService;
use super::termination::{MonitorHandle, TerminationMonitor, TerminationSignal};
use super::{normalize_root_url, registrar, Provider};
use crate::config::RunnerConfig;
use crate::fleet::FleetManagerFactory;
use crate::run::{Access, RunState};
use crate::shutdown::SystemShutdown;

pub struct AzureProvider {
    factory: FleetManagerFactory,
    metadata_service: Arc<dyn MetadataService>,
    shutdown: Arc<dyn SystemShutdown>,
    protocol: Option<Arc<Protocol>>,
    monitor_handle: Option<MonitorHandle>,
    poll_interval: Duration,
}

impl AzureProvider {
    pub fn new(
        runnercfg: &RunnerConfig,
        factory: FleetManagerFactory,
        metadata_service: Arc<dyn MetadataService>,
        shutdown: Arc<dyn SystemShutdown>,
    ) -> FleetbootResult<Self> {
        Ok(Self {
            factory,
            metadata_service,
            shutdown,
            protocol: None,
            monitor_handle: None,
            poll_interval: Duration::from_secs(runnercfg.poll_interval_secs),
        })
    }

    fn required_tag<'a>(
        instance_data: &'a metadata::InstanceData,
        name: &str,
    ) -> FleetbootResult<&'a str> {
        instance_data
            .tag(name)
            .ok_or_else(|| FleetbootError::Provider(format!("instance has no {name} tag")))
    }
}

#[async_trait]
impl Provider for AzureProvider {
    async fn configure_run(&mut self, state: &RunState) -> FleetbootResult<()> {
        let instance_data = self.metadata_service.query_instance_data().await?;

        // Identity comes from the instance tags; the customData field
        // is not trustworthy enough to carry it.
        let worker_pool_id = Self::required_tag(&instance_data, "worker-pool-id")?.to_string();
        let provider_id = Self::required_tag(&instance_data, "provider-id")?.to_string();
        let worker_group = Self::required_tag(&instance_data, "worker-group")?.to_string();
        let root_url = normalize_root_url(Self::required_tag(&instance_data, "root-url")?);
        let worker_id = instance_data.compute.name.clone();

        let attested_document = self.metadata_service.query_attested_document().await?;

        state.set_access(Access {
            root_url: root_url.clone(),
            ..Access::default()
        });

        let fleet = (self.factory)(&root_url, &state.access().credentials)?;
        let mut proof = Map::new();
        proof.insert("document".into(), json!(attested_document));
        let worker_config = registrar::register_worker(
            state,
            fleet.as_ref(),
            &worker_pool_id,
            &provider_id,
            &worker_group,
            &worker_id,
            proof,
        )
        .await?;
        state.merge_worker_config(&worker_config);

        let mut provider_metadata = Map::new();
        provider_metadata.insert("vm-id".into(), json!(instance_data.compute.vm_id));
        provider_metadata.insert("instance-type".into(), json!(instance_data.compute.vm_size));
        provider_metadata.insert("region".into(), json!(instance_data.compute.location));
        if let Some(address) = instance_data
            .network
            .interface
            .first()
            .and_then(|interface| interface.ipv4.ip_address.first())
        {
            if !address.private_ip_address.is_empty() {
                provider_metadata.insert("local-ipv4".into(), json!(address.private_ip_address));
            }
            if !address.public_ip_address.is_empty() {
                provider_metadata.insert("public-ipv4".into(), json!(address.public_ip_address));
            }
        }
        state.set_provider_metadata(provider_metadata);

        let mut location = state.worker_location();
        location.insert("cloud".into(), "azure".into());
        location.insert("region".into(), instance_data.compute.location.clone());
        state.set_worker_location(location);

        Ok(())
    }

    fn set_protocol(&mut self, protocol: Arc<Protocol>) {
        self.protocol = Some(protocol);
    }

    async fn worker_started(&mut self, _state: &RunState) -> FleetbootResult<()> {
        if self.monitor_handle.is_some() {
            return Ok(());
        }
        let protocol = self
            .protocol
            .as_ref()
            .ok_or_else(|| FleetbootError::Internal("no protocol bound".into()))?;
        if !protocol.capable(GRACEFUL_TERMINATION) {
            tracing::info!(
                "worker does not support {GRACEFUL_TERMINATION}; not monitoring scheduled events"
            );
            return Ok(());
        }

        let signal = Arc::new(ScheduledEventsSignal {
            metadata_service: Arc::clone(&self.metadata_service),
        });
        let monitor = TerminationMonitor::new(signal, Arc::clone(protocol));
        self.monitor_handle = Some(monitor.spawn(self.poll_interval));
        Ok(())
    }

    async fn worker_finished(&mut self, state: &RunState) -> FleetbootResult<()> {
        if let Some(handle) = self.monitor_handle.take() {
            handle.stop().await;
        }
        registrar::remove_worker(state, &self.factory, self.shutdown.as_ref()).await
    }
}

/// Adapts the scheduled-events endpoint to the monitor's signal shape.
struct ScheduledEventsSignal {
    metadata_service: Arc<dyn MetadataService>,
}

#[async_trait]
impl TerminationSignal for ScheduledEventsSignal {
    async fn pending_event_types(&self) -> FleetbootResult<Vec<String>> {
        let events = self.metadata_service.query_scheduled_events().await?;
        Ok(events
            .events
            .into_iter()
            .map(|event| event.event_type)
            .collect())
    }
}
