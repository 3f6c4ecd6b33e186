//! Outbound telemetry: discovery, status and state messages.
//!
//! Payloads are the typed shapes from `common`; this module builds them from
//! live readings and pushes them onto the bus. A failed publish is logged
//! and dropped. Nothing is retried or queued.

use common::{
    synthetic_timestamp_ms, Discovery, MessageKind, RelayState, StateReport, Status, Topics,
    DEVICE_NAME, FIRMWARE_VERSION,
};
use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::system::SystemProbe;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("not connected to the broker")]
    NotConnected,
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("client rejected request: {0}")]
    Client(String),
}

/// Minimal publish/subscribe interface, independent of the MQTT client crate
pub trait BusClient {
    fn publish(&mut self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), PublishError>;

    fn subscribe(&mut self, topic: &str) -> Result<(), PublishError>;
}

/// Fixed facts about this plug
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub device_id: String,
    pub hardware_type: String,
}

pub struct Telemetry {
    identity: Identity,
    topics: Topics,
}

impl Telemetry {
    pub fn new(identity: Identity) -> Self {
        let topics = Topics::new(&identity.device_id);
        Self { identity, topics }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn discovery<S: SystemProbe>(&self, probe: &S, state: RelayState) -> Discovery {
        Discovery {
            id: self.identity.device_id.clone(),
            name: DEVICE_NAME.to_string(),
            hardware: self.identity.hardware_type.clone(),
            firmware: FIRMWARE_VERSION.to_string(),
            ip: probe.ip_address(),
            mac: probe.mac_address(),
            state,
        }
    }

    pub fn status<S: SystemProbe>(&self, probe: &S, uptime_ms: u64) -> Status {
        Status {
            online: true,
            wifi_strength: probe.signal_strength(),
            uptime: uptime_ms / 1000,
            free_heap: probe.free_memory(),
        }
    }

    pub fn state(&self, state: RelayState, boot_ms: u64) -> StateReport {
        StateReport {
            state,
            timestamp: synthetic_timestamp_ms(boot_ms),
        }
    }

    /// Serialize and publish one message. `connected` reflects the broker
    /// session; without one the message is dropped like any other failure.
    pub fn publish<B: BusClient, T: Serialize>(
        &self,
        bus: &mut B,
        connected: bool,
        kind: MessageKind,
        payload: &T,
    ) -> Result<(), PublishError> {
        let topic = self.topics.for_kind(kind);
        let result = serde_json::to_string(payload)
            .map_err(PublishError::from)
            .and_then(|body| {
                let outcome = if connected {
                    bus.publish(&topic, body.clone().into_bytes(), kind.retained())
                } else {
                    Err(PublishError::NotConnected)
                };
                info!("telemetry: Topic: {}", topic);
                info!("telemetry: Payload: {}", body);
                outcome
            });

        match &result {
            Ok(()) => info!("telemetry: {} publish: OK", kind.label()),
            Err(e) => warn!("telemetry: {} publish: FAILED ({})", kind.label(), e),
        }
        result
    }
}
