//! Derives the Home Assistant discovery messages for every (camera, tracked object) pair.
//!
//! Reference: https://www.home-assistant.io/integrations/mqtt/#mqtt-discovery

use crate::broker_config::BrokerSettings;
use crate::camera_config::CameraConfig;
use crate::config_loader::MasterConfig;
use log::{debug, warn};
use serde::Serialize;

pub const DISCOVERY_PREFIX: &str = "homeassistant";

/// The two entities created per tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    BinarySensor,
    CameraSnapshot,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::BinarySensor, EntityKind::CameraSnapshot];

    /// Home Assistant component name, second segment of the discovery topic.
    pub fn component(self) -> &'static str {
        match self {
            EntityKind::BinarySensor => "binary_sensor",
            EntityKind::CameraSnapshot => "camera",
        }
    }

    fn object_id(self, camera: &str, object: &str) -> String {
        match self {
            EntityKind::BinarySensor => format!("{}_{}", camera, object),
            EntityKind::CameraSnapshot => format!("{}_{}_snapshot", camera, object),
        }
    }
}

/// `homeassistant/{component}/{prefix}/+/config`, the pattern that matches every entity of `kind`.
pub fn cleanup_pattern(kind: EntityKind, prefix: &str) -> String {
    format!("{}/{}/{}/+/config", DISCOVERY_PREFIX, kind.component(), prefix)
}

pub fn discovery_topic(kind: EntityKind, prefix: &str, camera: &str, object: &str) -> String {
    format!(
        "{}/{}/{}/{}/config",
        DISCOVERY_PREFIX,
        kind.component(),
        prefix,
        kind.object_id(camera, object)
    )
}

/// A retained message to publish. An empty payload removes the entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveryEntry {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl DiscoveryEntry {
    pub fn removal(topic: impl Into<String>) -> Self {
        DiscoveryEntry { topic: topic.into(), payload: String::new(), retain: true }
    }

    pub fn is_removal(&self) -> bool {
        self.payload.is_empty()
    }
}

#[derive(Serialize)]
struct BinarySensorPayload {
    name: String,
    state_topic: String,
    device_class: &'static str,
    availability_topic: String,
}

#[derive(Serialize)]
struct CameraPayload {
    name: String,
    topic: String,
    availability_topic: String,
}

fn payload_for(kind: EntityKind, settings: &BrokerSettings, camera: &str, object: &str) -> Result<String, serde_json::Error> {
    let prefix = &settings.topic_prefix;
    let availability_topic = settings.availability_topic();
    match kind {
        EntityKind::BinarySensor => serde_json::to_string(&BinarySensorPayload {
            name: format!("{}_{}_detected", camera, object),
            state_topic: format!("{}/{}/{}", prefix, camera, object),
            device_class: "motion",
            availability_topic,
        }),
        EntityKind::CameraSnapshot => serde_json::to_string(&CameraPayload {
            name: format!("{}_{}_snapshot", camera, object),
            topic: format!("{}/{}/{}/snapshot", prefix, camera, object),
            availability_topic,
        }),
    }
}

fn entries_for_camera(settings: &BrokerSettings, camera: &CameraConfig) -> Vec<DiscoveryEntry> {
    let mut entries = Vec::with_capacity(camera.tracked_objects.len() * EntityKind::ALL.len());
    for object in &camera.tracked_objects {
        for kind in EntityKind::ALL {
            match payload_for(kind, settings, &camera.name, object) {
                Ok(payload) => entries.push(DiscoveryEntry {
                    topic: discovery_topic(kind, &settings.topic_prefix, &camera.name, object),
                    payload,
                    retain: true,
                }),
                // Plain string fields; serde_json cannot fail here in practice.
                Err(e) => warn!("Skipping {} entity for {}/{}: {}", kind.component(), camera.name, object, e),
            }
        }
    }
    entries
}

/// Build the desired discovery set. Pure: same config in, same entries out.
pub fn build_discovery_entries(config: &MasterConfig) -> Vec<DiscoveryEntry> {
    let entries: Vec<DiscoveryEntry> = config
        .cameras
        .iter()
        .flat_map(|camera| entries_for_camera(&config.mqtt, camera))
        .collect();
    debug!("Built {} discovery entries for {} cameras", entries.len(), config.cameras.len());
    entries
}
