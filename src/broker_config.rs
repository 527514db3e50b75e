use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TOPIC_PREFIX: &str = "frigate";
pub const DEFAULT_CLIENT_ID: &str = "frigate_autodiscovery";

/// The `mqtt:` block as it appears in the config file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawMqttConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub topic_prefix: Option<String>,
    pub client_id: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>, // may contain {FRIGATE_*} placeholders
}

/// Resolved broker settings. Built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub topic_prefix: String,
    pub client_id: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl BrokerSettings {
    pub fn new(host: impl Into<String>) -> Self {
        BrokerSettings {
            host: host.into(),
            port: DEFAULT_PORT,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            user: None,
            password: None,
        }
    }

    /// `{prefix}/available`, used both as last-will topic and as entity availability topic.
    pub fn availability_topic(&self) -> String {
        format!("{}/available", self.topic_prefix)
    }
}
