//! One MQTT 3.1.1 connection for the duration of a reconciliation pass.
//!
//! `open` connects with a last will on `{prefix}/available`, then a background
//! task polls the rumqttc event loop and forwards connect/message events to a
//! [`SessionEvents`] implementation. Nothing reconnects: the first connection
//! error ends the session.

use crate::broker_config::BrokerSettings;
use crate::core::discovery_builder::DiscoveryEntry;
use crate::core::publisher::DiscoveryPublisher;
use crate::errors::{AppError, ConnectFailure};
use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_CHANNEL_CAPACITY: usize = 10;
const WILL_PAYLOAD: &str = "offline";

/// Callbacks invoked from the session's receive task.
///
/// Both run on the event-loop task, so they must not block; hand work off
/// through a channel instead.
pub trait SessionEvents: Send + Sync + 'static {
    fn on_connect(&self, result: &Result<(), ConnectFailure>);
    fn on_message(&self, topic: &str, payload: &[u8], retained: bool);
}

pub struct BrokerSession {
    client: AsyncClient,
    receive_task: JoinHandle<()>,
}

pub fn build_mqtt_options(settings: &BrokerSettings) -> MqttOptions {
    let mut options = MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(true);
    options.set_last_will(LastWill::new(
        settings.availability_topic(),
        WILL_PAYLOAD.as_bytes().to_vec(),
        QoS::AtLeastOnce,
        true,
    ));
    if let Some(user) = &settings.user {
        options.set_credentials(user.clone(), settings.password.clone().unwrap_or_default());
    }
    options
}

impl BrokerSession {
    pub async fn open(settings: &BrokerSettings, events: Arc<dyn SessionEvents>) -> Result<Self, AppError> {
        let start_time = Instant::now();
        info!(
            "🔌 Connecting to MQTT broker {}:{} as '{}' (auth: {})",
            settings.host,
            settings.port,
            settings.client_id,
            settings.user.is_some()
        );

        let (client, mut eventloop) = AsyncClient::new(build_mqtt_options(settings), REQUEST_CHANNEL_CAPACITY);
        // rumqttc bounds TCP connect + CONNACK itself (5 s by default).
        eventloop.network_options.set_connection_timeout(CONNECT_TIMEOUT.as_secs());
        let (connected_tx, connected_rx) = oneshot::channel();
        let receive_task = tokio::spawn(receive_loop(eventloop, events.clone(), connected_tx));

        // Backstop only; the event loop reports its own timeout first.
        let outcome = match timeout(CONNECT_TIMEOUT + CLOSE_TIMEOUT, connected_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ConnectFailure::Network("receive task stopped before connecting".to_string())),
            Err(_) => {
                let failure = ConnectFailure::TimedOut;
                events.on_connect(&Err(failure.clone()));
                Err(failure)
            }
        };

        match outcome {
            Ok(()) => {
                info!("✅ Connected to MQTT broker in {:?}", start_time.elapsed());
                Ok(BrokerSession { client, receive_task })
            }
            Err(reason) => {
                receive_task.abort();
                error!("❌ MQTT connection failed after {:?}: {}", start_time.elapsed(), reason);
                Err(AppError::BrokerConnect { reason })
            }
        }
    }

    /// A cloneable handle for publishing from any task.
    pub fn publisher(&self) -> SessionPublisher {
        SessionPublisher { client: self.client.clone() }
    }

    pub async fn subscribe(&self, patterns: &[String]) -> Result<(), AppError> {
        for pattern in patterns {
            debug!("Subscribing to '{}'", pattern);
            self.client
                .subscribe(pattern.clone(), QoS::AtMostOnce)
                .await
                .map_err(|e| AppError::Subscribe { pattern: pattern.clone(), details: e.to_string() })?;
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, patterns: &[String]) -> Result<(), AppError> {
        for pattern in patterns {
            debug!("Unsubscribing from '{}'", pattern);
            self.client
                .unsubscribe(pattern.clone())
                .await
                .map_err(|e| AppError::Subscribe { pattern: pattern.clone(), details: e.to_string() })?;
        }
        Ok(())
    }

    /// Graceful DISCONNECT: the broker discards the last will.
    pub async fn close(mut self) {
        let start_time = Instant::now();
        if let Err(e) = self.client.disconnect().await {
            warn!("⚠️ Failed to queue MQTT disconnect: {}", e);
        }
        match timeout(CLOSE_TIMEOUT, &mut self.receive_task).await {
            Ok(Ok(())) => debug!("Receive task finished in {:?}", start_time.elapsed()),
            Ok(Err(e)) => warn!("⚠️ Receive task ended abnormally: {}", e),
            Err(_) => {
                warn!("⚠️ Receive task still running after {:?}, aborting it", CLOSE_TIMEOUT);
                self.receive_task.abort();
            }
        }
        info!("👋 Disconnected from MQTT broker");
    }
}

async fn receive_loop(
    mut eventloop: EventLoop,
    events: Arc<dyn SessionEvents>,
    connected: oneshot::Sender<Result<(), ConnectFailure>>,
) {
    let mut connected = Some(connected);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if let Some(tx) = connected.take() {
                    events.on_connect(&Ok(()));
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Event::Incoming(Packet::Publish(msg))) => {
                trace!("Incoming publish on '{}' ({} bytes)", msg.topic, msg.payload.len());
                events.on_message(&msg.topic, &msg.payload, msg.retain);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent, stopping receive task");
                break;
            }
            Ok(other) => trace!("MQTT event: {:?}", other),
            Err(e) => {
                let failure = classify_connection_error(&e);
                match connected.take() {
                    Some(tx) => {
                        events.on_connect(&Err(failure.clone()));
                        let _ = tx.send(Err(failure));
                    }
                    None => warn!("⚠️ MQTT connection error: {}", e),
                }
                break;
            }
        }
    }
}

#[allow(unreachable_patterns)]
pub fn return_code_value(code: &ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
        _ => u8::MAX,
    }
}

fn classify_connection_error(err: &ConnectionError) -> ConnectFailure {
    match err {
        ConnectionError::ConnectionRefused(code) => {
            let value = return_code_value(code);
            ConnectFailure::from_return_code(value).unwrap_or(ConnectFailure::Refused(value))
        }
        ConnectionError::NetworkTimeout => ConnectFailure::TimedOut,
        other => ConnectFailure::Network(other.to_string()),
    }
}

#[derive(Clone)]
pub struct SessionPublisher {
    client: AsyncClient,
}

#[async_trait]
impl DiscoveryPublisher for SessionPublisher {
    async fn publish(&self, entry: &DiscoveryEntry) -> Result<(), AppError> {
        info!("📤 {} '{}' retain={}", if entry.is_removal() { "Clearing" } else { "Publishing" }, entry.topic, entry.retain);
        if !entry.is_removal() {
            debug!("    {}", entry.payload);
        }
        self.client
            .publish(entry.topic.clone(), QoS::AtMostOnce, entry.retain, entry.payload.clone().into_bytes())
            .await
            .map_err(|e| AppError::Publish { topic: entry.topic.clone(), details: e.to_string() })
    }
}
