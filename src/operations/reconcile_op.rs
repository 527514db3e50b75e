use crate::config_loader::MasterConfig;
use crate::core::broker_session::{BrokerSession, SessionEvents};
use crate::core::discovery_builder::{build_discovery_entries, cleanup_pattern, DiscoveryEntry, EntityKind};
use crate::core::publisher::{DiscoveryPublisher, LoggerPublisher};
use crate::errors::{AppError, ConnectFailure};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_CLEANUP_PREFIX: &str = "frigate";

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// How long to collect retained messages replayed after subscribing.
    pub grace_period: Duration,
    /// Prefix used in the stale-entry subscriptions, independent of `mqtt.topic_prefix`.
    pub cleanup_prefix: String,
    pub dry_run: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            grace_period: DEFAULT_GRACE_PERIOD,
            cleanup_prefix: DEFAULT_CLEANUP_PREFIX.to_string(),
            dry_run: false,
        }
    }
}

impl ReconcileOptions {
    pub fn cleanup_patterns(&self) -> Vec<String> {
        [EntityKind::CameraSnapshot, EntityKind::BinarySensor]
            .into_iter()
            .map(|kind| cleanup_pattern(kind, &self.cleanup_prefix))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    Init,
    Connected,
    ListeningForStale,
    Publishing,
    Done,
}

fn advance(state: &mut ReconcileState, next: ReconcileState, started: Instant) {
    debug!("🔁 {:?} -> {:?} (+{:?})", state, next, started.elapsed());
    *state = next;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub stale_cleared: usize,
    pub published: usize,
    pub warnings: usize,
}

/// Session event handler that turns every non-empty inbound message into a removal.
///
/// Removals go through a channel so the event-loop task never waits on a publish.
/// Once the receiving side is dropped, further messages are ignored.
pub struct StaleTopicCleaner {
    removals: mpsc::UnboundedSender<DiscoveryEntry>,
}

impl StaleTopicCleaner {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DiscoveryEntry>) {
        let (removals, rx) = mpsc::unbounded_channel();
        (StaleTopicCleaner { removals }, rx)
    }
}

impl SessionEvents for StaleTopicCleaner {
    fn on_connect(&self, result: &Result<(), ConnectFailure>) {
        match result {
            Ok(()) => debug!("On connect called"),
            Err(reason) => error!("❌ MQTT connect refused: {}", reason),
        }
    }

    fn on_message(&self, topic: &str, payload: &[u8], retained: bool) {
        debug!("📨 Message on '{}' retain={} ({} bytes)", topic, retained, payload.len());
        if payload.is_empty() {
            return;
        }
        if self.removals.send(DiscoveryEntry::removal(topic)).is_err() {
            debug!("Stale window closed, ignoring '{}'", topic);
        }
    }
}

async fn publish_logged<P: DiscoveryPublisher + ?Sized>(publisher: &P, entry: &DiscoveryEntry, report: &mut ReconcileReport) -> bool {
    match publisher.publish(entry).await {
        Ok(()) => true,
        Err(e) => {
            warn!("⚠️ {}", e);
            report.warnings += 1;
            false
        }
    }
}

/// Clear every stale entry that arrives within `grace_period`.
///
/// The receive task keeps filling `removals` while this waits.
pub async fn clear_stale_entries<P: DiscoveryPublisher + ?Sized>(
    publisher: &P,
    removals: &mut mpsc::UnboundedReceiver<DiscoveryEntry>,
    grace_period: Duration,
    report: &mut ReconcileReport,
) {
    let deadline = tokio::time::Instant::now() + grace_period;
    loop {
        tokio::select! {
            maybe_entry = removals.recv() => match maybe_entry {
                Some(entry) => {
                    if publish_logged(publisher, &entry, report).await {
                        report.stale_cleared += 1;
                    }
                }
                // Every sender is gone; just let the window run out.
                None => {
                    tokio::time::sleep_until(deadline).await;
                    break;
                }
            },
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }
    removals.close();
    // Anything queued before close() still belongs to the window.
    while let Ok(entry) = removals.try_recv() {
        if publish_logged(publisher, &entry, report).await {
            report.stale_cleared += 1;
        }
    }
}

pub async fn publish_desired_entries<P: DiscoveryPublisher + ?Sized>(
    publisher: &P,
    config: &MasterConfig,
    report: &mut ReconcileReport,
) {
    for entry in build_discovery_entries(config) {
        if publish_logged(publisher, &entry, report).await {
            report.published += 1;
        }
    }
}

/// One full pass: connect, clear stale discovery entries, publish the desired set, disconnect.
pub async fn run_reconciliation(config: &MasterConfig, options: &ReconcileOptions) -> Result<ReconcileReport, AppError> {
    let started = Instant::now();
    let mut report = ReconcileReport::default();

    if options.dry_run {
        info!("🧪 Dry run: no broker connection will be made");
        publish_desired_entries(&LoggerPublisher, config, &mut report).await;
        return Ok(report);
    }

    if options.cleanup_prefix != config.mqtt.topic_prefix {
        warn!(
            "⚠️ Cleaning stale entries under prefix '{}' while publishing under '{}'",
            options.cleanup_prefix, config.mqtt.topic_prefix
        );
    }

    let mut state = ReconcileState::Init;
    let (cleaner, mut removals) = StaleTopicCleaner::new();
    let session = BrokerSession::open(&config.mqtt, Arc::new(cleaner)).await?;
    advance(&mut state, ReconcileState::Connected, started);

    let publisher = session.publisher();
    let patterns = options.cleanup_patterns();
    match session.subscribe(&patterns).await {
        Ok(()) => {
            advance(&mut state, ReconcileState::ListeningForStale, started);
            info!("🧹 Listening {:?} for stale discovery entries on {:?}", options.grace_period, patterns);
            clear_stale_entries(&publisher, &mut removals, options.grace_period, &mut report).await;
            if let Err(e) = session.unsubscribe(&patterns).await {
                warn!("⚠️ {}", e);
                report.warnings += 1;
            }
        }
        Err(e) => {
            warn!("⚠️ {}; skipping stale entry cleanup", e);
            report.warnings += 1;
            removals.close();
        }
    }

    advance(&mut state, ReconcileState::Publishing, started);
    publish_desired_entries(&publisher, config, &mut report).await;

    session.close().await;
    advance(&mut state, ReconcileState::Done, started);
    info!(
        "🏁 Reconciliation finished in {:?}: {} stale cleared, {} published, {} warnings",
        started.elapsed(),
        report.stale_cleared,
        report.published,
        report.warnings
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker_config::BrokerSettings;
    use crate::camera_config::CameraConfig;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory stand-in for a broker's retained store.
    #[derive(Default)]
    struct RetainedStore {
        retained: Mutex<BTreeMap<String, String>>,
        log: Mutex<Vec<DiscoveryEntry>>,
        fail_topic: Option<String>,
    }

    impl RetainedStore {
        fn seeded(topics: &[(&str, &str)]) -> Self {
            let store = RetainedStore::default();
            {
                let mut retained = store.retained.lock().unwrap();
                for (topic, payload) in topics {
                    retained.insert(topic.to_string(), payload.to_string());
                }
            }
            store
        }

        fn read(&self, topic: &str) -> Option<String> {
            self.retained.lock().unwrap().get(topic).cloned()
        }
    }

    #[async_trait]
    impl DiscoveryPublisher for RetainedStore {
        async fn publish(&self, entry: &DiscoveryEntry) -> Result<(), AppError> {
            if self.fail_topic.as_deref() == Some(entry.topic.as_str()) {
                return Err(AppError::Publish { topic: entry.topic.clone(), details: "rejected".to_string() });
            }
            self.log.lock().unwrap().push(entry.clone());
            let mut retained = self.retained.lock().unwrap();
            if entry.is_removal() {
                retained.remove(&entry.topic);
            } else if entry.retain {
                retained.insert(entry.topic.clone(), entry.payload.clone());
            }
            Ok(())
        }
    }

    fn sample_config() -> MasterConfig {
        let global = vec!["person".to_string()];
        MasterConfig {
            mqtt: BrokerSettings::new("h"),
            cameras: vec![CameraConfig::new("cam1", &global, &["car".to_string()])],
            log_level: None,
        }
    }

    #[test]
    fn default_cleanup_patterns_use_literal_frigate() {
        assert_eq!(
            ReconcileOptions::default().cleanup_patterns(),
            vec![
                "homeassistant/camera/frigate/+/config".to_string(),
                "homeassistant/binary_sensor/frigate/+/config".to_string(),
            ]
        );
    }

    #[test]
    fn cleaner_queues_one_removal_per_non_empty_message() {
        let (cleaner, mut rx) = StaleTopicCleaner::new();
        cleaner.on_message("homeassistant/camera/frigate/old_cat_snapshot/config", b"{\"name\":\"x\"}", true);
        cleaner.on_message("homeassistant/camera/frigate/gone/config", b"", true);

        let entry = rx.try_recv().unwrap();
        assert_eq!(entry, DiscoveryEntry::removal("homeassistant/camera/frigate/old_cat_snapshot/config"));
        assert!(entry.retain && entry.is_removal());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn cleaner_ignores_messages_after_window_closes() {
        let (cleaner, rx) = StaleTopicCleaner::new();
        drop(rx);
        cleaner.on_message("homeassistant/binary_sensor/frigate/a_b/config", b"{}", false);
    }

    #[tokio::test]
    async fn stale_message_triggers_exactly_one_clear() {
        let stale = "homeassistant/binary_sensor/frigate/old_dog/config";
        let store = RetainedStore::seeded(&[(stale, "{\"name\":\"old_dog_detected\"}")]);
        let (cleaner, mut rx) = StaleTopicCleaner::new();
        let mut report = ReconcileReport::default();

        cleaner.on_message(stale, b"{\"name\":\"old_dog_detected\"}", true);
        clear_stale_entries(&store, &mut rx, Duration::from_millis(50), &mut report).await;

        let log = store.log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0], DiscoveryEntry::removal(stale));
        assert_eq!(report.stale_cleared, 1);
        assert_eq!(store.read(stale), None);
    }

    #[tokio::test]
    async fn removals_arriving_during_the_window_are_cleared() {
        let store = RetainedStore::default();
        let (cleaner, mut rx) = StaleTopicCleaner::new();
        let mut report = ReconcileReport::default();

        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cleaner.on_message("homeassistant/camera/frigate/x_y_snapshot/config", b"{}", true);
            cleaner
        });
        clear_stale_entries(&store, &mut rx, Duration::from_millis(300), &mut report).await;
        let cleaner = late.await.unwrap();

        assert_eq!(report.stale_cleared, 1);
        // Window is over: the channel is closed and new messages are dropped.
        cleaner.on_message("homeassistant/camera/frigate/z_snapshot/config", b"{}", true);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn published_entries_read_back_unchanged() {
        let store = RetainedStore::default();
        let config = sample_config();
        let mut report = ReconcileReport::default();

        publish_desired_entries(&store, &config, &mut report).await;

        let desired = build_discovery_entries(&config);
        assert_eq!(report.published, 4);
        for entry in &desired {
            assert_eq!(store.read(&entry.topic).as_deref(), Some(entry.payload.as_str()));
        }
    }

    #[tokio::test]
    async fn publish_failures_are_counted_not_fatal() {
        let failing = "homeassistant/binary_sensor/frigate/cam1_person/config".to_string();
        let store = RetainedStore { fail_topic: Some(failing.clone()), ..Default::default() };
        let mut report = ReconcileReport::default();

        publish_desired_entries(&store, &sample_config(), &mut report).await;

        assert_eq!(report.warnings, 1);
        assert_eq!(report.published, 3);
        assert_eq!(store.read(&failing), None);
    }

    #[tokio::test]
    async fn full_pass_replaces_stale_with_desired() {
        let stale = "homeassistant/camera/frigate/removed_cam_person_snapshot/config";
        let kept = "homeassistant/binary_sensor/frigate/cam1_person/config";
        let store = RetainedStore::seeded(&[(stale, "{\"old\":true}"), (kept, "{\"old\":true}")]);
        let (cleaner, mut rx) = StaleTopicCleaner::new();
        let mut report = ReconcileReport::default();

        // What the broker replays on subscribe.
        cleaner.on_message(stale, b"{\"old\":true}", true);
        cleaner.on_message(kept, b"{\"old\":true}", true);
        clear_stale_entries(&store, &mut rx, Duration::from_millis(10), &mut report).await;
        publish_desired_entries(&store, &sample_config(), &mut report).await;

        assert_eq!(report, ReconcileReport { stale_cleared: 2, published: 4, warnings: 0 });
        assert_eq!(store.read(stale), None);
        let fresh: serde_json::Value = serde_json::from_str(&store.read(kept).unwrap()).unwrap();
        assert_eq!(fresh["name"], "cam1_person_detected");
    }

    #[tokio::test]
    async fn dry_run_touches_no_broker() {
        let options = ReconcileOptions { dry_run: true, ..Default::default() };
        let report = run_reconciliation(&sample_config(), &options).await.unwrap();
        assert_eq!(report, ReconcileReport { stale_cleared: 0, published: 4, warnings: 0 });
    }

    #[tokio::test]
    async fn unreachable_broker_fails_the_run() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut config = sample_config();
        config.mqtt.host = "127.0.0.1".to_string();
        config.mqtt.port = port;

        let err = run_reconciliation(&config, &ReconcileOptions::default()).await.unwrap_err();
        assert!(matches!(err, AppError::BrokerConnect { .. }));
    }

    #[tokio::test]
    async fn not_authorized_broker_gets_no_publishes() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Reads one CONNECT, refuses it with return code 5, then counts whatever else arrives.
        let broker = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let packet_type = stream.read_u8().await.unwrap();
            assert_eq!(packet_type >> 4, 1, "first packet must be CONNECT");
            let mut remaining = 0usize;
            let mut shift = 0;
            loop {
                let byte = stream.read_u8().await.unwrap();
                remaining |= ((byte & 0x7f) as usize) << shift;
                if byte & 0x80 == 0 {
                    break;
                }
                shift += 7;
            }
            let mut body = vec![0u8; remaining];
            stream.read_exact(&mut body).await.unwrap();
            stream.write_all(&[0x20, 0x02, 0x00, 0x05]).await.unwrap();

            let mut rest = Vec::new();
            let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest)).await;
            rest.len()
        });

        let mut config = sample_config();
        config.mqtt.host = "127.0.0.1".to_string();
        config.mqtt.port = port;

        let err = run_reconciliation(&config, &ReconcileOptions::default()).await.unwrap_err();
        assert!(matches!(err, AppError::BrokerConnect { reason: ConnectFailure::NotAuthorized }));
        assert_eq!(broker.await.unwrap(), 0);
    }
}
