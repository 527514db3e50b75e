use crate::core::discovery_builder::DiscoveryEntry;
use crate::errors::AppError;
use async_trait::async_trait;
use log::info;

/// Anything that can put a retained discovery message on the broker.
///
/// Implementations must tolerate concurrent calls: the stale-topic cleaner and
/// the main publish loop share one publisher.
#[async_trait]
pub trait DiscoveryPublisher: Send + Sync {
    async fn publish(&self, entry: &DiscoveryEntry) -> Result<(), AppError>;
}

/// Logs what would be published. Backs `--dry-run`.
pub struct LoggerPublisher;

#[async_trait]
impl DiscoveryPublisher for LoggerPublisher {
    async fn publish(&self, entry: &DiscoveryEntry) -> Result<(), AppError> {
        if entry.is_removal() {
            info!("📝 (dry-run) would clear '{}' retain={}", entry.topic, entry.retain);
        } else {
            info!("📝 (dry-run) would publish '{}' retain={}: {}", entry.topic, entry.retain, entry.payload);
        }
        Ok(())
    }
}
