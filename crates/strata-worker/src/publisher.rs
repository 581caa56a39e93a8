//! Message publisher that writes outbox entries to the log.

use async_trait::async_trait;
use strata_core::outbox::{MessagePublisher, OutboxEntry, PublishError};
use tracing::info;

/// Publishes by emitting one structured `info` event per entry.
///
/// Stands in for a broker client; downstream collectors pick the messages
/// up from the JSON log stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl MessagePublisher for LogPublisher {
    async fn publish(&self, topic: &str, entry: &OutboxEntry) -> Result<(), PublishError> {
        let payload = serde_json::to_string(&entry.payload)
            .map_err(|e| PublishError(format!("failed to encode payload: {e}")))?;
        info!(
            target: "strata::outbox",
            topic,
            entry_id = entry.id,
            event_id = entry.event_id,
            aggregate_id = %entry.aggregate_id,
            version = entry.version,
            payload,
            "message published"
        );
        Ok(())
    }
}
