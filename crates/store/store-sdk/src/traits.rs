//! Consumer-side traits: event handling and cursor checkpointing.

use std::collections::HashMap;

use async_trait::async_trait;
use eventlog_store::replay::{ReplayRange, ReplayStream};
use eventlog_store::{Cursor, StoreError, StoreResult, StoredEvent};
use tokio::sync::RwLock;

/// A replay consumer.
///
/// Delivery is at-least-once across cursor restarts: if a consumer
/// crashes between handling an event and persisting its cursor, that
/// event is redelivered on resume. Implementations must therefore be
/// idempotent.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Stable identifier, keys the consumer's persisted cursor.
    fn id(&self) -> &str;

    /// Processes one replayed event.
    async fn handle(&self, event: &StoredEvent) -> StoreResult<()>;
}

/// Persistence for consumer replay checkpoints.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// The last cursor the consumer processed, if any.
    async fn load(&self, consumer_id: &str) -> StoreResult<Option<Cursor>>;

    /// Records the last cursor the consumer processed.
    async fn save(&self, consumer_id: &str, cursor: Cursor) -> StoreResult<()>;
}

/// In-memory cursor store for tests and single-process consumers.
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<String, Cursor>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self {
            cursors: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCursorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn load(&self, consumer_id: &str) -> StoreResult<Option<Cursor>> {
        let cursors = self.cursors.read().await;
        Ok(cursors.get(consumer_id).copied())
    }

    async fn save(&self, consumer_id: &str, cursor: Cursor) -> StoreResult<()> {
        let mut cursors = self.cursors.write().await;
        cursors.insert(consumer_id.to_string(), cursor);
        Ok(())
    }
}

/// The replay range that resumes a consumer from its checkpoint.
pub async fn resume_range(
    cursors: &dyn CursorStore,
    consumer_id: &str,
    until: Option<Cursor>,
) -> StoreResult<ReplayRange> {
    let after = cursors.load(consumer_id).await?;
    Ok(ReplayRange { after, until })
}

/// Drives a replay stream through a consumer, checkpointing after each
/// successfully handled event.
///
/// Returns `Ok(())` when a bounded replay completes or the replay is
/// cancelled; handler and checkpoint errors propagate and leave the
/// last good checkpoint in place.
pub async fn run_consumer(
    mut stream: ReplayStream,
    cursors: &dyn CursorStore,
    consumer: &dyn EventConsumer,
) -> StoreResult<()> {
    loop {
        match stream.next().await {
            Ok(Some(event)) => {
                consumer.handle(&event).await?;
                cursors.save(consumer.id(), event.cursor()).await?;
            }
            Ok(None) => {
                tracing::info!(consumer = consumer.id(), "replay complete");
                return Ok(());
            }
            Err(StoreError::ReplayCancelled) => {
                tracing::info!(consumer = consumer.id(), "replay cancelled");
                return Ok(());
            }
            Err(err) => return Err(err),
        }
    }
}
