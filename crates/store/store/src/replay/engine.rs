use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};

use crate::cursor::Cursor;
use crate::error::{StoreError, StoreResult};
use crate::store::{EventStore, StoredEvent};

/// Engine for replaying events in ingestion order.
///
/// Replay streams events strictly ordered by `(created_at, sequence)`,
/// never by producer timestamp, and never rewinds within one pass.
/// Bounded replays are finite; open-ended replays tail the log live
/// until cancelled.
pub struct ReplayEngine {
    store: Arc<dyn EventStore>,
    config: ReplayConfig,
}

/// Configuration for replay delivery.
#[derive(Debug, Clone, Copy)]
pub struct ReplayConfig {
    /// Capacity of the delivery channel between the pump and the
    /// consumer. Backpressure suspends the pump, not the store.
    pub buffer: usize,
    /// Events fetched from the store per read.
    pub read_batch: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            buffer: 256,
            read_batch: 256,
        }
    }
}

/// A half-open slice of the log in ingestion order.
///
/// `after` is exclusive: resuming with the cursor of the last event a
/// consumer processed never redelivers that event. `until` is
/// inclusive; `None` means live tail.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayRange {
    /// Resume strictly after this position; `None` replays from the
    /// beginning of the log.
    pub after: Option<Cursor>,
    /// Stop after this position; `None` tails the log until cancelled.
    pub until: Option<Cursor>,
}

impl ReplayRange {
    /// Everything ever appended, then live tail.
    pub fn from_start() -> Self {
        Self::default()
    }

    /// Resume strictly after a persisted cursor, then live tail.
    pub fn resume(after: Cursor) -> Self {
        Self {
            after: Some(after),
            until: None,
        }
    }

    /// A finite slice: strictly after `after` (or the start when
    /// `None`), up to and including `until`.
    pub fn bounded(after: Option<Cursor>, until: Cursor) -> Self {
        Self {
            after,
            until: Some(until),
        }
    }

    fn is_bounded(&self) -> bool {
        self.until.is_some()
    }
}

/// Cancels a running replay.
///
/// Cancellation is cooperative and immediate: no partially-delivered
/// event is re-sent, and the pump task exits as soon as it observes the
/// flag, releasing its store subscription.
#[derive(Clone)]
pub struct ReplayHandle {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ReplayHandle {
    fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; level-triggered, so a
    /// cancel that raced a wait is never lost.
    async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in self, so wait_for cannot see it closed.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// A lazy, ordered sequence of replayed events.
///
/// `next()` yields `Ok(Some(event))` in strict ingestion order,
/// `Ok(None)` when a bounded replay is complete, and
/// `Err(StoreError::ReplayCancelled)` once the replay has been
/// cancelled - cancellation is a termination signal, not a failure.
pub struct ReplayStream {
    rx: mpsc::Receiver<StoreResult<StoredEvent>>,
    handle: ReplayHandle,
    /// Set once the pump has surfaced an error; the stream never
    /// reports clean completion afterwards.
    failed: bool,
}

impl ReplayStream {
    /// The next event in ingestion order.
    pub async fn next(&mut self) -> StoreResult<Option<StoredEvent>> {
        if self.failed {
            return Err(StoreError::Storage(
                "replay terminated by storage error".to_string(),
            ));
        }
        if self.handle.is_cancelled() {
            return Err(StoreError::ReplayCancelled);
        }

        tokio::select! {
            _ = self.handle.cancelled() => Err(StoreError::ReplayCancelled),
            received = self.rx.recv() => match received {
                Some(Ok(event)) => {
                    if self.handle.is_cancelled() {
                        return Err(StoreError::ReplayCancelled);
                    }
                    Ok(Some(event))
                }
                Some(Err(err)) => {
                    self.failed = true;
                    Err(err)
                }
                None => {
                    if self.handle.is_cancelled() {
                        Err(StoreError::ReplayCancelled)
                    } else {
                        Ok(None)
                    }
                }
            },
        }
    }

    /// A handle that cancels this replay.
    pub fn handle(&self) -> ReplayHandle {
        self.handle.clone()
    }
}

impl ReplayEngine {
    /// Creates a replay engine with default delivery settings.
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self::with_config(store, ReplayConfig::default())
    }

    /// Creates a replay engine with custom delivery settings.
    pub fn with_config(store: Arc<dyn EventStore>, config: ReplayConfig) -> Self {
        Self { store, config }
    }

    /// Starts a replay over the given range.
    ///
    /// Bounded ranges yield the events committed up to the bound and
    /// finish; multiple consumers may replay the same range
    /// concurrently without interfering. An open-ended range drains
    /// history, then suspends on append notifications and continues as
    /// new events arrive, until cancelled.
    pub fn replay(&self, range: ReplayRange) -> ReplayStream {
        let (tx, rx) = mpsc::channel(self.config.buffer);
        let handle = ReplayHandle::new();

        tracing::info!(
            after = ?range.after,
            until = ?range.until,
            bounded = range.is_bounded(),
            "starting replay"
        );

        let pump = Pump {
            store: Arc::clone(&self.store),
            range,
            read_batch: self.config.read_batch,
            tx,
            handle: handle.clone(),
        };
        tokio::spawn(pump.run());

        ReplayStream {
            rx,
            handle,
            failed: false,
        }
    }
}

/// The producer side of one replay: reads batches from the store and
/// forwards them in order, suspending between batches when tailing.
struct Pump {
    store: Arc<dyn EventStore>,
    range: ReplayRange,
    read_batch: usize,
    tx: mpsc::Sender<StoreResult<StoredEvent>>,
    handle: ReplayHandle,
}

impl Pump {
    async fn run(self) {
        // Subscribe before the first read so appends landing between
        // the history drain and the wait cannot be missed.
        let mut tail = self.store.subscribe_tail();
        let mut cursor = self.range.after;
        let mut delivered: u64 = 0;

        loop {
            if self.handle.is_cancelled() {
                break;
            }

            let batch = match self
                .store
                .read_after(cursor, self.range.until, self.read_batch)
                .await
            {
                Ok(batch) => batch,
                Err(err) => {
                    let _ = self.tx.send(Err(err)).await;
                    return;
                }
            };

            let drained = batch.len() < self.read_batch;

            for event in batch {
                if self.handle.is_cancelled() {
                    return;
                }
                cursor = Some(event.cursor());
                delivered += 1;
                tracing::debug!(
                    event_id = %event.event_id,
                    cursor = %event.cursor(),
                    "replaying event"
                );

                tokio::select! {
                    _ = self.handle.cancelled() => return,
                    sent = self.tx.send(Ok(event)) => {
                        // Consumer dropped the stream.
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }

            if !drained {
                continue;
            }

            if self.range.is_bounded() {
                tracing::info!(delivered, "bounded replay complete");
                return;
            }

            // Live tail: suspend until a new append lands or the
            // replay is cancelled. A lagged receiver is fine - the
            // next read catches up from our cursor.
            tokio::select! {
                _ = self.handle.cancelled() => return,
                received = tail.recv() => match received {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        // Store dropped; nothing more will ever arrive.
                        return;
                    }
                },
            }
        }
    }
}
