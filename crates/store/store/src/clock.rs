//! Ingestion clock - the monotonic sequencer behind `created_at`.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

use crate::cursor::Cursor;

/// A single ingestion position issued by the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Store-assigned ingestion time, non-decreasing per clock.
    pub created_at: DateTime<Utc>,
    /// Strictly-increasing tiebreak counter.
    pub sequence: u64,
}

impl Tick {
    /// The cursor identifying this position in the log.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at.timestamp_micros(), self.sequence)
    }
}

/// Issues ingestion positions for the append path.
///
/// This is the one piece of process-wide mutable state the ordering
/// invariant depends on, so it is an explicitly owned, injectable
/// component rather than a hidden singleton. Tests substitute
/// [`ManualClock`] for deterministic positions.
///
/// Successive ticks from one clock are strictly increasing as
/// `(created_at, sequence)` pairs, never repeating or regressing.
pub trait IngestionClock: Send + Sync {
    /// Issues the next ingestion position.
    fn tick(&self) -> Tick;
}

/// Wall-clock backed sequencer.
///
/// `created_at` is the system time clamped to never regress (a backward
/// NTP step cannot reorder the log); the sequence counter alone already
/// makes every tick unique.
pub struct SystemClock {
    sequence: AtomicU64,
    last_micros: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            last_micros: AtomicI64::new(i64::MIN),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestionClock for SystemClock {
    fn tick(&self) -> Tick {
        let now = Utc::now().timestamp_micros();
        let floor = self.last_micros.fetch_max(now, Ordering::AcqRel);
        let micros = now.max(floor);
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel);

        Tick {
            created_at: Utc
                .timestamp_micros(micros)
                .single()
                .unwrap_or_else(Utc::now),
            sequence,
        }
    }
}

/// Deterministic clock for tests.
///
/// Returns a fixed `created_at` until advanced, so tests can force
/// ingestion-time ties and verify sequence tiebreaks.
pub struct ManualClock {
    inner: Mutex<ManualState>,
}

struct ManualState {
    now: DateTime<Utc>,
    sequence: u64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(ManualState {
                now: start,
                sequence: 0,
            }),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        let mut state = self.inner.lock().expect("manual clock lock");
        state.now += by;
    }
}

impl IngestionClock for ManualClock {
    fn tick(&self) -> Tick {
        let mut state = self.inner.lock().expect("manual clock lock");
        let tick = Tick {
            created_at: state.now,
            sequence: state.sequence,
        };
        state.sequence += 1;
        tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_strictly_increasing() {
        let clock = SystemClock::new();
        let mut last = clock.tick();

        for _ in 0..1000 {
            let next = clock.tick();
            assert!(
                (next.created_at, next.sequence) > (last.created_at, last.sequence),
                "tick regressed: {next:?} after {last:?}"
            );
            last = next;
        }
    }

    #[test]
    fn test_manual_clock_ties_broken_by_sequence() {
        let clock = ManualClock::new(Utc::now());
        let a = clock.tick();
        let b = clock.tick();

        assert_eq!(a.created_at, b.created_at);
        assert!(a.sequence < b.sequence);
        assert!(a.cursor() < b.cursor());
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(Utc::now());
        let a = clock.tick();
        clock.advance(chrono::Duration::seconds(5));
        let b = clock.tick();

        assert_eq!(b.created_at - a.created_at, chrono::Duration::seconds(5));
    }
}
