//! Opaque resumable position in the ingestion-ordered event sequence.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// A resumable position in the event log.
///
/// Cursors order by store ingestion time (`created_at` microseconds)
/// with the append sequence number as tiebreak, so they follow the
/// canonical replay order exactly. Consumers persist the cursor of the
/// last event they processed and resume replay strictly after it.
///
/// The token form is printable and stable; treat it as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor {
    /// Ingestion time as microseconds since the Unix epoch.
    pub(crate) created_at_micros: i64,
    /// Strictly-increasing append sequence, breaks ingestion-time ties.
    pub(crate) sequence: u64,
}

impl Cursor {
    pub(crate) fn new(created_at_micros: i64, sequence: u64) -> Self {
        Self {
            created_at_micros,
            sequence,
        }
    }

    /// Encodes the cursor as a printable token.
    pub fn encode(&self) -> String {
        format!("{}-{}", self.created_at_micros, self.sequence)
    }

    /// Decodes a token produced by [`Cursor::encode`].
    pub fn decode(token: &str) -> StoreResult<Self> {
        let bad = || StoreError::BadCursor {
            token: token.to_string(),
        };

        // rsplit: the micros component may itself start with a minus sign.
        let (micros_part, seq_part) = token.rsplit_once('-').ok_or_else(bad)?;
        let created_at_micros: i64 = micros_part.parse().map_err(|_| bad())?;
        let sequence: u64 = seq_part.parse().map_err(|_| bad())?;

        Ok(Self {
            created_at_micros,
            sequence,
        })
    }

    /// The append sequence component of this cursor.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let cursor = Cursor::new(1_700_000_000_123_456, 42);
        let token = cursor.encode();
        assert_eq!(Cursor::decode(&token).unwrap(), cursor);
    }

    #[test]
    fn test_decode_negative_micros() {
        // Pre-epoch ingestion times still round-trip.
        let cursor = Cursor::new(-5, 1);
        assert_eq!(Cursor::decode(&cursor.encode()).unwrap(), cursor);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        for token in ["", "abc", "12", "12-", "-42", "12-x", "x-42"] {
            match Cursor::decode(token) {
                Err(StoreError::BadCursor { token: t }) => assert_eq!(t, token),
                other => panic!("expected BadCursor for {token:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_ordering_follows_ingestion_order() {
        let a = Cursor::new(10, 1);
        let b = Cursor::new(10, 2);
        let c = Cursor::new(11, 0);

        assert!(a < b);
        assert!(b < c);
    }
}
