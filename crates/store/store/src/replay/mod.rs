//! Replay - ordered, resumable re-delivery of historical events.

mod engine;

pub use engine::{ReplayConfig, ReplayEngine, ReplayHandle, ReplayRange, ReplayStream};
