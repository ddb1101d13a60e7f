//! Structured event log (spec.md §7 "user-visible surface"): every
//! actionable transition is both logged via `tracing` and retained in a
//! bounded in-memory ring buffer, mirroring the teacher's
//! `services/state_change.rs` mpsc `Event` fan-out — here collapsed to a
//! single-writer ring since nothing downstream subscribes to it (the HTTP
//! read API is a Non-goal).

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use mapscan_core::ReleaseId;
use serde::{Deserialize, Serialize};

const RING_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    NewBuildDiscovered { release: String },
    NewProductDiscovered { release: String, product_name: String },
    NewRegionsObserved { release: String, product_name: String, regions: Vec<String> },
    ProductNotFound { product_name: String },
    ScanStarted { product_id: i32, release: String },
    ScanFailed { product_id: i32, release: String, message: String },
    ScanCompleted { product_id: i32, release: String, state: String, scan_time_secs: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recorded {
    pub at: DateTime<Utc>,
    pub event: Event,
}

/// A bounded, thread-safe ring buffer of the most recent events, plus a
/// `tracing` emission at a level matched to severity.
pub struct EventLog {
    ring: Mutex<VecDeque<Recorded>>,
}

impl Default for EventLog {
    fn default() -> Self {
        EventLog { ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)) }
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: Event) {
        match &event {
            Event::NewBuildDiscovered { release } => tracing::info!(release, "new build discovered"),
            Event::NewProductDiscovered { release, product_name } => {
                tracing::info!(release, product_name, "new product discovered")
            }
            Event::NewRegionsObserved { release, product_name, regions } => {
                tracing::info!(release, product_name, ?regions, "new regions observed")
            }
            Event::ProductNotFound { product_name } => {
                tracing::warn!(product_name, "product not found, skipping this tick")
            }
            Event::ScanStarted { product_id, release } => tracing::debug!(product_id, release, "scan started"),
            Event::ScanFailed { product_id, release, message } => {
                tracing::error!(product_id, release, message, "scan failed")
            }
            Event::ScanCompleted { product_id, release, state, scan_time_secs } => {
                tracing::info!(product_id, release, state, scan_time_secs, "scan completed")
            }
        }

        let mut ring = self.ring.lock().expect("event log mutex poisoned");
        if ring.len() == RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(Recorded { at: Utc::now(), event });
    }

    pub fn recent(&self, limit: usize) -> Vec<Recorded> {
        let ring = self.ring.lock().expect("event log mutex poisoned");
        ring.iter().rev().take(limit).cloned().collect()
    }
}

pub fn release_str(release: ReleaseId) -> String {
    release.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_evicts_oldest() {
        let log = EventLog::new();
        for i in 0..RING_CAPACITY + 5 {
            log.emit(Event::NewBuildDiscovered { release: format!("1.0.0.{i}") });
        }
        let recent = log.recent(RING_CAPACITY);
        assert_eq!(recent.len(), RING_CAPACITY);
        match &recent[0].event {
            Event::NewBuildDiscovered { release } => assert_eq!(release, &format!("1.0.0.{}", RING_CAPACITY + 4)),
            _ => panic!("unexpected event"),
        }
    }
}
