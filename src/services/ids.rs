//! Time-ordered numeric identifiers for records and artifact names.

use chrono::Utc;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Hands out millisecond-scale ids that never repeat within the process.
///
/// Each id is `max(now_ms, last + 1)`, so ids still read as wall-clock
/// timestamps but two calls in the same millisecond get distinct values.
#[derive(Clone, Debug, Default)]
pub struct IdGenerator {
    last: Arc<AtomicU64>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}
