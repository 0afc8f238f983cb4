//!
//! Throughput statistics for a listener.
//!
//! Counters are plain atomics written only by the delivery thread. Each field reads exactly,
//! but a snapshot taken while a delivery is being recorded may pair the new count with the
//! previous last-message time.
//!
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ConsumerError;
use crate::time::Clock;

// Offset stored before the first delivery.
const NO_MESSAGE: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub message_count: u64,
    pub duration_seconds: f64,

    /// `floor(message_count / duration_seconds)`, or 0 when no time has elapsed.
    pub messages_per_second: u64,
}

pub(crate) struct Accumulator {
    clock: Arc<dyn Clock>,
    start: Instant,
    message_count: AtomicU64,

    // Nanoseconds since `start` of the most recent delivery.
    last_message: AtomicU64,
}

impl Accumulator {
    /// Starts the clock immediately; idle time before the first message counts.
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        let start = clock.now();
        Accumulator {
            clock,
            start,
            message_count: AtomicU64::new(0),
            last_message: AtomicU64::new(NO_MESSAGE),
        }
    }

    pub(crate) fn record(&self) {
        let offset = self.elapsed().as_nanos().min(u128::from(NO_MESSAGE - 1)) as u64;
        self.message_count.fetch_add(1, Ordering::Relaxed);
        self.last_message.store(offset, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> Statistics {
        let message_count = self.message_count.load(Ordering::Relaxed);
        let duration = match self.last_message.load(Ordering::Relaxed) {
            NO_MESSAGE => self.elapsed(),
            offset => Duration::from_nanos(offset),
        };
        let duration_seconds = duration.as_secs_f64();
        let messages_per_second = if duration_seconds > 0.0 {
            (message_count as f64 / duration_seconds).floor() as u64
        } else {
            0
        };
        Statistics {
            message_count,
            duration_seconds,
            messages_per_second,
        }
    }

    fn elapsed(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.start)
    }
}

/// Read side of a listener's statistics; cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct StatisticsHandle {
    accumulator: Option<Arc<Accumulator>>,
}

impl StatisticsHandle {
    pub(crate) fn new(accumulator: Option<Arc<Accumulator>>) -> Self {
        StatisticsHandle { accumulator }
    }

    pub fn is_enabled(&self) -> bool {
        self.accumulator.is_some()
    }

    /// Snapshot of the counters. Never resets them and never blocks delivery.
    ///
    /// # Errors
    /// Raise ConsumerError::PreconditionViolation if the listener was built without statistics capture.
    pub fn statistics(&self) -> Result<Statistics, ConsumerError> {
        match &self.accumulator {
            Some(accumulator) => Ok(accumulator.snapshot()),
            None => Err(ConsumerError::PreconditionViolation(
                "statistics capture was not enabled for this listener".to_owned(),
            )),
        }
    }
}
