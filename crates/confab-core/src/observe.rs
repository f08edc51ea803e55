use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Cross-cutting observability hooks.
///
/// Agent nodes and the multiplexer call these explicitly instead of relying
/// on interception. Implementations must be cheap; anything expensive
/// belongs behind a channel.
pub trait Observer: Send + Sync {
    /// Called when a named operation begins. Returns a token the caller
    /// hands back to `operation_end`.
    fn operation_start(&self, name: &str) -> OpToken;

    /// Called when the operation finishes, successfully or not.
    fn operation_end(&self, token: OpToken, success: bool);

    /// Called for conditions worth surfacing even when nothing failed
    /// (empty responses, recursion-cap hits, provider failovers).
    fn anomaly(&self, name: &str, detail: &str);
}

/// Opaque per-operation token.
#[derive(Debug)]
pub struct OpToken {
    name: String,
    started: Instant,
}

/// Observer that logs durations via `tracing` and keeps aggregate counters.
#[derive(Default)]
pub struct TracingObserver {
    stats: Mutex<ObserverStats>,
}

#[derive(Debug, Default, Clone)]
pub struct ObserverStats {
    pub operations: u64,
    pub failures: u64,
    pub anomalies: u64,
    pub total_duration: Duration,
}

impl TracingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ObserverStats {
        self.stats.lock().unwrap().clone()
    }
}

impl Observer for TracingObserver {
    fn operation_start(&self, name: &str) -> OpToken {
        OpToken {
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    fn operation_end(&self, token: OpToken, success: bool) {
        let elapsed = token.started.elapsed();
        {
            let mut stats = self.stats.lock().unwrap();
            stats.operations += 1;
            stats.total_duration += elapsed;
            if !success {
                stats.failures += 1;
            }
        }
        info!(
            op = %token.name,
            ms = elapsed.as_millis() as u64,
            success,
            "operation complete"
        );
    }

    fn anomaly(&self, name: &str, detail: &str) {
        self.stats.lock().unwrap().anomalies += 1;
        warn!(anomaly = %name, detail, "anomaly observed");
    }
}

/// No-op observer for tests and callers that opt out.
pub struct NullObserver;

impl Observer for NullObserver {
    fn operation_start(&self, name: &str) -> OpToken {
        OpToken {
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    fn operation_end(&self, _token: OpToken, _success: bool) {}

    fn anomaly(&self, _name: &str, _detail: &str) {}
}
