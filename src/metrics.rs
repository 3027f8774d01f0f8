//! Prometheus metrics for the infeed and execution paths

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Counter {
    /// Create a new counter
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
            help,
        }
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by delta
    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Gauge metric (can go up or down)
pub struct Gauge {
    value: AtomicI64,
    name: &'static str,
    help: &'static str,
}

impl Gauge {
    /// Create a new gauge
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name,
            help,
        }
    }

    /// Set value
    pub fn set(&self, val: i64) {
        self.value.store(val, Ordering::Relaxed);
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by 1
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} gauge\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Standard lockstep metrics
pub mod standard {
    use super::*;

    pub static ENQUEUES_ISSUED: Counter = Counter::new(
        "lockstep_enqueues_issued_total",
        "Total infeed enqueue executions",
    );

    pub static BATCH_SIGNALS: Counter = Counter::new(
        "lockstep_batch_signals_total",
        "Total NEXT_BATCH signals sent to the feeder",
    );

    pub static STEPS_EXECUTED: Counter = Counter::new(
        "lockstep_steps_executed_total",
        "Total per-shard step executions",
    );

    pub static FEEDER_ACTIVE: Gauge = Gauge::new(
        "lockstep_feeder_active",
        "Whether the infeed feeder task is running",
    );

    pub static GLOBAL_STEP: Gauge = Gauge::new(
        "lockstep_global_step",
        "Current global training step",
    );
}

/// Gather all standard metrics in Prometheus text format
pub fn gather_system_metrics() -> String {
    let mut output = String::new();

    output.push_str(&standard::ENQUEUES_ISSUED.to_prometheus());
    output.push_str(&standard::BATCH_SIGNALS.to_prometheus());
    output.push_str(&standard::STEPS_EXECUTED.to_prometheus());
    output.push_str(&standard::FEEDER_ACTIVE.to_prometheus());
    output.push_str(&standard::GLOBAL_STEP.to_prometheus());

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new("test_counter", "Test counter");
        assert_eq!(counter.get(), 0);

        counter.inc();
        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
        assert!(counter.to_prometheus().contains("test_counter 6"));
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new("test_gauge", "Test gauge");
        gauge.set(10);
        gauge.dec();
        assert_eq!(gauge.get(), 9);
    }
}
