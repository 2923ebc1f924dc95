//! Step round-trip timing

use std::fmt;
use std::time::Duration;

/// Running latency statistics for `step` calls
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepTimings {
    count: u64,
    total: Duration,
    max: Duration,
    last: Option<Duration>,
}

impl StepTimings {
    pub fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.max = self.max.max(elapsed);
        self.last = Some(elapsed);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<Duration> {
        u32::try_from(self.count)
            .ok()
            .filter(|&n| n > 0)
            .map(|n| self.total / n)
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn last(&self) -> Option<Duration> {
        self.last
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl fmt::Display for StepTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.mean(), self.last) {
            (Some(mean), Some(last)) => write!(
                f,
                "steps={} mean={:.2}ms max={:.2}ms last={:.2}ms",
                self.count,
                millis(mean),
                millis(self.max),
                millis(last)
            ),
            _ => write!(f, "steps={}", self.count),
        }
    }
}
