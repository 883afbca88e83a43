use std::sync::Mutex;

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Beams computed and delivered.
    pub beams: usize,
    /// Beams whose compute failed; these are still delivered, carrying
    /// missing values.
    pub errors: usize,
    /// Scan events delivered to the sink.
    pub events: usize,
}

pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    pub fn record_beam(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.beams += 1;
        }
    }

    pub fn record_error(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.errors += 1;
        }
    }

    pub fn record_event(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.events += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        match self.inner.lock() {
            Ok(metrics) => *metrics,
            Err(_) => MetricsSnapshot::default(),
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let metrics = MetricsRecorder::new();
        metrics.record_beam();
        metrics.record_beam();
        metrics.record_error();
        metrics.record_event();
        let snap = metrics.snapshot();
        assert_eq!(snap.beams, 2);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.events, 1);
    }
}
