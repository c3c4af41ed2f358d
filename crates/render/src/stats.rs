use std::time::{Duration, Instant};

/// Per-frame counters for instrumentation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    pub draw_commands: usize,
    /// Commands with at least one visible instance.
    pub draws_submitted: usize,
    pub visible_instances: usize,
    pub lightmap_uploads: usize,
    pub terrain_nodes: usize,
    pub partitions_loaded: usize,
    pub partitions_unloaded: usize,
    pub resident_partitions: usize,
    pub cull_time: Duration,
}

/// Ring buffer of frame phase timings, checked against a budget.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    budget: Duration,
    history: Vec<Duration>,
    index: usize,
    filled: bool,
    over_budget: usize,
}

impl FrameTimer {
    pub fn new(budget: Duration, capacity: usize) -> Self {
        Self {
            budget,
            history: vec![Duration::ZERO; capacity.max(1)],
            index: 0,
            filled: false,
            over_budget: 0,
        }
    }

    /// Time `f` and record it.
    pub fn time<R>(&mut self, f: impl FnOnce() -> R) -> (R, Duration) {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        self.record(elapsed);
        (result, elapsed)
    }

    pub fn record(&mut self, dt: Duration) {
        self.history[self.index] = dt;
        self.index = (self.index + 1) % self.history.len();
        if self.index == 0 {
            self.filled = true;
        }
        if dt > self.budget {
            self.over_budget += 1;
            tracing::debug!(elapsed = ?dt, budget = ?self.budget, "frame phase over budget");
        }
    }

    fn recorded(&self) -> &[Duration] {
        let count = if self.filled { self.history.len() } else { self.index };
        &self.history[..count]
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Frames over budget since creation.
    pub fn over_budget(&self) -> usize {
        self.over_budget
    }

    pub fn average(&self) -> Duration {
        let recorded = self.recorded();
        if recorded.is_empty() {
            return Duration::ZERO;
        }
        recorded.iter().sum::<Duration>() / recorded.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.recorded().iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.recorded().iter().copied().min().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        self.recorded().len()
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        // One 60 Hz frame, two seconds of history.
        Self::new(Duration::from_micros(16_667), 120)
    }
}
