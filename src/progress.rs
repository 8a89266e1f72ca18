//! Progress sinks. They only observe the computation; none of them may change a result.

pub trait Progress {
    /// A new task with `total` steps, if known.
    fn start(&mut self, _label: &str, _total: Option<usize>) {}
    fn step(&mut self, _count: usize) {}
    fn status(&mut self, _message: &str) {}
    fn finish(&mut self) {}
}

/// Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {}

/// Reports through the `log` facade every `interval` steps.
#[derive(Debug, Clone)]
pub struct LogProgress {
    label: String,
    total: Option<usize>,
    done: usize,
    interval: usize,
    started: Option<std::time::Instant>,
}

impl LogProgress {
    pub fn new(interval: usize) -> Self {
        Self {
            label: String::new(),
            total: None,
            done: 0,
            interval: interval.max(1),
            started: None,
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl Progress for LogProgress {
    fn start(&mut self, label: &str, total: Option<usize>) {
        self.label = label.to_string();
        self.total = total;
        self.done = 0;
        self.started = Some(std::time::Instant::now());
    }
    fn step(&mut self, count: usize) {
        let before = self.done / self.interval;
        self.done += count;
        if before < self.done / self.interval {
            match self.total {
                Some(total) => debug!("{}\t{}/{}", self.label, self.done, total),
                None => debug!("{}\t{}", self.label, self.done),
            }
        }
    }
    fn status(&mut self, message: &str) {
        info!("{}\t{}", self.label, message);
    }
    fn finish(&mut self) {
        let elapsed = self.started.map(|s| s.elapsed().as_millis()).unwrap_or(0);
        debug!("{}\tDONE\t{}\t{}ms", self.label, self.done, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn counts_steps() {
        let mut progress = LogProgress::new(2);
        progress.start("test", Some(5));
        for _ in 0..5 {
            progress.step(1);
        }
        progress.finish();
        assert_eq!(progress.done, 5);
        let mut none = NoProgress;
        none.start("test", None);
        none.step(3);
        none.finish();
    }
}
