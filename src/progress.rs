//! Progress reporting for long batch stages
//!
//! Hashing and moving block the caller for the length of the batch, so each
//! stage reports per-item progress to an observer supplied by the caller.

pub trait Progress {
    /// A stage with `total` items is starting
    fn begin(&mut self, _stage: &str, _total: usize) {}

    /// One more item of the current stage is done
    fn advance(&mut self) {}

    /// The current stage is over
    fn finish(&mut self) {}
}

/// Discards all progress
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Progress for Silent {}

/// Logs progress through `tracing` every `every` items
#[derive(Debug)]
pub struct LogProgress {
    every: usize,
    stage: String,
    total: usize,
    done: usize,
}

impl LogProgress {
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
            stage: String::new(),
            total: 0,
            done: 0,
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(100)
    }
}

impl Progress for LogProgress {
    fn begin(&mut self, stage: &str, total: usize) {
        self.stage = stage.to_string();
        self.total = total;
        self.done = 0;
        tracing::info!(stage, total, "Starting");
    }

    fn advance(&mut self) {
        self.done += 1;
        if self.done % self.every == 0 {
            tracing::info!(stage = %self.stage, done = self.done, total = self.total, "Progress");
        }
    }

    fn finish(&mut self) {
        tracing::info!(stage = %self.stage, done = self.done, total = self.total, "Finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_progress_counts() {
        let mut progress = LogProgress::new(2);
        progress.begin("Moving files", 3);
        progress.advance();
        progress.advance();
        progress.advance();
        progress.finish();
        assert_eq!(progress.done, 3);

        progress.begin("Hashing", 1);
        assert_eq!(progress.done, 0);
    }
}
