use std::io::{self, Write};
use std::time::Instant;

use serde::Serialize;

/// Chunk-level progress of one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunProgress {
    pub completed_chunks: usize,
    pub total_chunks: usize,
}

impl RunProgress {
    #[must_use]
    pub fn new(total_chunks: usize) -> Self {
        Self {
            completed_chunks: 0,
            total_chunks,
        }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.completed_chunks >= self.total_chunks
    }

    #[must_use]
    pub fn percent(&self) -> f64 {
        let total = self.total_chunks.max(1);
        (self.completed_chunks.min(total) as f64 / total as f64) * 100.0
    }
}

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: RunProgress);

    fn on_message(&self, _msg: &str) {}
}

impl<F> ProgressObserver for F
where
    F: Fn(RunProgress) + Send + Sync,
{
    fn on_progress(&self, progress: RunProgress) {
        self(progress)
    }
}

pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _progress: RunProgress) {}
}

pub struct ConsoleProgress {
    enabled: bool,
    t0: Instant,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {}", msg.as_ref());
    }

    pub fn progress(&self, label: &str, current: usize, total: usize) {
        if !self.enabled {
            return;
        }
        let total = total.max(1);
        let current = current.min(total);
        let pct = (current as f64 / total as f64) * 100.0;
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {label} {current}/{total} ({pct:5.1}%)");
    }
}

impl ProgressObserver for ConsoleProgress {
    fn on_progress(&self, progress: RunProgress) {
        self.progress("Chunks", progress.completed_chunks, progress.total_chunks);
    }

    fn on_message(&self, msg: &str) {
        self.info(msg);
    }
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
