//! Cleanup for uploads whose build never started.
//!
//! A stashed value spools its upload at submission time and only hands it to
//! the stash once the build runs. If the queue item is cancelled first, the
//! spooled copy would stay on disk forever; this listener removes it.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use crate::build::discard_uploads;
use crate::error::CleanupWarning;
use crate::queue::{LeftItem, QueueListener};

#[derive(Debug, Default)]
pub struct StashedFileReaper {
    reaped: AtomicUsize,
}

impl StashedFileReaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upload directories removed so far.
    pub fn reaped(&self) -> usize {
        self.reaped.load(Ordering::Relaxed)
    }

    /// Remove the pending uploads of a cancelled item. Failures are logged
    /// and returned, not raised.
    pub fn reap(&self, left: &mut LeftItem) -> Vec<CleanupWarning> {
        if !left.is_cancelled() {
            return Vec::new();
        }
        let task = format!("{} ({})", left.item.job, left.item.id);
        let Some(parameters) = left.item.parameters.as_mut() else {
            return Vec::new();
        };
        let (removed, warnings) = discard_uploads(parameters, &task);
        for warning in &warnings {
            warning.log();
        }
        if removed > 0 {
            self.reaped.fetch_add(removed, Ordering::Relaxed);
            info!(task = %task, removed, "reaped uploads");
        }
        warnings
    }
}

impl QueueListener for StashedFileReaper {
    fn on_left(&self, item: &mut LeftItem) {
        // Warnings are already logged.
        let _ = self.reap(item);
    }
}
