//! Build-log sinks.

use std::sync::Mutex;

/// Where user-visible build messages go.
pub trait TaskListener: Send + Sync {
    fn line(&self, message: &str);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl TaskListener for NullListener {
    fn line(&self, _message: &str) {}
}

/// Writes build messages to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrListener;

impl TaskListener for StderrListener {
    fn line(&self, message: &str) {
        tracing::info!(target: "filebind_params::build_log", "{}", message);
        eprintln!("{}", message);
    }
}

/// Keeps every line in memory; also mirrors them to tracing.
#[derive(Debug, Default)]
pub struct CapturingListener {
    lines: Mutex<Vec<String>>,
}

impl CapturingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }

    pub fn text(&self) -> String {
        self.lines().join("\n")
    }
}

impl TaskListener for CapturingListener {
    fn line(&self, message: &str) {
        tracing::info!(target: "filebind_params::build_log", "{}", message);
        self.lines
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(message.to_string());
    }
}
