//! Shared fixtures for the parameter integration tests.

#![allow(dead_code)]

use filebind_params::{
    Build, CancellationToken, CapturingListener, DirectoryStash, ExecContext, FileParameterValue,
    LocalLauncher, Node, ParameterValue, Queue, QueueListeners,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const CONTENT: &str = "uploaded content here";
pub const CONTENT_BASE64: &str = "dXBsb2FkZWQgY29udGVudCBoZXJl";

/// A filebind home in a temp directory: one shared stash, an upload spool
/// and any number of nodes.
pub struct Harness {
    pub home: TempDir,
    pub stash: DirectoryStash,
    pub listener: CapturingListener,
    pub launcher: LocalLauncher,
}

impl Harness {
    pub fn new() -> Self {
        let home = tempfile::tempdir().unwrap();
        let stash = DirectoryStash::new(home.path().join("stash"));
        Self {
            home,
            stash,
            listener: CapturingListener::new(),
            launcher: LocalLauncher,
        }
    }

    pub fn upload_root(&self) -> PathBuf {
        self.home.path().join("tmp")
    }

    pub fn node(&self, name: &str) -> Node {
        Node::new(name, self.home.path().join("nodes").join(name)).unwrap()
    }

    pub fn workspace(&self, node: &str, job: &str) -> PathBuf {
        self.node(node).prepare_workspace(job).unwrap()
    }

    pub fn exec(&self) -> ExecContext<'_> {
        self.exec_with(CancellationToken::new())
    }

    pub fn exec_with(&self, cancel: CancellationToken) -> ExecContext<'_> {
        ExecContext::new(&self.launcher, &self.listener, &self.stash, cancel)
    }

    /// Schedule and start a build of `job` on a queue with no listeners.
    pub fn start_build(&self, job: &str, parameters: Option<Vec<ParameterValue>>) -> Build {
        let mut queue = Queue::with_listeners(Arc::new(QueueListeners::new()));
        queue.schedule(job, parameters).unwrap();
        queue.start_next().unwrap()
    }
}

pub fn file_param(value: impl Into<FileParameterValue>) -> ParameterValue {
    ParameterValue::File(value.into())
}

/// Entries directly under `dir`; empty when it does not exist.
pub fn entries(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(rd) => rd.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}
