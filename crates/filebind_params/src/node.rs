//! Execution nodes and the process launcher.

use filebind_protocol::{paths, GoodName};
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::env::EnvVars;
use crate::error::ParamError;
use crate::listener::TaskListener;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A worker on which build steps physically run.
///
/// Every node owns a root directory; nodes never share paths with each other,
/// which is what makes cross-node retrieval go through the stash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    name: GoodName,
    root: PathBuf,
}

impl Node {
    pub fn new(name: &str, root: impl Into<PathBuf>) -> Result<Self, ParamError> {
        Ok(Self {
            name: GoodName::new(name)?,
            root: root.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/workspace/<job>`
    pub fn workspace(&self, job: &str) -> PathBuf {
        self.root.join("workspace").join(job)
    }

    /// Create the workspace for `job` if needed and return it.
    pub fn prepare_workspace(&self, job: &str) -> Result<PathBuf, ParamError> {
        let job = GoodName::new(job)?;
        let ws = self.workspace(&job);
        fs::create_dir_all(&ws)
            .map_err(|e| ParamError::io(format!("creating workspace {}", ws.display()), e))?;
        Ok(ws)
    }

    /// The private temp area next to a workspace (`<ws>@tmp`).
    pub fn workspace_temp(workspace: &Path) -> PathBuf {
        paths::workspace_temp(workspace)
    }
}

/// Runs commands on a node.
pub trait Launcher: Send + Sync {
    /// Run `command` through the platform shell and return its exit code.
    fn launch(
        &self,
        command: &str,
        cwd: &Path,
        env: &EnvVars,
        listener: &dyn TaskListener,
        cancel: &CancellationToken,
    ) -> Result<i32, ParamError>;
}

/// Launches processes on the local machine.
///
/// Output is collected in a temp file and replayed to the listener once the
/// process exits, so no reader threads are needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalLauncher;

impl LocalLauncher {
    fn shell(command: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }
}

impl Launcher for LocalLauncher {
    fn launch(
        &self,
        command: &str,
        cwd: &Path,
        env: &EnvVars,
        listener: &dyn TaskListener,
        cancel: &CancellationToken,
    ) -> Result<i32, ParamError> {
        cancel.check("starting process")?;
        let mut output = tempfile::tempfile()
            .map_err(|e| ParamError::io("creating process output buffer", e))?;
        let stderr = output
            .try_clone()
            .map_err(|e| ParamError::io("creating process output buffer", e))?;
        let stdout = output
            .try_clone()
            .map_err(|e| ParamError::io("creating process output buffer", e))?;

        let mut cmd = Self::shell(command);
        cmd.current_dir(cwd)
            .env_clear()
            .envs(env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        // Commands still need to find their tools.
        if !env.contains_key("PATH") {
            if let Some(path) = std::env::var_os("PATH") {
                cmd.env("PATH", path);
            }
        }

        debug!(command, cwd = %cwd.display(), "launching");
        let mut child = cmd
            .spawn()
            .map_err(|e| ParamError::io(format!("starting '{}'", command), e))?;

        let status = loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| ParamError::io(format!("waiting for '{}'", command), e))?
            {
                break status;
            }
            if cancel.is_cancelled() {
                info!(command, "killing process after cancellation");
                let _ = child.kill();
                let _ = child.wait();
                replay(&mut output, listener);
                return Err(ParamError::Interrupted(format!("running '{}'", command)));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        replay(&mut output, listener);
        // Killed by a signal reports no code.
        Ok(status.code().unwrap_or(-1))
    }
}

fn replay(output: &mut fs::File, listener: &dyn TaskListener) {
    let mut text = String::new();
    if output.seek(SeekFrom::Start(0)).is_ok() {
        let mut bytes = Vec::new();
        if output.read_to_end(&mut bytes).is_ok() {
            text = String::from_utf8_lossy(&bytes).into_owned();
        }
    }
    for line in text.lines() {
        listener.line(line);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::listener::CapturingListener;

    #[test]
    fn workspace_layout() {
        let node = Node::new("remote", "/nodes/remote").unwrap();
        let ws = node.workspace("myjob");
        assert_eq!(ws, PathBuf::from("/nodes/remote/workspace/myjob"));
        assert_eq!(
            Node::workspace_temp(&ws),
            PathBuf::from("/nodes/remote/workspace/myjob@tmp")
        );
    }

    #[test]
    fn node_name_is_validated() {
        assert!(Node::new("../up", "/tmp").unwrap_err().is_configuration());
    }

    #[test]
    fn local_launcher_passes_env_and_captures_output() {
        let tmp = tempfile::tempdir().unwrap();
        let listener = CapturingListener::new();
        let mut env = EnvVars::new();
        env.put("GREETING", "hello");
        env.put("PATH", std::env::var("PATH").unwrap_or_default());
        let code = LocalLauncher
            .launch(
                "echo \"$GREETING from $(pwd)\"; exit 3",
                tmp.path(),
                &env,
                &listener,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(code, 3);
        assert!(listener.contains("hello from"));
    }

    #[test]
    fn local_launcher_stops_when_cancelled() {
        let tmp = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = LocalLauncher
            .launch("sleep 5", tmp.path(), &EnvVars::new(), &CapturingListener::new(), &cancel)
            .unwrap_err();
        assert!(err.is_interrupted());
    }
}
