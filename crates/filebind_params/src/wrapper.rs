//! Binding a file parameter to a real file for the duration of one step.
//!
//! [`FileParameterWrapper::set_up`] materializes the parameter into a fresh
//! directory under the workspace's `@tmp` sibling and exports its absolute
//! path as `<NAME>`. The registered [`Delete`] disposer removes that
//! directory when the step scope ends. [`run_step`] ties both together so
//! teardown happens exactly once on every exit path.

use filebind_protocol::{check_good_name, paths};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::build::{Build, BuildKey, ExecContext, ParameterValue};
use crate::env::EnvVars;
use crate::error::{remove_tree, CleanupWarning, ParamError};
use crate::listener::TaskListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WrapperState {
    Idle,
    Resolving,
    Materialized,
    TornDown,
}

/// Disposer that removes a per-step temp directory.
///
/// Only the path is kept, so it can be persisted with a paused step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delete {
    dir: String,
}

impl Delete {
    pub fn new(dir: impl Into<String>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        Path::new(&self.dir)
    }

    /// Remove the directory recursively. Already gone counts as done; any
    /// other failure is reported and returned as a warning.
    pub fn tear_down(&self, build: &BuildKey, listener: &dyn TaskListener) -> Option<CleanupWarning> {
        let warning = remove_tree(self.dir(), || build.to_string());
        match &warning {
            Some(warning) => warning.report(listener),
            None => debug!(build = %build, dir = %self.dir, "step temp directory removed"),
        }
        warning
    }
}

/// Environment overrides and disposer collected by a wrapper's setup.
#[derive(Debug, Default)]
pub struct StepContext {
    env: EnvVars,
    disposer: Option<Delete>,
}

impl StepContext {
    /// A context whose environment starts as `initial_env`.
    pub fn new(initial_env: EnvVars) -> Self {
        Self {
            env: initial_env,
            disposer: None,
        }
    }

    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.put(key, value);
    }

    pub fn env_vars(&self) -> &EnvVars {
        &self.env
    }

    fn env_vars_mut(&mut self) -> &mut EnvVars {
        &mut self.env
    }

    pub fn set_disposer(&mut self, disposer: Delete) {
        self.disposer = Some(disposer);
    }

    pub fn disposer(&self) -> Option<&Delete> {
        self.disposer.as_ref()
    }

    pub fn take_disposer(&mut self) -> Option<Delete> {
        self.disposer.take()
    }
}

/// Binds file parameter `name` for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileParameterWrapper {
    pub name: String,
    #[serde(default)]
    pub allow_no_file: bool,
}

impl FileParameterWrapper {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allow_no_file: false,
        }
    }

    /// Skip instead of failing when the build has no parameter of this name.
    pub fn allow_no_file(mut self, allow: bool) -> Self {
        self.allow_no_file = allow;
        self
    }

    /// Materialize the parameter and register its disposer.
    ///
    /// Returns `Idle` when the parameter is missing and that is allowed,
    /// `Materialized` otherwise. On error nothing is left on disk and `ctx`
    /// carries no disposer.
    pub fn set_up(
        &self,
        ctx: &mut StepContext,
        build: &Build,
        workspace: &Path,
        exec: &ExecContext<'_>,
    ) -> Result<WrapperState, ParamError> {
        let parameters = build
            .parameters
            .as_ref()
            .ok_or_else(|| ParamError::config("No parameters"))?;
        let value = match parameters.iter().find(|p| p.name() == self.name) {
            Some(ParameterValue::File(value)) => value,
            Some(ParameterValue::String(_)) => {
                return Err(ParamError::config(format!(
                    "Unsupported parameter type for {}",
                    self.name
                )))
            }
            None if self.allow_no_file => {
                exec.listener.line(&format!(
                    "Skip file parameter as there is no parameter with name: '{}'",
                    self.name
                ));
                return Ok(WrapperState::Idle);
            }
            None => {
                return Err(ParamError::config(format!(
                    "No parameter named {}",
                    self.name
                )))
            }
        };
        check_good_name(value.name())?;

        let dir = paths::workspace_temp(workspace)
            .join(format!("{}-{}", value.name(), Uuid::new_v4().simple()));
        fs::create_dir_all(&dir)
            .map_err(|e| ParamError::io(format!("creating {}", dir.display()), e))?;

        let path = match value
            .create_temp_file(build, &dir, ctx.env_vars_mut(), exec)
            .and_then(absolute)
        {
            Ok(path) => path,
            Err(e) => {
                let owner = || format!("{} parameter {}", build.key(), value.name());
                if let Some(warning) = remove_tree(&dir, owner) {
                    warning.report(exec.listener);
                }
                return Err(e);
            }
        };

        ctx.env(value.name(), path.to_string_lossy());
        ctx.set_disposer(Delete::new(dir.to_string_lossy()));
        info!(build = %build.key(), parameter = %value.name(), path = %path.display(), "file parameter bound");
        Ok(WrapperState::Materialized)
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf, ParamError> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().map_err(|e| ParamError::io("resolving current directory", e))?;
    Ok(cwd.join(path))
}

/// Where a bound parameter ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedFile {
    pub path: PathBuf,
    pub temp_dir: PathBuf,
}

#[derive(Debug)]
pub struct StepOutcome<T> {
    /// What the step body returned.
    pub result: Result<T, ParamError>,
    /// Environment the body ran with.
    pub env: EnvVars,
    pub materialized: Option<MaterializedFile>,
    pub cleanup_warning: Option<CleanupWarning>,
    pub state: WrapperState,
}

/// Runs the disposer exactly once: explicitly, or on drop while unwinding.
struct TeardownGuard<'a> {
    disposer: Option<Delete>,
    build: BuildKey,
    listener: &'a dyn TaskListener,
}

impl TeardownGuard<'_> {
    fn finish(&mut self) -> Option<CleanupWarning> {
        self.disposer
            .take()
            .and_then(|d| d.tear_down(&self.build, self.listener))
    }
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        if self.disposer.is_some() {
            debug!(build = %self.build, "tearing down after unwind");
            let _ = self.finish();
        }
    }
}

/// Run `body` inside the wrapper's scope.
///
/// Setup errors are returned before `body` runs. Afterwards the outcome of
/// `body` is reported as-is in [`StepOutcome::result`]; a failed teardown
/// only adds a warning.
pub fn run_step<T, F>(
    wrapper: &FileParameterWrapper,
    build: &Build,
    workspace: &Path,
    initial_env: &EnvVars,
    exec: &ExecContext<'_>,
    body: F,
) -> Result<StepOutcome<T>, ParamError>
where
    F: FnOnce(&EnvVars) -> Result<T, ParamError>,
{
    let mut ctx = StepContext::new(initial_env.clone());
    debug!(build = %build.key(), parameter = %wrapper.name, state = ?WrapperState::Resolving, "binding file parameter");
    let mut state = wrapper.set_up(&mut ctx, build, workspace, exec)?;

    let materialized = match (ctx.env_vars().get(&wrapper.name), ctx.disposer()) {
        (Some(path), Some(disposer)) if state == WrapperState::Materialized => Some(MaterializedFile {
            path: PathBuf::from(path),
            temp_dir: disposer.dir().to_path_buf(),
        }),
        _ => None,
    };

    let mut guard = TeardownGuard {
        disposer: ctx.take_disposer(),
        build: build.key(),
        listener: exec.listener,
    };
    let result = body(ctx.env_vars());
    let had_disposer = guard.disposer.is_some();
    let cleanup_warning = guard.finish();
    if had_disposer {
        state = WrapperState::TornDown;
    }

    Ok(StepOutcome {
        result,
        env: ctx.env,
        materialized,
        cleanup_warning,
        state,
    })
}
