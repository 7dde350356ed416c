//! `filebind build`: set parameters and run a job.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use filebind_params::{
    discard_uploads, run_step, Build, BuildResult, CancellationToken, CapturingListener, EnvVars,
    ExecContext, FileParameterWrapper, JobDefinition, Launcher, LocalLauncher, ParamError,
    ParameterValue, Queue, StderrListener, StepDefinition, TaskListener,
};
use filebind_protocol::defaults::DEFAULT_NODE_NAME;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::context::CliContext;
use super::error::HelpfulError;

#[derive(Debug, Clone)]
pub struct BuildArgs {
    pub job_file: PathBuf,
    /// Raw `NAME=VALUE` assignments.
    pub params: Vec<String>,
    pub node: Option<String>,
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct ParameterSummary {
    pub name: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StepSummary {
    pub command: String,
    pub node: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BuildSummary {
    pub build_id: String,
    pub job: String,
    pub number: u64,
    pub result: BuildResult,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub parameters: Vec<ParameterSummary>,
    pub steps: Vec<StepSummary>,
    /// Build log lines (JSON mode only; otherwise they go to stderr).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<String>,
}

/// Split `NAME=VALUE`. The value may be empty.
fn parse_assignment(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name, value)),
        _ => Err(HelpfulError::bad_assignment(raw).into()),
    }
}

/// Turn the assignments into a parameter set, filling in defaults.
///
/// Uploads spooled for earlier assignments are deleted again when a later
/// one fails; those values never reach the queue.
fn create_parameters(
    ctx: &CliContext,
    job: &JobDefinition,
    assignments: &[String],
    stdin: &mut dyn Read,
) -> Result<Option<Vec<ParameterValue>>> {
    if job.parameters.is_empty() && assignments.is_empty() {
        return Ok(None);
    }
    let mut values: Vec<ParameterValue> = Vec::new();
    match collect_parameters(ctx, job, assignments, stdin, &mut values) {
        Ok(()) => Ok(Some(values)),
        Err(e) => {
            let owner = format!("job {}", job.name);
            let (removed, warnings) = discard_uploads(&mut values, &owner);
            for warning in &warnings {
                warning.log();
            }
            debug!(job = %job.name, removed, "discarded uploads of rejected parameters");
            Err(e)
        }
    }
}

fn collect_parameters(
    ctx: &CliContext,
    job: &JobDefinition,
    assignments: &[String],
    stdin: &mut dyn Read,
    values: &mut Vec<ParameterValue>,
) -> Result<()> {
    let mut stdin_used = false;
    for raw in assignments {
        let (name, value) = parse_assignment(raw)?;
        let definition = job.parameter(name).ok_or_else(|| {
            let known: Vec<&str> = job.parameters.iter().map(|p| p.name()).collect();
            HelpfulError::unknown_parameter(name, &job.name, &known)
        })?;
        if values.iter().any(|v| v.name() == name) {
            bail!("Parameter {} given more than once", name);
        }
        if value.is_empty() && definition.as_file().is_some() {
            if stdin_used {
                bail!("Only one file parameter can be read from stdin");
            }
            stdin_used = true;
        }
        let created = definition
            .create_value_from_cli(value, stdin, &ctx.config.upload_temp_root)
            .with_context(|| format!("Failed to set parameter {}", name))?;
        values.push(created);
    }
    for definition in &job.parameters {
        if values.iter().any(|v| v.name() == definition.name()) {
            continue;
        }
        if let Some(default) = definition.default_value()? {
            values.push(default);
        }
    }
    Ok(())
}

fn summarize_parameters(build: &Build) -> Vec<ParameterSummary> {
    build
        .parameters
        .iter()
        .flatten()
        .map(|p| ParameterSummary {
            name: p.name().to_string(),
            kind: p.kind().to_string(),
            filename: p.as_file().and_then(|f| f.filename()).map(str::to_string),
        })
        .collect()
}

/// Outcome of one step, and whether the build should go on.
fn step_result(result: Result<i32, ParamError>, summary: &mut StepSummary) -> Option<BuildResult> {
    match result {
        Ok(0) => {
            summary.exit_code = Some(0);
            None
        }
        Ok(code) => {
            summary.exit_code = Some(code);
            Some(BuildResult::Failure)
        }
        Err(e) if e.is_interrupted() => {
            summary.error = Some(e.to_string());
            Some(BuildResult::Aborted)
        }
        Err(e) => {
            summary.error = Some(e.to_string());
            Some(BuildResult::Failure)
        }
    }
}

fn run_steps(
    ctx: &CliContext,
    build: &Build,
    steps: &[StepDefinition],
    default_node: &str,
    env: &EnvVars,
    exec: &ExecContext<'_>,
) -> (BuildResult, Vec<StepSummary>) {
    let mut summaries = Vec::new();
    for step in steps {
        let node_name = step.node.as_deref().unwrap_or(default_node);
        let mut summary = StepSummary {
            command: step.command.clone(),
            node: node_name.to_string(),
            exit_code: None,
            error: None,
        };
        let result = run_one_step(ctx, build, step, node_name, env, exec);
        let verdict = step_result(result, &mut summary);
        if let Some(error) = &summary.error {
            exec.listener.line(&format!("ERROR: {}", error));
        }
        summaries.push(summary);
        if let Some(verdict) = verdict {
            return (verdict, summaries);
        }
    }
    (BuildResult::Success, summaries)
}

fn run_one_step(
    ctx: &CliContext,
    build: &Build,
    step: &StepDefinition,
    node_name: &str,
    env: &EnvVars,
    exec: &ExecContext<'_>,
) -> Result<i32, ParamError> {
    let node = ctx.node(node_name)?;
    let workspace = node.prepare_workspace(&build.job)?;
    exec.listener.line(&format!("+ {}", step.command));
    let body = |env: &EnvVars| launch(exec.launcher, &step.command, &workspace, env, exec);
    match &step.with_file_parameter {
        None => body(env),
        Some(name) => {
            let wrapper = FileParameterWrapper::new(name.clone()).allow_no_file(step.allow_no_file);
            let outcome = run_step(&wrapper, build, &workspace, env, exec, body)?;
            if let Some(warning) = &outcome.cleanup_warning {
                warn!(build = %build.key(), "{}", warning);
            }
            outcome.result
        }
    }
}

fn launch(
    launcher: &dyn Launcher,
    command: &str,
    workspace: &Path,
    env: &EnvVars,
    exec: &ExecContext<'_>,
) -> Result<i32, ParamError> {
    launcher.launch(command, workspace, env, exec.listener, &exec.cancel)
}

/// Schedule, start and run the job described by `args.job_file`.
pub fn run(
    ctx: &CliContext,
    args: &BuildArgs,
    stdin: &mut dyn Read,
    cancel: CancellationToken,
) -> Result<BuildSummary> {
    let job = JobDefinition::load(&args.job_file)
        .with_context(|| format!("Failed to load job {}", args.job_file.display()))?;
    let default_node = args.node.as_deref().unwrap_or(DEFAULT_NODE_NAME);
    let parameters = create_parameters(ctx, &job, &args.params, stdin)?;

    let mut queue = Queue::new();
    let item = queue.schedule(&job.name, parameters)?;
    if cancel.is_cancelled() {
        queue.cancel(&item);
        bail!("Interrupted before build {} started", job.name);
    }
    let mut build = queue
        .start_next()
        .context("Scheduled build disappeared from the queue")?;

    let capturing = CapturingListener::new();
    let listener: &dyn TaskListener = if args.json { &capturing } else { &StderrListener };
    let stash = ctx.stash();
    let exec = ExecContext::new(&LocalLauncher, listener, &stash, cancel);

    let mut env = EnvVars::from_process();
    env.put("JOB_NAME", build.job.clone());
    env.put("BUILD_NUMBER", build.number.to_string());
    env.put("BUILD_ID", build.id.to_string());

    let (result, steps) = match build.prepare_environment(&mut env, &exec) {
        Ok(()) => run_steps(ctx, &build, &job.steps, default_node, &env, &exec),
        Err(e) => {
            listener.line(&format!("ERROR: {}", e));
            let result = if e.is_interrupted() {
                BuildResult::Aborted
            } else {
                BuildResult::Failure
            };
            (result, Vec::new())
        }
    };
    build.result = Some(result);
    listener.line(&format!("Finished: {}", result));

    ctx.store()
        .save(&build)
        .with_context(|| format!("Failed to save build {}", build.id))?;
    info!(build = %build.key(), result = %result, "build finished");

    Ok(BuildSummary {
        build_id: build.id.to_string(),
        job: build.job.clone(),
        number: build.number,
        result,
        started_at: build.started_at,
        duration_ms: (Utc::now() - build.started_at).num_milliseconds(),
        parameters: summarize_parameters(&build),
        steps,
        log: capturing.lines(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use filebind_protocol::SystemConfig;

    const TWO_FILES: &str = r#"
name = "myjob"

[[parameters]]
type = "stashedFile"
name = "FILE"

[[parameters]]
type = "stashedFile"
name = "OTHER"
"#;

    #[test]
    fn test_rejected_assignments_leave_no_uploads() {
        let home = tempfile::tempdir().unwrap();
        let ctx = CliContext::new(SystemConfig::with_home(home.path()));
        let job = JobDefinition::from_toml_str(TWO_FILES).unwrap();
        let spool = ctx.config.upload_temp_root.clone();
        let rejected: [&[&str]; 4] = [
            &["FILE=", "BOGUS=x"],
            &["FILE=", "OTHER="],
            &["FILE=YWJj", "FILE=YWJj"],
            &["FILE=YWJj", "OTHER=not base64!"],
        ];
        for assignments in rejected {
            let assignments: Vec<String> = assignments.iter().map(|a| a.to_string()).collect();
            let result = create_parameters(&ctx, &job, &assignments, &mut "hello".as_bytes());
            assert!(result.is_err(), "{:?}", assignments);
            let left = std::fs::read_dir(&spool).map(|rd| rd.count()).unwrap_or(0);
            assert_eq!(left, 0, "{:?}", assignments);
        }

        let ok = create_parameters(&ctx, &job, &["FILE=YWJj".to_string()], &mut "".as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(ok.len(), 1);
        assert_eq!(std::fs::read_dir(&spool).unwrap().count(), 1);
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("FILE=").unwrap(), ("FILE", ""));
        assert_eq!(parse_assignment("FILE=YWJj").unwrap(), ("FILE", "YWJj"));
        assert_eq!(parse_assignment("FILE=a=b").unwrap(), ("FILE", "a=b"));
        assert!(parse_assignment("FILE").is_err());
        assert!(parse_assignment("=x").is_err());
    }

    #[test]
    fn test_step_result_verdicts() {
        let mut summary = StepSummary {
            command: "true".into(),
            node: "built-in".into(),
            exit_code: None,
            error: None,
        };
        assert_eq!(step_result(Ok(0), &mut summary), None);
        assert_eq!(step_result(Ok(2), &mut summary), Some(BuildResult::Failure));
        assert_eq!(
            step_result(Err(ParamError::Interrupted("x".into())), &mut summary),
            Some(BuildResult::Aborted)
        );
        assert_eq!(
            step_result(Err(ParamError::config("No parameter named FILE")), &mut summary),
            Some(BuildResult::Failure)
        );
        assert_eq!(summary.error.as_deref(), Some("No parameter named FILE"));
    }
}
