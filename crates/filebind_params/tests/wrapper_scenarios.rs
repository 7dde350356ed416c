//! End-to-end behaviour of the file parameter wrapper: binding, skipping,
//! failing fast and cleaning up on every exit path.

mod common;

use common::*;
use filebind_params::{
    run_step, Base64FileParameterValue, CancellationToken, Delete, FileItem,
    FileParameterDefinition, FileParameterWrapper, MultipartForm, ParamError,
    StringParameterValue, WrapperState, EnvVars,
};
use std::cell::RefCell;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

/// Inline upload of `FILE` shows up as its base64 text.
#[test]
fn test_inline_value_exposes_base64_env() {
    let h = Harness::new();
    let def = FileParameterDefinition::base64("FILE").unwrap();
    let value = def
        .create_value_from_cli("", &mut CONTENT.as_bytes(), &h.upload_root())
        .unwrap();
    let mut build = h.start_build("myjob", Some(vec![file_param(value)]));

    let mut env = EnvVars::new();
    build.prepare_environment(&mut env, &h.exec()).unwrap();
    assert_eq!(env.get("FILE"), Some(CONTENT_BASE64));
}

/// Stashed upload bound through the wrapper is a readable absolute path for
/// the step and gone afterwards.
#[test]
fn test_stashed_value_bound_through_wrapper() {
    let h = Harness::new();
    let def = FileParameterDefinition::stashed("FILE").unwrap();
    let mut form = MultipartForm::new()
        .with_item(FileItem::in_memory("FILE", CONTENT).with_file_name("input.txt"));
    let value = def
        .create_value_from_form(&mut form, &h.upload_root())
        .unwrap()
        .unwrap();
    let mut build = h.start_build("myjob", Some(vec![file_param(value)]));

    let mut env = EnvVars::new();
    build.prepare_environment(&mut env, &h.exec()).unwrap();
    assert_eq!(env.get("FILE_FILENAME"), Some("input.txt"));
    // The upload spool is released once the stash has the content.
    assert!(entries(&h.upload_root()).is_empty());

    let ws = h.workspace("built-in", "myjob");
    let wrapper = FileParameterWrapper::new("FILE");
    let outcome = run_step(&wrapper, &build, &ws, &env, &h.exec(), |env| {
        let path = PathBuf::from(env.get("FILE").unwrap());
        assert!(path.is_absolute());
        Ok(fs::read_to_string(&path).unwrap())
    })
    .unwrap();

    assert_eq!(outcome.result.unwrap(), CONTENT);
    assert_eq!(outcome.state, WrapperState::TornDown);
    assert_eq!(outcome.env.get("FILE_FILENAME"), Some("input.txt"));
    let materialized = outcome.materialized.unwrap();
    assert!(materialized.temp_dir.starts_with(ws.with_file_name("myjob@tmp")));
    assert!(!materialized.path.exists());
    assert!(!materialized.temp_dir.exists());
    assert!(outcome.cleanup_warning.is_none());
}

/// Missing parameter with `allow_no_file` runs the body and logs a notice.
#[test]
fn test_allow_no_file_skips_missing_parameter() {
    let h = Harness::new();
    let other = StringParameterValue::new("OTHER", "x").unwrap();
    let build = h.start_build("myjob", Some(vec![other.into()]));
    let ws = h.workspace("built-in", "myjob");

    let wrapper = FileParameterWrapper::new("FILE").allow_no_file(true);
    let outcome = run_step(&wrapper, &build, &ws, &EnvVars::new(), &h.exec(), |env| {
        Ok(env.contains_key("FILE"))
    })
    .unwrap();

    assert!(!outcome.result.unwrap());
    assert_eq!(outcome.state, WrapperState::Idle);
    assert!(outcome.materialized.is_none());
    assert!(h
        .listener
        .contains("Skip file parameter as there is no parameter with name: 'FILE'"));
}

/// An undefined parameter fails before the body runs, naming the parameter.
#[test]
fn test_undefined_parameter_fails_before_body() {
    let h = Harness::new();
    let value = Base64FileParameterValue::from_reader("FILE", &mut CONTENT.as_bytes()).unwrap();
    let build = h.start_build("myjob", Some(vec![file_param(value)]));
    let ws = h.workspace("built-in", "myjob");

    let ran = RefCell::new(false);
    let err = run_step(
        &FileParameterWrapper::new("MISSING"),
        &build,
        &ws,
        &EnvVars::new(),
        &h.exec(),
        |_| {
            *ran.borrow_mut() = true;
            Ok(())
        },
    )
    .unwrap_err();

    assert!(err.is_configuration());
    assert_eq!(err.to_string(), "No parameter named MISSING");
    assert!(!*ran.borrow());
}

#[test]
fn test_build_without_parameters_fails() {
    let h = Harness::new();
    let build = h.start_build("myjob", None);
    let ws = h.workspace("built-in", "myjob");
    let wrapper = FileParameterWrapper::new("FILE").allow_no_file(true);
    let err = run_step(&wrapper, &build, &ws, &EnvVars::new(), &h.exec(), |_| Ok(())).unwrap_err();
    assert_eq!(err.to_string(), "No parameters");
}

#[test]
fn test_non_file_parameter_is_rejected_even_when_missing_is_allowed() {
    let h = Harness::new();
    let text = StringParameterValue::new("FILE", "not a file").unwrap();
    let build = h.start_build("myjob", Some(vec![text.into()]));
    let ws = h.workspace("built-in", "myjob");
    let wrapper = FileParameterWrapper::new("FILE").allow_no_file(true);
    let err = run_step(&wrapper, &build, &ws, &EnvVars::new(), &h.exec(), |_| Ok(())).unwrap_err();
    assert_eq!(err.to_string(), "Unsupported parameter type for FILE");
}

/// Calling the disposer twice removes the directory once and never fails.
#[test]
fn test_teardown_is_idempotent() {
    let h = Harness::new();
    let dir = h.home.path().join("FILE-1");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("FILExxx.tmp"), "x").unwrap();
    let build = h.start_build("myjob", None);

    let delete = Delete::new(dir.to_string_lossy());
    assert!(delete.tear_down(&build.key(), &h.listener).is_none());
    assert!(!dir.exists());
    assert!(delete.tear_down(&build.key(), &h.listener).is_none());
}

fn inline_build(h: &Harness) -> filebind_params::Build {
    let value = Base64FileParameterValue::from_reader("FILE", &mut CONTENT.as_bytes()).unwrap();
    h.start_build("myjob", Some(vec![file_param(value)]))
}

/// The step temp directory is removed when the body fails.
#[test]
fn test_cleanup_after_step_error() {
    let h = Harness::new();
    let build = inline_build(&h);
    let ws = h.workspace("built-in", "myjob");

    let outcome = run_step(
        &FileParameterWrapper::new("FILE"),
        &build,
        &ws,
        &EnvVars::new(),
        &h.exec(),
        |_| -> Result<(), ParamError> { Err(ParamError::config("step failed")) },
    )
    .unwrap();

    assert_eq!(outcome.result.unwrap_err().to_string(), "step failed");
    assert_eq!(outcome.state, WrapperState::TornDown);
    assert!(!outcome.materialized.unwrap().temp_dir.exists());
}

/// The step temp directory is removed when the step is cancelled while its
/// command runs.
#[cfg(unix)]
#[test]
fn test_cleanup_after_step_cancellation() {
    let h = Harness::new();
    let build = inline_build(&h);
    let ws = h.workspace("built-in", "myjob");
    let cancel = CancellationToken::new();
    let exec = h.exec_with(cancel.clone());

    let outcome = run_step(
        &FileParameterWrapper::new("FILE"),
        &build,
        &ws,
        &EnvVars::new(),
        &exec,
        |env| {
            let canceller = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(100));
                canceller.cancel();
            });
            exec.launcher
                .launch("sleep 5", &ws, env, exec.listener, &exec.cancel)
        },
    )
    .unwrap();

    assert!(outcome.result.unwrap_err().is_interrupted());
    assert!(!outcome.materialized.unwrap().temp_dir.exists());
}

/// Cancellation before materialization aborts setup and leaves nothing.
#[test]
fn test_cancelled_setup_leaves_no_directory() {
    let h = Harness::new();
    let build = inline_build(&h);
    let ws = h.workspace("built-in", "myjob");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = run_step(
        &FileParameterWrapper::new("FILE"),
        &build,
        &ws,
        &EnvVars::new(),
        &h.exec_with(cancel),
        |_| Ok(()),
    )
    .unwrap_err();

    assert!(err.is_interrupted());
    assert!(entries(&ws.with_file_name("myjob@tmp")).is_empty());
}

/// A panicking body still gets its temp directory removed.
#[test]
fn test_cleanup_after_step_panic() {
    let h = Harness::new();
    let build = inline_build(&h);
    let ws = h.workspace("built-in", "myjob");
    let seen = RefCell::new(None::<PathBuf>);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        run_step(
            &FileParameterWrapper::new("FILE"),
            &build,
            &ws,
            &EnvVars::new(),
            &h.exec(),
            |env| -> Result<(), ParamError> {
                *seen.borrow_mut() = env.get("FILE").map(PathBuf::from);
                panic!("step blew up");
            },
        )
    }));

    assert!(result.is_err());
    let path = seen.into_inner().unwrap();
    assert!(!path.exists());
    assert!(!path.parent().unwrap().exists());
}

/// One-character names still produce a valid temp file (prefix padding).
#[test]
fn test_short_parameter_name() {
    let h = Harness::new();
    let value = Base64FileParameterValue::from_reader("F", &mut CONTENT.as_bytes()).unwrap();
    let build = h.start_build("myjob", Some(vec![file_param(value)]));
    let ws = h.workspace("built-in", "myjob");

    let outcome = run_step(&FileParameterWrapper::new("F"), &build, &ws, &EnvVars::new(), &h.exec(), |env| {
        let path = PathBuf::from(env.get("F").unwrap());
        let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
        Ok((file_name, fs::read_to_string(&path).unwrap()))
    })
    .unwrap();

    let (file_name, content) = outcome.result.unwrap();
    assert!(file_name.starts_with("Fxx"), "{file_name}");
    assert!(file_name.ends_with(".tmp"), "{file_name}");
    assert_eq!(content, CONTENT);
}
