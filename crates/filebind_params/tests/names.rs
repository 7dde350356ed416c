//! Parameter names end up in paths and must never escape their directory.

mod common;

use common::*;
use filebind_params::definition::check_name;
use filebind_params::{
    Base64FileParameterValue, Build, FileParameterDefinition, FileParameterWrapper,
    FormValidation, JobDefinition, StashedFileParameterValue, EnvVars, run_step,
};

const MALICIOUS: &[&str] = &["../../tmp/x", "../../etc/x", "a/b", "..", "x\\y", " FILE"];

#[test]
fn test_definitions_reject_malicious_names() {
    for name in MALICIOUS {
        assert!(FileParameterDefinition::base64(name).unwrap_err().is_configuration(), "{name}");
        assert!(FileParameterDefinition::stashed(name).unwrap_err().is_configuration(), "{name}");
        assert!(matches!(check_name(name), FormValidation::Error(_)), "{name}");
    }
}

/// A stashed value with a bad name is refused before anything is written.
#[test]
fn test_values_reject_malicious_names_without_touching_disk() {
    let h = Harness::new();
    let upload_root = h.upload_root();
    for name in MALICIOUS {
        let err = StashedFileParameterValue::from_reader(name, &mut CONTENT.as_bytes(), &upload_root)
            .unwrap_err();
        assert!(err.is_configuration(), "{name}");
        let err = Base64FileParameterValue::from_reader(name, &mut CONTENT.as_bytes()).unwrap_err();
        assert!(err.is_configuration(), "{name}");
    }
    assert!(entries(&upload_root).is_empty());
    assert!(!h.home.path().join("x").exists());
    assert!(!h.home.path().parent().unwrap().join("x").exists());
}

#[test]
fn test_persisted_records_reject_malicious_names() {
    let h = Harness::new();
    let build = h.start_build("myjob", None);
    let mut json: serde_json::Value = serde_json::from_str(&build.snapshot().unwrap()).unwrap();
    json["parameters"] = serde_json::json!([
        {"kind": "stashedFile", "name": "../../tmp/x"}
    ]);
    assert!(Build::restore(&json.to_string()).unwrap_err().is_configuration());

    let job = "name = \"myjob\"\n[[parameters]]\ntype = \"stashedFile\"\nname = \"../../tmp/x\"\n";
    assert!(JobDefinition::from_toml_str(job).unwrap_err().is_configuration());
}

/// A wrapper bound to a bad name finds nothing and creates nothing.
#[test]
fn test_wrapper_with_malicious_name_creates_nothing() {
    let h = Harness::new();
    let value = Base64FileParameterValue::from_reader("FILE", &mut CONTENT.as_bytes()).unwrap();
    let build = h.start_build("myjob", Some(vec![file_param(value)]));
    let ws = h.workspace("built-in", "myjob");

    let err = run_step(
        &FileParameterWrapper::new("../../tmp/x"),
        &build,
        &ws,
        &EnvVars::new(),
        &h.exec(),
        |_| Ok(()),
    )
    .unwrap_err();
    assert!(err.is_configuration());
    assert!(entries(&ws.with_file_name("myjob@tmp")).is_empty());
}
