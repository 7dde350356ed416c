//! Builds, their parameter sets, and on-disk build records.

use chrono::{DateTime, Utc};
use filebind_ids::BuildId;
use filebind_protocol::{GoodName, ParameterKind};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::env::EnvVars;
use crate::error::{CleanupWarning, ParamError};
use crate::listener::TaskListener;
use crate::node::Launcher;
use crate::stash::StashManager;
use crate::value::{Base64FileParameterValue, FileParameterValue, StashedFileParameterValue};

/// What stash and unstash are keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildKey {
    pub job: String,
    pub id: BuildId,
}

impl BuildKey {
    pub fn new(job: impl Into<String>, id: BuildId) -> Self {
        Self {
            job: job.into(),
            id,
        }
    }
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.job, self.id.short())
    }
}

/// Services available while a build runs on a node.
#[derive(Clone)]
pub struct ExecContext<'a> {
    pub launcher: &'a dyn Launcher,
    pub listener: &'a dyn TaskListener,
    pub stash: &'a dyn StashManager,
    pub cancel: CancellationToken,
}

impl<'a> ExecContext<'a> {
    pub fn new(
        launcher: &'a dyn Launcher,
        listener: &'a dyn TaskListener,
        stash: &'a dyn StashManager,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            launcher,
            listener,
            stash,
            cancel,
        }
    }

    /// Same services, different build log.
    pub fn with_listener(&self, listener: &'a dyn TaskListener) -> Self {
        Self {
            listener,
            ..self.clone()
        }
    }
}

/// A plain text parameter. Exposed verbatim as `<NAME>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringParameterValue {
    name: GoodName,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl StringParameterValue {
    pub fn new(name: &str, value: impl Into<String>) -> Result<Self, ParamError> {
        Ok(Self {
            name: GoodName::new(name)?,
            value: value.into(),
            description: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.description = description;
    }
}

/// Any parameter value a build can carry.
#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(from = "ParameterRecord")]
pub enum ParameterValue {
    String(StringParameterValue),
    File(FileParameterValue),
}

/// Flat, kind-tagged persisted form.
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum ParameterRecord {
    Base64File(Base64FileParameterValue),
    StashedFile(StashedFileParameterValue),
    String(StringParameterValue),
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum ParameterRecordRef<'a> {
    Base64File(&'a Base64FileParameterValue),
    StashedFile(&'a StashedFileParameterValue),
    String(&'a StringParameterValue),
}

impl From<ParameterRecord> for ParameterValue {
    fn from(record: ParameterRecord) -> Self {
        match record {
            ParameterRecord::Base64File(v) => ParameterValue::File(FileParameterValue::Base64(v)),
            ParameterRecord::StashedFile(v) => ParameterValue::File(FileParameterValue::Stashed(v)),
            ParameterRecord::String(v) => ParameterValue::String(v),
        }
    }
}

impl Serialize for ParameterValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let record = match self {
            ParameterValue::File(FileParameterValue::Base64(v)) => ParameterRecordRef::Base64File(v),
            ParameterValue::File(FileParameterValue::Stashed(v)) => ParameterRecordRef::StashedFile(v),
            ParameterValue::String(v) => ParameterRecordRef::String(v),
        };
        record.serialize(serializer)
    }
}

impl From<FileParameterValue> for ParameterValue {
    fn from(value: FileParameterValue) -> Self {
        ParameterValue::File(value)
    }
}

impl From<StringParameterValue> for ParameterValue {
    fn from(value: StringParameterValue) -> Self {
        ParameterValue::String(value)
    }
}

impl ParameterValue {
    pub fn name(&self) -> &str {
        match self {
            ParameterValue::String(v) => v.name(),
            ParameterValue::File(v) => v.name(),
        }
    }

    pub fn kind(&self) -> ParameterKind {
        match self {
            ParameterValue::String(_) => ParameterKind::String,
            ParameterValue::File(v) => v.kind(),
        }
    }

    pub fn as_file(&self) -> Option<&FileParameterValue> {
        match self {
            ParameterValue::File(v) => Some(v),
            ParameterValue::String(_) => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut FileParameterValue> {
        match self {
            ParameterValue::File(v) => Some(v),
            ParameterValue::String(_) => None,
        }
    }
}

/// Delete every upload still pending in `parameters` without stashing it.
///
/// Returns how many upload directories were removed and the warnings for
/// those that could not be.
pub fn discard_uploads(
    parameters: &mut [ParameterValue],
    owner: &str,
) -> (usize, Vec<CleanupWarning>) {
    let mut removed = 0;
    let mut warnings = Vec::new();
    for value in parameters
        .iter_mut()
        .filter_map(|p| p.as_file_mut().and_then(|f| f.as_stashed_mut()))
    {
        match value.discard(owner) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(warning) => warnings.push(warning),
        }
    }
    (removed, warnings)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildResult {
    Success,
    Failure,
    Aborted,
}

impl BuildResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildResult::Success => "SUCCESS",
            BuildResult::Failure => "FAILURE",
            BuildResult::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of a job.
///
/// `parameters` is `None` for a build started without a parameter set, which
/// is different from an empty set.
#[derive(Debug, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub job: String,
    pub number: u64,
    pub parameters: Option<Vec<ParameterValue>>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BuildResult>,
}

impl Build {
    pub fn new(job: impl Into<String>, number: u64, parameters: Option<Vec<ParameterValue>>) -> Self {
        Self {
            id: BuildId::new(),
            job: job.into(),
            number,
            parameters,
            started_at: Utc::now(),
            result: None,
        }
    }

    pub fn key(&self) -> BuildKey {
        BuildKey::new(self.job.clone(), self.id.clone())
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterValue> {
        self.parameters
            .as_ref()?
            .iter()
            .find(|p| p.name() == name)
    }

    pub fn file_parameter(&self, name: &str) -> Option<&FileParameterValue> {
        self.parameter(name)?.as_file()
    }

    /// Compute the build environment from the parameter set. Stashed values
    /// hand their uploads over to the stash during this call.
    ///
    /// On failure the uploads not handed over yet are deleted, since a
    /// started build is never reaped and the record does not keep them.
    pub fn prepare_environment(
        &mut self,
        env: &mut EnvVars,
        exec: &ExecContext<'_>,
    ) -> Result<(), ParamError> {
        let key = self.key();
        let Some(parameters) = self.parameters.as_mut() else {
            return Ok(());
        };
        let mut outcome = Ok(());
        for parameter in parameters.iter_mut() {
            match parameter {
                ParameterValue::String(v) => env.put(v.name(), v.value()),
                ParameterValue::File(v) => {
                    if let Err(e) = v.build_environment(&key, env, exec) {
                        outcome = Err(e);
                        break;
                    }
                }
            }
        }
        if let Err(e) = outcome {
            let (removed, warnings) = discard_uploads(parameters, &key.to_string());
            for warning in &warnings {
                warning.report(exec.listener);
            }
            debug!(build = %key, removed, "uploads discarded after failed handoff");
            return Err(e);
        }
        debug!(build = %key, vars = env.len(), "build environment prepared");
        Ok(())
    }

    /// Persistable JSON form. Transient upload paths are left out.
    pub fn snapshot(&self) -> Result<String, ParamError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ParamError::config(format!("Cannot serialize build {}: {}", self.key(), e)))
    }

    pub fn restore(json: &str) -> Result<Self, ParamError> {
        serde_json::from_str(json)
            .map_err(|e| ParamError::config(format!("Corrupt build record: {}", e)))
    }
}

/// Build records on disk, one JSON file per build.
#[derive(Debug, Clone)]
pub struct BuildStore {
    dir: PathBuf,
}

impl BuildStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &BuildId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Write the record atomically.
    pub fn save(&self, build: &Build) -> Result<PathBuf, ParamError> {
        let json = build.snapshot()?;
        fs::create_dir_all(&self.dir)
            .map_err(|e| ParamError::io(format!("creating {}", self.dir.display()), e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| ParamError::io("creating build record", e))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| ParamError::io("writing build record", e))?;
        let path = self.path_for(&build.id);
        tmp.persist(&path)
            .map_err(|e| ParamError::io(format!("saving {}", path.display()), e.error))?;
        info!(build = %build.key(), path = %path.display(), "build record saved");
        Ok(path)
    }

    pub fn load(&self, id: &BuildId) -> Result<Build, ParamError> {
        let path = self.path_for(id);
        let json = fs::read_to_string(&path)
            .map_err(|e| ParamError::io(format!("reading build {}", id), e))?;
        Build::restore(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base64(name: &str, content: &str) -> ParameterValue {
        let value = Base64FileParameterValue::from_reader(name, &mut content.as_bytes()).unwrap();
        ParameterValue::File(value.into())
    }

    #[test]
    fn parameter_lookup_by_name() {
        let build = Build::new(
            "myjob",
            1,
            Some(vec![
                base64("FILE", "x"),
                StringParameterValue::new("GREETING", "hi").unwrap().into(),
            ]),
        );
        assert!(build.file_parameter("FILE").is_some());
        assert!(build.file_parameter("GREETING").is_none());
        assert_eq!(build.parameter("GREETING").unwrap().kind(), ParameterKind::String);
        assert!(build.parameter("OTHER").is_none());
    }

    #[test]
    fn records_are_kind_tagged() {
        let build = Build::new("myjob", 1, Some(vec![base64("FILE", "abc")]));
        let json: serde_json::Value = serde_json::from_str(&build.snapshot().unwrap()).unwrap();
        let param = &json["parameters"][0];
        assert_eq!(param["kind"], "base64File");
        assert_eq!(param["name"], "FILE");
        assert_eq!(param["base64"], "YWJj");
    }

    #[test]
    fn restore_rejects_bad_parameter_names() {
        let json = r#"{
            "id": "6f1c2b0e-8f51-4d5e-9c43-2d3c1f1f2a10",
            "job": "myjob",
            "number": 1,
            "parameters": [{"kind": "base64File", "name": "../../tmp/x", "base64": ""}],
            "started_at": "2024-01-01T00:00:00Z"
        }"#;
        assert!(Build::restore(json).unwrap_err().is_configuration());
    }

    #[test]
    fn store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BuildStore::new(tmp.path().join("builds"));
        let mut build = Build::new("myjob", 3, None);
        build.result = Some(BuildResult::Success);
        store.save(&build).unwrap();
        let loaded = store.load(&build.id).unwrap();
        assert_eq!(loaded.id, build.id);
        assert_eq!(loaded.number, 3);
        assert!(loaded.parameters.is_none());
        assert_eq!(loaded.result, Some(BuildResult::Success));
    }

    #[test]
    fn missing_record_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BuildStore::new(tmp.path());
        assert!(matches!(store.load(&BuildId::new()), Err(ParamError::Io { .. })));
    }
}
