//! Parameter definitions: what a job accepts, and how raw uploads become
//! parameter values.

use ::base64::engine::general_purpose::STANDARD;
use ::base64::Engine as _;
use filebind_protocol::{check_good_name, GoodName, ParameterKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use crate::build::{ParameterValue, StringParameterValue};
use crate::error::ParamError;
use crate::upload::{FileItem, UploadError, UploadRequest};
use crate::value::{Base64FileParameterValue, FileParameterValue, StashedFileParameterValue};

/// Storage strategy of a file parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Base64,
    Stashed,
}

impl FileKind {
    pub fn parameter_kind(&self) -> ParameterKind {
        match self {
            FileKind::Base64 => ParameterKind::Base64File,
            FileKind::Stashed => ParameterKind::StashedFile,
        }
    }
}

/// Result of validating a configuration form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValidation {
    Ok,
    Error(String),
}

impl FormValidation {
    pub fn is_ok(&self) -> bool {
        matches!(self, FormValidation::Ok)
    }
}

/// Validator behind the parameter name field of a job configuration form.
pub fn check_name(name: &str) -> FormValidation {
    match check_good_name(name) {
        Ok(()) => FormValidation::Ok,
        Err(e) => FormValidation::Error(e.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileParameterDefinition {
    kind: FileKind,
    name: GoodName,
    description: Option<String>,
}

impl FileParameterDefinition {
    pub fn new(kind: FileKind, name: &str) -> Result<Self, ParamError> {
        Ok(Self {
            kind,
            name: GoodName::new(name)?,
            description: None,
        })
    }

    pub fn base64(name: &str) -> Result<Self, ParamError> {
        Self::new(FileKind::Base64, name)
    }

    pub fn stashed(name: &str) -> Result<Self, ParamError> {
        Self::new(FileKind::Stashed, name)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn value_from_reader(
        &self,
        name: &str,
        src: &mut dyn Read,
        upload_root: &Path,
    ) -> Result<FileParameterValue, ParamError> {
        Ok(match self.kind {
            FileKind::Base64 => Base64FileParameterValue::from_reader(name, src)?.into(),
            FileKind::Stashed => StashedFileParameterValue::from_reader(name, src, upload_root)?.into(),
        })
    }

    fn value_from_item(
        &self,
        name: &str,
        item: FileItem,
        upload_root: &Path,
    ) -> Result<FileParameterValue, ParamError> {
        Ok(match self.kind {
            FileKind::Base64 => {
                let mut value = Base64FileParameterValue::new(name)?;
                value.set_file(item)?;
                value.into()
            }
            FileKind::Stashed => StashedFileParameterValue::from_item(name, item, upload_root)?.into(),
        })
    }

    /// Value from the file field named after this parameter. `None` when the
    /// field was not sent or the request is not multipart; an empty file
    /// still yields a value.
    pub fn create_value_from_form(
        &self,
        request: &mut dyn UploadRequest,
        upload_root: &Path,
    ) -> Result<Option<FileParameterValue>, ParamError> {
        let item = match request.file_item(self.name()) {
            Ok(Some(item)) => item,
            Ok(None) | Err(UploadError::InvalidContentType) => return Ok(None),
            Err(e) => return Err(ParamError::Transport(e.to_string())),
        };
        let mut value = self.value_from_item(self.name(), item, upload_root)?;
        value.set_description(self.description.clone());
        debug!(parameter = %self.name, kind = %self.kind.parameter_kind(), "value created from form");
        Ok(Some(value))
    }

    /// Value from a structured submission: `{"name": .., "base64": ..}` or
    /// `{"name": .., "file": "<form field>"}`.
    pub fn create_value_from_json(
        &self,
        json: &Value,
        request: &mut dyn UploadRequest,
        upload_root: &Path,
    ) -> Result<FileParameterValue, ParamError> {
        let object = json.as_object().ok_or_else(|| {
            ParamError::config(format!("Expected a JSON object for parameter {}", self.name))
        })?;
        let name = match object.get("name") {
            None => self.name(),
            Some(Value::String(name)) => name.as_str(),
            Some(_) => return Err(ParamError::config("Parameter name must be a string")),
        };
        check_good_name(name)?;

        let mut value = if let Some(field) = object.get("file") {
            let field = field.as_str().ok_or_else(|| {
                ParamError::config(format!("File field of {} must be a string", name))
            })?;
            let item = match request.file_item(field) {
                Ok(Some(item)) => item,
                Ok(None) | Err(UploadError::InvalidContentType) => {
                    return Err(ParamError::config(format!(
                        "No file uploaded in field {} for {}",
                        field, name
                    )))
                }
                Err(e) => return Err(ParamError::Transport(e.to_string())),
            };
            self.value_from_item(name, item, upload_root)?
        } else if let Some(text) = object.get("base64") {
            let text = text.as_str().ok_or_else(|| {
                ParamError::config(format!("base64 content of {} must be a string", name))
            })?;
            let bytes = decode(name, text)?;
            match self.kind {
                FileKind::Base64 => {
                    let mut value = Base64FileParameterValue::new(name)?;
                    value.set_base64(text.trim());
                    value.into()
                }
                FileKind::Stashed => self.value_from_reader(name, &mut bytes.as_slice(), upload_root)?,
            }
        } else {
            return Err(ParamError::config(format!("No content for file parameter {}", name)));
        };
        if let Some(Value::String(filename)) = object.get("filename") {
            value.set_filename(Some(filename.as_str()));
        }
        value.set_description(self.description.clone());
        Ok(value)
    }

    /// Value from a command-line argument. An empty argument means the
    /// content comes from `stdin`; anything else is inline base64.
    pub fn create_value_from_cli(
        &self,
        value: &str,
        stdin: &mut dyn Read,
        upload_root: &Path,
    ) -> Result<FileParameterValue, ParamError> {
        let mut created = if value.is_empty() {
            self.value_from_reader(self.name(), stdin, upload_root)?
        } else {
            let bytes = decode(self.name(), value)?;
            self.value_from_reader(self.name(), &mut bytes.as_slice(), upload_root)?
        };
        created.set_description(self.description.clone());
        Ok(created)
    }
}

fn decode(name: &str, text: &str) -> Result<Vec<u8>, ParamError> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| ParamError::config(format!("Invalid base64 value for {}: {}", name, e)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringParameterDefinition {
    name: GoodName,
    default_value: String,
    description: Option<String>,
}

impl StringParameterDefinition {
    pub fn new(name: &str, default_value: impl Into<String>) -> Result<Self, ParamError> {
        Ok(Self {
            name: GoodName::new(name)?,
            default_value: default_value.into(),
            description: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_value(&self) -> &str {
        &self.default_value
    }

    pub fn create_value(&self, value: Option<&str>) -> Result<StringParameterValue, ParamError> {
        let mut created =
            StringParameterValue::new(self.name(), value.unwrap_or(&self.default_value))?;
        created.set_description(self.description.clone());
        Ok(created)
    }
}

/// A parameter a job accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DefinitionRecord", into = "DefinitionRecord")]
pub enum ParameterDefinition {
    File(FileParameterDefinition),
    String(StringParameterDefinition),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum DefinitionRecord {
    Base64File {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    StashedFile {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    String {
        name: String,
        #[serde(default)]
        default_value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl TryFrom<DefinitionRecord> for ParameterDefinition {
    type Error = ParamError;

    fn try_from(record: DefinitionRecord) -> Result<Self, Self::Error> {
        Ok(match record {
            DefinitionRecord::Base64File { name, description } => ParameterDefinition::File(
                FileParameterDefinition {
                    description,
                    ..FileParameterDefinition::base64(&name)?
                },
            ),
            DefinitionRecord::StashedFile { name, description } => ParameterDefinition::File(
                FileParameterDefinition {
                    description,
                    ..FileParameterDefinition::stashed(&name)?
                },
            ),
            DefinitionRecord::String {
                name,
                default_value,
                description,
            } => ParameterDefinition::String(StringParameterDefinition {
                description,
                ..StringParameterDefinition::new(&name, default_value)?
            }),
        })
    }
}

impl From<ParameterDefinition> for DefinitionRecord {
    fn from(definition: ParameterDefinition) -> Self {
        match definition {
            ParameterDefinition::File(d) => {
                let name = String::from(d.name);
                match d.kind {
                    FileKind::Base64 => DefinitionRecord::Base64File {
                        name,
                        description: d.description,
                    },
                    FileKind::Stashed => DefinitionRecord::StashedFile {
                        name,
                        description: d.description,
                    },
                }
            }
            ParameterDefinition::String(d) => DefinitionRecord::String {
                name: d.name.into(),
                default_value: d.default_value,
                description: d.description,
            },
        }
    }
}

impl ParameterDefinition {
    pub fn name(&self) -> &str {
        match self {
            ParameterDefinition::File(d) => d.name(),
            ParameterDefinition::String(d) => d.name(),
        }
    }

    pub fn kind(&self) -> ParameterKind {
        match self {
            ParameterDefinition::File(d) => d.kind().parameter_kind(),
            ParameterDefinition::String(_) => ParameterKind::String,
        }
    }

    pub fn as_file(&self) -> Option<&FileParameterDefinition> {
        match self {
            ParameterDefinition::File(d) => Some(d),
            ParameterDefinition::String(_) => None,
        }
    }

    /// Value from a `NAME=VALUE` command-line assignment.
    pub fn create_value_from_cli(
        &self,
        value: &str,
        stdin: &mut dyn Read,
        upload_root: &Path,
    ) -> Result<ParameterValue, ParamError> {
        Ok(match self {
            ParameterDefinition::File(d) => d.create_value_from_cli(value, stdin, upload_root)?.into(),
            ParameterDefinition::String(d) => d.create_value(Some(value))?.into(),
        })
    }

    /// Value used when the submission leaves this parameter out. File
    /// parameters have none.
    pub fn default_value(&self) -> Result<Option<ParameterValue>, ParamError> {
        match self {
            ParameterDefinition::File(_) => Ok(None),
            ParameterDefinition::String(d) => Ok(Some(d.create_value(None)?.into())),
        }
    }
}

/// One build step of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Shell command run in the job workspace.
    pub command: String,
    /// Node to run on; the default node when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Bind this file parameter to a materialized path for the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_file_parameter: Option<String>,
    #[serde(default)]
    pub allow_no_file: bool,
}

/// A job configuration, read from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDefinition {
    pub name: GoodName,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepDefinition>,
}

impl JobDefinition {
    pub fn from_toml_str(text: &str) -> Result<Self, ParamError> {
        let job: JobDefinition = toml::from_str(text)
            .map_err(|e| ParamError::config(format!("Invalid job definition: {}", e)))?;
        job.validate()?;
        Ok(job)
    }

    pub fn load(path: &Path) -> Result<Self, ParamError> {
        let text = fs::read_to_string(path)
            .map_err(|e| ParamError::io(format!("reading {}", path.display()), e))?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ParamError> {
        let mut seen = HashSet::new();
        for parameter in &self.parameters {
            if !seen.insert(parameter.name()) {
                return Err(ParamError::config(format!(
                    "Duplicate parameter {} in job {}",
                    parameter.name(),
                    self.name
                )));
            }
        }
        for step in &self.steps {
            if let Some(node) = &step.node {
                check_good_name(node)?;
            }
        }
        Ok(())
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDefinition> {
        self.parameters.iter().find(|p| p.name() == name)
    }
}
