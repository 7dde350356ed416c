//! Persisted file parameter values.
//!
//! Two strategies share one contract. [`Base64FileParameterValue`] keeps the
//! content inline; [`StashedFileParameterValue`] hands it to the stash and
//! keeps only a transient upload file until then. Each variant implements one
//! of the [`FileContent`] hooks; [`FileParameterValue`] derives the other.

mod inline;
mod stashed;

pub use inline::Base64FileParameterValue;
pub use stashed::StashedFileParameterValue;

use filebind_protocol::defaults::{
    COPY_CHUNK_SIZE, FILENAME_ENV_SUFFIX, NO_BUILD_CONTEXT_MESSAGE, TEMP_FILE_PREFIX_LEN,
    TEMP_FILE_PREFIX_PAD, TEMP_FILE_SUFFIX,
};
use filebind_protocol::{is_good_name, GoodName, ParameterKind};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

use crate::build::{Build, BuildKey, ExecContext};
use crate::cancel::CancellationToken;
use crate::env::EnvVars;
use crate::error::ParamError;

/// Fields every file parameter value carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    name: GoodName,
    #[serde(
        default,
        deserialize_with = "good_filename",
        skip_serializing_if = "Option::is_none"
    )]
    filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

fn good_filename<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|name| is_good_name(name)))
}

impl FileMeta {
    pub fn new(name: &str) -> Result<Self, ParamError> {
        Ok(Self {
            name: GoodName::new(name)?,
            filename: None,
            description: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Record the client's file name if it is a good name; otherwise leave
    /// it unset. Browsers may send a full path here.
    pub fn set_filename(&mut self, filename: Option<&str>) {
        match filename {
            Some(f) if is_good_name(f) => self.filename = Some(f.to_string()),
            Some(f) => debug!(parameter = %self.name, filename = f, "ignoring unusable filename"),
            None => {}
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.description = description;
    }
}

/// Capability hooks. A variant implements at least one; the other is derived
/// by [`FileParameterValue`].
pub trait FileContent {
    fn meta(&self) -> &FileMeta;

    /// Stream the content.
    fn open(&self, _build: Option<&Build>) -> Result<Box<dyn Read + Send>, ParamError> {
        Err(ParamError::Unsupported("open"))
    }

    /// Materialize the content as a new file inside `dest_dir`.
    fn create_temp_file(
        &self,
        _build: &Build,
        _dest_dir: &Path,
        _env: &EnvVars,
        _exec: &ExecContext<'_>,
    ) -> Result<PathBuf, ParamError> {
        Err(ParamError::Unsupported("create_temp_file"))
    }
}

/// One uploaded file attached to one build.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FileParameterValue {
    #[serde(rename = "base64File")]
    Base64(Base64FileParameterValue),
    #[serde(rename = "stashedFile")]
    Stashed(StashedFileParameterValue),
}

impl From<Base64FileParameterValue> for FileParameterValue {
    fn from(value: Base64FileParameterValue) -> Self {
        FileParameterValue::Base64(value)
    }
}

impl From<StashedFileParameterValue> for FileParameterValue {
    fn from(value: StashedFileParameterValue) -> Self {
        FileParameterValue::Stashed(value)
    }
}

/// Reader over a file in a throwaway directory; the directory goes away
/// with the reader.
struct TempDirReader {
    file: File,
    _dir: TempDir,
}

impl Read for TempDirReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl FileParameterValue {
    fn content(&self) -> &dyn FileContent {
        match self {
            FileParameterValue::Base64(v) => v as &dyn FileContent,
            FileParameterValue::Stashed(v) => v as &dyn FileContent,
        }
    }

    fn meta_mut(&mut self) -> &mut FileMeta {
        match self {
            FileParameterValue::Base64(v) => v.meta_mut(),
            FileParameterValue::Stashed(v) => v.meta_mut(),
        }
    }

    pub fn name(&self) -> &str {
        self.content().meta().name()
    }

    pub fn filename(&self) -> Option<&str> {
        self.content().meta().filename()
    }

    pub fn set_filename(&mut self, filename: Option<&str>) {
        self.meta_mut().set_filename(filename);
    }

    pub fn description(&self) -> Option<&str> {
        self.content().meta().description()
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.meta_mut().set_description(description);
    }

    pub fn kind(&self) -> ParameterKind {
        match self {
            FileParameterValue::Base64(_) => ParameterKind::Base64File,
            FileParameterValue::Stashed(_) => ParameterKind::StashedFile,
        }
    }

    pub fn as_stashed_mut(&mut self) -> Option<&mut StashedFileParameterValue> {
        match self {
            FileParameterValue::Stashed(v) => Some(v),
            FileParameterValue::Base64(_) => None,
        }
    }

    fn filename_key(&self) -> String {
        format!("{}{}", self.name(), FILENAME_ENV_SUFFIX)
    }

    /// Stream the content, materializing it in a throwaway directory when the
    /// variant can only produce files.
    pub fn open(
        &self,
        build: Option<&Build>,
        exec: &ExecContext<'_>,
    ) -> Result<Box<dyn Read + Send>, ParamError> {
        match self.content().open(build) {
            Err(ParamError::Unsupported(_)) => {}
            other => return other,
        }
        let build = build.ok_or_else(|| {
            ParamError::io(
                format!("opening {}", self.name()),
                io::Error::new(io::ErrorKind::Other, NO_BUILD_CONTEXT_MESSAGE),
            )
        })?;
        let dir = tempfile::Builder::new()
            .prefix("filebind-open-")
            .tempdir()
            .map_err(|e| ParamError::io("creating temp directory", e))?;
        let env = EnvVars::from_process();
        let path = self
            .content()
            .create_temp_file(build, dir.path(), &env, exec)?;
        let file = File::open(&path)
            .map_err(|e| ParamError::io(format!("opening {}", path.display()), e))?;
        Ok(Box::new(TempDirReader { file, _dir: dir }))
    }

    /// Materialize the content as a new file in `dest_dir` and record
    /// `<NAME>_FILENAME` in `env` when the original name is known.
    pub fn create_temp_file(
        &self,
        build: &Build,
        dest_dir: &Path,
        env: &mut EnvVars,
        exec: &ExecContext<'_>,
    ) -> Result<PathBuf, ParamError> {
        let path = match self.content().create_temp_file(build, dest_dir, env, exec) {
            Err(ParamError::Unsupported(_)) => self.copy_to_temp_file(build, dest_dir, &exec.cancel)?,
            other => other?,
        };
        if let Some(filename) = self.filename() {
            env.put(self.filename_key(), filename);
        }
        debug!(parameter = %self.name(), path = %path.display(), "materialized");
        Ok(path)
    }

    fn copy_to_temp_file(
        &self,
        build: &Build,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ParamError> {
        let mut src = self.content().open(Some(build))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(&temp_prefix(self.name()))
            .suffix(TEMP_FILE_SUFFIX)
            .tempfile_in(dest_dir)
            .map_err(|e| ParamError::io(format!("creating temp file in {}", dest_dir.display()), e))?;
        // Dropping `tmp` on error removes the partial file.
        copy_interruptibly(&mut src, tmp.as_file_mut(), cancel, self.name())?;
        let (_, path) = tmp
            .keep()
            .map_err(|e| ParamError::io(format!("keeping temp file for {}", self.name()), e.error))?;
        Ok(path)
    }

    /// Stream the content into `out`; backs `filebind download`.
    pub fn download(
        &self,
        build: &Build,
        out: &mut dyn Write,
        exec: &ExecContext<'_>,
    ) -> Result<u64, ParamError> {
        let mut src = self.open(Some(build), exec)?;
        let copied = copy_interruptibly(&mut src, out, &exec.cancel, self.name())?;
        out.flush()
            .map_err(|e| ParamError::io(format!("writing {}", self.name()), e))?;
        Ok(copied)
    }

    /// Contribute this value's variables to the build environment. A stashed
    /// value hands its upload to the stash here, exactly once.
    pub fn build_environment(
        &mut self,
        build: &BuildKey,
        env: &mut EnvVars,
        exec: &ExecContext<'_>,
    ) -> Result<(), ParamError> {
        if let Some(filename) = self.filename() {
            env.put(self.filename_key(), filename);
        }
        match self {
            FileParameterValue::Base64(v) => {
                env.put(v.meta().name(), v.value());
                Ok(())
            }
            FileParameterValue::Stashed(v) => v.relocate(build, env, exec),
        }
    }
}

/// Temp file prefix: the parameter name right-padded to the minimum length.
fn temp_prefix(name: &str) -> String {
    let mut prefix = name.to_string();
    while prefix.chars().count() < TEMP_FILE_PREFIX_LEN {
        prefix.push(TEMP_FILE_PREFIX_PAD);
    }
    prefix
}

/// Chunked copy that stops with `Interrupted` as soon as `cancel` fires.
pub(crate) fn copy_interruptibly(
    src: &mut dyn Read,
    dst: &mut dyn Write,
    cancel: &CancellationToken,
    parameter: &str,
) -> Result<u64, ParamError> {
    let doing = format!("copying {}", parameter);
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        cancel.check(&doing)?;
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ParamError::io(doing, e)),
        };
        dst.write_all(&buf[..n])
            .map_err(|e| ParamError::io(doing.clone(), e))?;
        total += n as u64;
    }
    Ok(total)
}
