use ::base64::engine::general_purpose::STANDARD;
use ::base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};

use super::{FileContent, FileMeta};
use crate::build::Build;
use crate::error::ParamError;
use crate::upload::FileItem;

/// Content kept inline as standard padded base64.
///
/// Exposed as `<NAME>` in the build environment. Suited to small files only,
/// since the whole content lives in the persisted build record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Base64FileParameterValue {
    #[serde(flatten)]
    meta: FileMeta,
    #[serde(default)]
    base64: String,
}

impl Base64FileParameterValue {
    /// An empty value; content comes from [`set_file`](Self::set_file) or
    /// [`set_base64`](Self::set_base64).
    pub fn new(name: &str) -> Result<Self, ParamError> {
        Ok(Self {
            meta: FileMeta::new(name)?,
            base64: String::new(),
        })
    }

    pub fn from_reader(name: &str, src: &mut dyn Read) -> Result<Self, ParamError> {
        let mut value = Self::new(name)?;
        value.base64 = encode_all(name, src)?;
        Ok(value)
    }

    /// Take the content and client file name of an upload, then release it.
    pub fn set_file(&mut self, item: FileItem) -> Result<(), ParamError> {
        {
            let mut reader = item
                .reader()
                .map_err(|e| ParamError::Transport(e.to_string()))?;
            self.base64 = encode_all(self.meta.name(), &mut reader)?;
        }
        self.meta.set_filename(item.file_name.as_deref());
        item.delete()
            .map_err(|e| ParamError::io(format!("deleting upload of {}", self.meta.name()), e))
    }

    pub fn set_base64(&mut self, base64: impl Into<String>) {
        self.base64 = base64.into();
    }

    pub fn name(&self) -> &str {
        self.meta.name()
    }

    /// The encoded text.
    pub fn value(&self) -> &str {
        &self.base64
    }

    pub(crate) fn meta_mut(&mut self) -> &mut FileMeta {
        &mut self.meta
    }
}

fn encode_all(name: &str, src: &mut dyn Read) -> Result<String, ParamError> {
    let mut bytes = Vec::new();
    src.read_to_end(&mut bytes)
        .map_err(|e| ParamError::Transport(format!("reading upload of {}: {}", name, e)))?;
    Ok(STANDARD.encode(bytes))
}

impl FileContent for Base64FileParameterValue {
    fn meta(&self) -> &FileMeta {
        &self.meta
    }

    fn open(&self, _build: Option<&Build>) -> Result<Box<dyn Read + Send>, ParamError> {
        let bytes = STANDARD.decode(self.base64.as_bytes()).map_err(|e| {
            ParamError::config(format!("Invalid base64 content for {}: {}", self.meta.name(), e))
        })?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}
