//! Upload transport seam.
//!
//! The HTTP/CLI layers turn a request into [`FileItem`]s; the parameter
//! definitions only ever see this interface. Client-supplied file names are
//! untrusted and never used to build paths.

use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    /// The request is not multipart; treated as "no file attached".
    #[error("request is not multipart/form-data")]
    InvalidContentType,
    #[error("malformed multipart body: {0}")]
    Malformed(String),
    #[error("upload stream failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug)]
enum Storage {
    Memory(Vec<u8>),
    /// Large uploads are spooled to disk by the transport.
    Spooled(PathBuf),
}

/// One uploaded file field.
#[derive(Debug)]
pub struct FileItem {
    pub field_name: String,
    /// Name as sent by the client. May be a full path (some browsers do that).
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    storage: Storage,
}

impl FileItem {
    pub fn in_memory(field_name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: None,
            content_type: None,
            storage: Storage::Memory(content.into()),
        }
    }

    pub fn spooled(field_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: None,
            content_type: None,
            storage: Storage::Spooled(path.into()),
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn reader(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        match &self.storage {
            Storage::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.as_slice()))),
            Storage::Spooled(path) => Ok(Box::new(File::open(path)?)),
        }
    }

    /// Release the item's backing storage.
    pub fn delete(self) -> io::Result<()> {
        match self.storage {
            Storage::Memory(_) => Ok(()),
            Storage::Spooled(path) => match fs::remove_file(&path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        }
    }
}

/// Access to the file fields of an incoming request.
pub trait UploadRequest {
    /// Remove and return the file item for `field`, `Ok(None)` when the field
    /// was not sent at all.
    fn file_item(&mut self, field: &str) -> Result<Option<FileItem>, UploadError>;
}

/// In-memory multipart request.
#[derive(Debug, Default)]
pub struct MultipartForm {
    multipart: bool,
    items: Vec<FileItem>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self {
            multipart: true,
            items: Vec::new(),
        }
    }

    /// A request whose body is not multipart (e.g. a plain form post).
    pub fn not_multipart() -> Self {
        Self {
            multipart: false,
            items: Vec::new(),
        }
    }

    pub fn with_item(mut self, item: FileItem) -> Self {
        self.items.push(item);
        self
    }
}

impl UploadRequest for MultipartForm {
    fn file_item(&mut self, field: &str) -> Result<Option<FileItem>, UploadError> {
        if !self.multipart {
            return Err(UploadError::InvalidContentType);
        }
        let index = self.items.iter().position(|item| item.field_name == field);
        Ok(index.map(|i| self.items.remove(i)))
    }
}
