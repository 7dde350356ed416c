//! Wire types shared across crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Parameter types a job can declare.
/// This is the CANONICAL definition, also used as the serde tag of
/// persisted definitions and values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterKind {
    /// Content embedded as base64 text in the persisted value
    Base64File,
    /// Content handed to the stash service
    StashedFile,
    /// Plain string parameter
    String,
}

impl ParameterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterKind::Base64File => "base64File",
            ParameterKind::StashedFile => "stashedFile",
            ParameterKind::String => "string",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ParameterKind::Base64File => "Base64 File Parameter",
            ParameterKind::StashedFile => "Stashed File Parameter",
            ParameterKind::String => "String Parameter",
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, ParameterKind::Base64File | ParameterKind::StashedFile)
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParameterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base64File" => Ok(ParameterKind::Base64File),
            "stashedFile" => Ok(ParameterKind::StashedFile),
            "string" => Ok(ParameterKind::String),
            _ => Err(format!(
                "Invalid parameter kind: '{}'. Expected: base64File, stashedFile, or string",
                s
            )),
        }
    }
}

/// Lifecycle of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueItemStatus {
    /// Waiting for a node
    #[default]
    Queued,
    /// Left the queue to become a build
    Started,
    /// Left the queue without ever starting
    Cancelled,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Queued => "QUEUED",
            QueueItemStatus::Started => "STARTED",
            QueueItemStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueueItemStatus::Queued)
    }
}

impl fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
