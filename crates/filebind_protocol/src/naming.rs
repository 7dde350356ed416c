//! The "good name" predicate.
//!
//! Parameter names end up as path components (stash bundles, temp files), so
//! the same rule that guards job names guards them too.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Characters that may never appear in a job-scoped identifier.
pub const UNSAFE_CHARS: &str = "?*/\\%!@#$^&|<>[]:;";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("No name is specified")]
    Empty,
    #[error("'{0}' is not an allowed name")]
    NotAllowed(String),
    #[error("'{ch}' is an unsafe character in '{name}'")]
    UnsafeChar { name: String, ch: char },
    #[error("Control characters are not allowed in '{0}'")]
    ControlChar(String),
    #[error("'{0}' must not start or end with '.' or whitespace")]
    BadEdge(String),
}

/// Check that `name` is usable as a job-scoped identifier.
pub fn check_good_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(NameError::Empty);
    }
    if trimmed == "." || trimmed == ".." {
        return Err(NameError::NotAllowed(trimmed.to_string()));
    }
    for ch in name.chars() {
        if ch.is_control() {
            return Err(NameError::ControlChar(printable(name)));
        }
        if UNSAFE_CHARS.contains(ch) {
            return Err(NameError::UnsafeChar {
                name: name.to_string(),
                ch,
            });
        }
    }
    if trimmed != name || name.starts_with('.') || name.ends_with('.') {
        return Err(NameError::BadEdge(name.to_string()));
    }
    Ok(())
}

pub fn is_good_name(name: &str) -> bool {
    check_good_name(name).is_ok()
}

/// A string that passed [`check_good_name`].
///
/// Deserialization re-runs the check, so hand-edited persisted state cannot
/// smuggle a bad name back in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GoodName(String);

impl GoodName {
    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        check_good_name(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GoodName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GoodName> for String {
    fn from(name: GoodName) -> String {
        name.0
    }
}

impl AsRef<str> for GoodName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for GoodName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GoodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn printable(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_control() { '?' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        for name in ["FILE", "F", "my-file.txt", "release notes", "a.b"] {
            assert!(is_good_name(name), "{name} should be accepted");
        }
    }

    #[test]
    fn rejects_traversal() {
        let err = check_good_name("../../etc/x").unwrap_err();
        assert!(matches!(err, NameError::UnsafeChar { ch: '/', .. }));
        assert_eq!(check_good_name(".."), Err(NameError::NotAllowed("..".into())));
        assert_eq!(check_good_name("."), Err(NameError::NotAllowed(".".into())));
    }

    #[test]
    fn rejects_windows_separator_and_drive() {
        assert!(!is_good_name("..\\x"));
        assert!(!is_good_name("C:x"));
    }

    #[test]
    fn rejects_empty_and_blank() {
        assert_eq!(check_good_name(""), Err(NameError::Empty));
        assert_eq!(check_good_name("   "), Err(NameError::Empty));
    }

    #[test]
    fn rejects_edges() {
        assert!(matches!(check_good_name(".hidden"), Err(NameError::BadEdge(_))));
        assert!(matches!(check_good_name("name."), Err(NameError::BadEdge(_))));
        assert!(matches!(check_good_name(" FILE"), Err(NameError::BadEdge(_))));
    }

    #[test]
    fn rejects_control_characters() {
        let err = check_good_name("a\nb").unwrap_err();
        assert_eq!(err, NameError::ControlChar("a?b".into()));
    }

    #[test]
    fn good_name_revalidates_on_deserialize() {
        let ok: GoodName = serde_json::from_str("\"FILE\"").unwrap();
        assert_eq!(ok.as_str(), "FILE");
        let err = serde_json::from_str::<GoodName>("\"../../etc/x\"").unwrap_err();
        assert!(err.to_string().contains("unsafe character"));
    }

    #[test]
    fn message_names_the_character() {
        let err = check_good_name("a/b").unwrap_err();
        assert_eq!(err.to_string(), "'/' is an unsafe character in 'a/b'");
    }
}
