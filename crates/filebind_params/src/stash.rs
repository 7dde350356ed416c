//! Durable, build-scoped file bundles.
//!
//! A stash is keyed by (build, name). Stashing copies a selection of files
//! out of a directory; unstashing reproduces them in any directory on any
//! node, as many times as needed.

use filebind_protocol::check_good_name;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::build::BuildKey;
use crate::env::EnvVars;
use crate::error::ParamError;
use crate::listener::TaskListener;
use crate::node::Launcher;

/// Patterns skipped when `use_default_excludes` is set.
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/*~",
    "**/#*#",
    "**/.#*",
    "**/%*%",
    "**/._*",
    "**/.git/**",
    "**/.hg/**",
    "**/.svn/**",
    "**/.DS_Store",
];

/// Which files of a directory go into a stash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashSelection {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub use_default_excludes: bool,
    pub allow_empty: bool,
}

impl StashSelection {
    /// Exactly one file, no default excludes, empty selection rejected.
    /// The name is matched literally, glob metacharacters included.
    pub fn single(file_name: impl AsRef<str>) -> Self {
        Self {
            includes: vec![globset::escape(file_name.as_ref())],
            excludes: Vec::new(),
            use_default_excludes: false,
            allow_empty: false,
        }
    }

    fn include_set(&self) -> Result<GlobSet, ParamError> {
        if self.includes.is_empty() {
            return glob_set(&["**"]);
        }
        glob_set(&self.includes)
    }

    fn exclude_set(&self) -> Result<GlobSet, ParamError> {
        let mut patterns: Vec<&str> = self.excludes.iter().map(String::as_str).collect();
        if self.use_default_excludes {
            patterns.extend_from_slice(DEFAULT_EXCLUDES);
        }
        glob_set(&patterns)
    }
}

fn glob_set<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet, ParamError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern.as_ref())
            .map_err(|e| ParamError::config(format!("Invalid stash pattern: {}", e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| ParamError::config(format!("Invalid stash pattern: {}", e)))
}

/// Stash service contract.
pub trait StashManager: Send + Sync {
    /// Save the selected files of `workspace` as bundle `name` of `build`.
    /// Replaces an existing bundle of the same name.
    #[allow(clippy::too_many_arguments)]
    fn stash(
        &self,
        build: &BuildKey,
        name: &str,
        workspace: &Path,
        launcher: &dyn Launcher,
        env: &EnvVars,
        listener: &dyn TaskListener,
        selection: &StashSelection,
    ) -> Result<(), ParamError>;

    /// Restore bundle `name` of `build` into `dest`, overwriting files.
    fn unstash(
        &self,
        build: &BuildKey,
        name: &str,
        dest: &Path,
        launcher: &dyn Launcher,
        env: &EnvVars,
        listener: &dyn TaskListener,
    ) -> Result<(), ParamError>;
}

/// Stash backed by a directory tree: `<root>/<build id>/<name>/`.
///
/// Any node that can see `root` can unstash, which is all the cross-node
/// retrieval the CLI needs.
#[derive(Debug, Clone)]
pub struct DirectoryStash {
    root: PathBuf,
}

impl DirectoryStash {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bundle_dir(&self, build: &BuildKey, name: &str) -> Result<PathBuf, ParamError> {
        check_good_name(name)?;
        Ok(self.root.join(build.id.to_string()).join(name))
    }

    /// Whether bundle `name` exists for `build`.
    pub fn contains(&self, build: &BuildKey, name: &str) -> bool {
        self.bundle_dir(build, name)
            .map(|dir| dir.is_dir())
            .unwrap_or(false)
    }

    /// Drop every bundle of a build. Missing bundles are fine.
    pub fn clear(&self, build: &BuildKey) -> Result<(), ParamError> {
        let dir = self.root.join(build.id.to_string());
        match fs::remove_dir_all(&dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(ParamError::io(
                format!("clearing stashes of {}", build),
                e,
            )),
            _ => Ok(()),
        }
    }
}

fn selected_files(source: &Path, selection: &StashSelection) -> Result<Vec<PathBuf>, ParamError> {
    let includes = selection.include_set()?;
    let excludes = selection.exclude_set()?;
    let mut files = Vec::new();
    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let context = format!("scanning {}", source.display());
            ParamError::io(context, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = match entry.path().strip_prefix(source) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        if includes.is_match(&rel) && !excludes.is_match(&rel) {
            files.push(rel);
        }
    }
    Ok(files)
}

fn copy_tree(source: &Path, files: &[PathBuf], dest: &Path) -> Result<(), ParamError> {
    for rel in files {
        let target = dest.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ParamError::io(format!("creating {}", parent.display()), e))?;
        }
        fs::copy(source.join(rel), &target)
            .map_err(|e| ParamError::io(format!("copying {}", rel.display()), e))?;
    }
    Ok(())
}

impl StashManager for DirectoryStash {
    fn stash(
        &self,
        build: &BuildKey,
        name: &str,
        workspace: &Path,
        _launcher: &dyn Launcher,
        _env: &EnvVars,
        listener: &dyn TaskListener,
        selection: &StashSelection,
    ) -> Result<(), ParamError> {
        let bundle = self.bundle_dir(build, name)?;
        let files = selected_files(workspace, selection)?;
        if files.is_empty() && !selection.allow_empty {
            return Err(ParamError::io(
                format!("stashing {} of {}", name, build),
                io::Error::new(io::ErrorKind::NotFound, "No files included in stash"),
            ));
        }

        let parent = bundle
            .parent()
            .ok_or_else(|| ParamError::config(format!("Bad stash location for {}", name)))?;
        fs::create_dir_all(parent)
            .map_err(|e| ParamError::io(format!("creating {}", parent.display()), e))?;

        // Stage next to the bundle so the final rename never crosses devices.
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(parent)
            .map_err(|e| ParamError::io("creating stash staging directory", e))?;
        copy_tree(workspace, &files, staging.path())?;

        match fs::remove_dir_all(&bundle) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                return Err(ParamError::io(format!("replacing stash {}", name), e));
            }
            _ => {}
        }
        fs::rename(staging.path(), &bundle)
            .map_err(|e| ParamError::io(format!("saving stash {}", name), e))?;

        info!(build = %build, stash = name, files = files.len(), "stashed");
        listener.line(&format!("Stashed {} file(s)", files.len()));
        Ok(())
    }

    fn unstash(
        &self,
        build: &BuildKey,
        name: &str,
        dest: &Path,
        _launcher: &dyn Launcher,
        _env: &EnvVars,
        _listener: &dyn TaskListener,
    ) -> Result<(), ParamError> {
        let bundle = self.bundle_dir(build, name)?;
        if !bundle.is_dir() {
            return Err(ParamError::io(
                format!("unstashing {} of {}", name, build),
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("No such saved stash '{}'", name),
                ),
            ));
        }
        let all = StashSelection {
            includes: Vec::new(),
            excludes: Vec::new(),
            use_default_excludes: false,
            allow_empty: true,
        };
        let files = selected_files(&bundle, &all)?;
        copy_tree(&bundle, &files, dest)?;
        debug!(build = %build, stash = name, dest = %dest.display(), "unstashed");
        Ok(())
    }
}
