use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use super::{copy_interruptibly, FileContent, FileMeta};
use crate::build::{Build, BuildKey, ExecContext};
use crate::cancel::CancellationToken;
use crate::env::EnvVars;
use crate::error::{remove_tree, CleanupWarning, ParamError};
use crate::stash::StashSelection;
use crate::upload::FileItem;

/// Content handed to the stash when the build environment is prepared.
///
/// Until then it sits in `<temp root>/<unique dir>/<name>`. That path is
/// never persisted: after a restart the value is reachable only through the
/// stash.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashedFileParameterValue {
    #[serde(flatten)]
    meta: FileMeta,
    #[serde(skip)]
    tmp: Option<PathBuf>,
}

impl StashedFileParameterValue {
    /// Copy `src` into a fresh directory under `temp_root`.
    pub fn from_reader(name: &str, src: &mut dyn Read, temp_root: &Path) -> Result<Self, ParamError> {
        let meta = FileMeta::new(name)?;
        let dir = temp_root.join(Uuid::new_v4().simple().to_string());
        fs::create_dir_all(&dir)
            .map_err(|e| ParamError::io(format!("creating {}", dir.display()), e))?;
        let tmp = dir.join(meta.name());
        if let Err(e) = spool(src, &tmp, meta.name()) {
            if let Some(warning) = remove_tree(&dir, || format!("upload of {}", name)) {
                warning.log();
            }
            return Err(e);
        }
        debug!(parameter = %meta.name(), tmp = %tmp.display(), "spooled upload");
        Ok(Self {
            meta,
            tmp: Some(tmp),
        })
    }

    /// Take an upload, record its client file name, then release it.
    pub fn from_item(name: &str, item: FileItem, temp_root: &Path) -> Result<Self, ParamError> {
        let mut value = {
            let mut reader = item
                .reader()
                .map_err(|e| ParamError::Transport(e.to_string()))?;
            Self::from_reader(name, &mut reader, temp_root)?
        };
        value.meta.set_filename(item.file_name.as_deref());
        item.delete()
            .map_err(|e| ParamError::io(format!("deleting upload of {}", name), e))?;
        Ok(value)
    }

    pub fn name(&self) -> &str {
        self.meta.name()
    }

    /// The upload file that has not been stashed yet.
    pub fn temp_file(&self) -> Option<&Path> {
        self.tmp.as_deref()
    }

    /// Claim the pending upload file, leaving the value without one.
    pub fn take_temp_file(&mut self) -> Option<PathBuf> {
        self.tmp.take()
    }

    /// Hand the pending upload to the stash and delete it locally.
    /// A no-op once done.
    pub fn relocate(
        &mut self,
        build: &BuildKey,
        env: &EnvVars,
        exec: &ExecContext<'_>,
    ) -> Result<(), ParamError> {
        let Some(tmp) = self.tmp.as_deref() else {
            return Ok(());
        };
        let (dir, file_name) = match (tmp.parent(), tmp.file_name()) {
            (Some(dir), Some(file_name)) => (dir.to_path_buf(), file_name.to_string_lossy().into_owned()),
            _ => {
                return Err(ParamError::config(format!(
                    "Bad upload location for {}: {}",
                    self.meta.name(),
                    tmp.display()
                )))
            }
        };
        exec.stash.stash(
            build,
            self.meta.name(),
            &dir,
            exec.launcher,
            env,
            exec.listener,
            &StashSelection::single(file_name),
        )?;
        info!(build = %build, parameter = %self.meta.name(), "upload stashed");

        // The content is durable now; a leftover directory is only a warning.
        if let Some(warning) =
            remove_tree(&dir, || format!("{} parameter {}", build, self.meta.name()))
        {
            warning.report(exec.listener);
        }
        self.tmp = None;
        Ok(())
    }

    /// Delete the pending upload and its directory without stashing it.
    /// Returns whether there was one. `owner` names the build or task in
    /// the warning when the directory cannot be removed.
    pub fn discard(&mut self, owner: &str) -> Result<bool, CleanupWarning> {
        let Some(tmp) = self.tmp.take() else {
            return Ok(false);
        };
        let dir = tmp.parent().map(Path::to_path_buf).unwrap_or(tmp);
        match remove_tree(&dir, || format!("{} parameter {}", owner, self.meta.name())) {
            None => {
                debug!(parameter = %self.meta.name(), dir = %dir.display(), "discarded upload");
                Ok(true)
            }
            Some(warning) => Err(warning),
        }
    }

    pub(crate) fn meta_mut(&mut self) -> &mut FileMeta {
        &mut self.meta
    }
}

fn spool(src: &mut dyn Read, dest: &Path, name: &str) -> Result<(), ParamError> {
    let mut file =
        File::create(dest).map_err(|e| ParamError::io(format!("creating {}", dest.display()), e))?;
    copy_interruptibly(src, &mut file, &CancellationToken::new(), name)?;
    Ok(())
}

impl FileContent for StashedFileParameterValue {
    fn meta(&self) -> &FileMeta {
        &self.meta
    }

    fn create_temp_file(
        &self,
        build: &Build,
        dest_dir: &Path,
        env: &EnvVars,
        exec: &ExecContext<'_>,
    ) -> Result<PathBuf, ParamError> {
        let name = self.meta.name();
        exec.cancel.check(&format!("unstashing {}", name))?;
        exec.stash
            .unstash(&build.key(), name, dest_dir, exec.launcher, env, exec.listener)?;
        let path = dest_dir.join(name);
        if !path.is_file() {
            return Err(ParamError::io(
                format!("unstashing {}", name),
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("stash did not produce {}", path.display()),
                ),
            ));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_lands_in_its_own_directory() {
        let root = tempfile::tempdir().unwrap();
        let a = StashedFileParameterValue::from_reader("FILE", &mut "a".as_bytes(), root.path()).unwrap();
        let b = StashedFileParameterValue::from_reader("FILE", &mut "b".as_bytes(), root.path()).unwrap();
        let (ta, tb) = (a.temp_file().unwrap(), b.temp_file().unwrap());
        assert_ne!(ta.parent(), tb.parent());
        assert_eq!(ta.file_name().unwrap(), "FILE");
        assert_eq!(fs::read_to_string(ta).unwrap(), "a");
    }

    #[test]
    fn temp_path_is_not_serialized() {
        let root = tempfile::tempdir().unwrap();
        let value = StashedFileParameterValue::from_reader("FILE", &mut "a".as_bytes(), root.path()).unwrap();
        let json = serde_json::to_string(&value).unwrap();
        assert!(!json.contains(root.path().to_str().unwrap()));
        let restored: StashedFileParameterValue = serde_json::from_str(&json).unwrap();
        assert!(restored.temp_file().is_none());
    }

    #[test]
    fn from_item_deletes_spooled_upload() {
        let root = tempfile::tempdir().unwrap();
        let spool = root.path().join("spool");
        fs::write(&spool, "data").unwrap();
        let item = FileItem::spooled("FILE", &spool).with_file_name("data.bin");
        let value = StashedFileParameterValue::from_item("FILE", item, &root.path().join("tmp")).unwrap();
        assert!(!spool.exists());
        assert_eq!(value.meta().filename(), Some("data.bin"));
    }

    #[test]
    fn discard_removes_pending_upload_once() {
        let root = tempfile::tempdir().unwrap();
        let mut value = StashedFileParameterValue::from_reader("FILE", &mut "a".as_bytes(), root.path()).unwrap();
        let dir = value.temp_file().unwrap().parent().unwrap().to_path_buf();
        assert!(value.discard("myjob").unwrap());
        assert!(!dir.exists());
        assert!(value.temp_file().is_none());
        assert!(!value.discard("myjob").unwrap());
    }

    #[test]
    fn take_temp_file_clears_it() {
        let root = tempfile::tempdir().unwrap();
        let mut value = StashedFileParameterValue::from_reader("FILE", &mut "a".as_bytes(), root.path()).unwrap();
        assert!(value.take_temp_file().is_some());
        assert!(value.take_temp_file().is_none());
    }
}
