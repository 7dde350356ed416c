use anyhow::{Context, Result};
use filebind_ids::BuildId;
use filebind_params::{Build, BuildStore, DirectoryStash, Node, ParamError};
use filebind_protocol::SystemConfig;
use std::io;

use super::error::HelpfulError;

/// Everything a command needs to find builds, stashes and nodes.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub config: SystemConfig,
}

impl CliContext {
    pub fn new(config: SystemConfig) -> Self {
        Self { config }
    }

    pub fn stash(&self) -> DirectoryStash {
        DirectoryStash::new(&self.config.stash_root)
    }

    pub fn store(&self) -> BuildStore {
        BuildStore::new(&self.config.builds_dir)
    }

    pub fn node(&self, name: &str) -> Result<Node, ParamError> {
        Node::new(name, self.config.node_root(name))
    }

    /// Load a saved build by its id as printed by `filebind build`.
    pub fn load_build(&self, id: &str) -> Result<Build> {
        let build_id = BuildId::parse(id).with_context(|| format!("Invalid build id '{}'", id))?;
        match self.store().load(&build_id) {
            Ok(build) => Ok(build),
            Err(ParamError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Err(HelpfulError::build_not_found(id).into())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to load build {}", id)),
        }
    }
}
