use std::path::{Path, PathBuf};

/// Resolve the filebind home directory.
///
/// Priority:
/// 1) FILEBIND_HOME
/// 2) HOME/USERPROFILE
/// 3) ./.filebind
pub fn filebind_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("FILEBIND_HOME") {
        return PathBuf::from(override_path);
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        return PathBuf::from(home).join(".filebind");
    }
    PathBuf::from(".").join(".filebind")
}

/// Durable stash storage: <home>/stash
pub fn default_stash_root(home: &Path) -> PathBuf {
    home.join("stash")
}

/// Execution node roots: <home>/nodes/<node>
pub fn default_nodes_root(home: &Path) -> PathBuf {
    home.join("nodes")
}

/// Persisted build records: <home>/builds
pub fn default_builds_dir(home: &Path) -> PathBuf {
    home.join("builds")
}

/// Upload spool for relocatable values: <home>/tmp
pub fn default_upload_temp_root(home: &Path) -> PathBuf {
    home.join("tmp")
}

/// Log files: <home>/logs
pub fn default_logs_dir(home: &Path) -> PathBuf {
    home.join("logs")
}

/// The private temp area that sits next to a workspace (`<ws>@tmp`).
pub fn workspace_temp(workspace: &Path) -> PathBuf {
    let mut name = workspace
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(crate::defaults::WORKSPACE_TEMP_SUFFIX);
    workspace.with_file_name(name)
}
