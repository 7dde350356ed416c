//! Canonical default values shared by the parameter core and the CLI.

/// Suffix of the environment variable carrying the original upload filename.
pub const FILENAME_ENV_SUFFIX: &str = "_FILENAME";
/// Suffix appended to a workspace path to get its private temp area.
pub const WORKSPACE_TEMP_SUFFIX: &str = "@tmp";
/// Minimum prefix length for generated temp file names.
pub const TEMP_FILE_PREFIX_LEN: usize = 3;
/// Pad character for short temp file prefixes.
pub const TEMP_FILE_PREFIX_PAD: char = 'x';
/// Suffix for generated temp file names.
pub const TEMP_FILE_SUFFIX: &str = ".tmp";
/// Buffer size used when copying parameter content between streams.
pub const COPY_CHUNK_SIZE: usize = 64 * 1024;
/// Name of the node used when none is requested.
pub const DEFAULT_NODE_NAME: &str = "built-in";
pub const NO_BUILD_CONTEXT_MESSAGE: &str = "Cannot operate outside of a build context";
