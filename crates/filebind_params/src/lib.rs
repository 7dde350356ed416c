//! File parameters for filebind builds.
//!
//! An uploaded file becomes a [`FileParameterValue`] attached to one build.
//! Steps reach its content through [`wrapper::run_step`], which materializes
//! the file into a per-step temp directory on the node and removes it when
//! the step scope ends. Relocatable values hand their content to a
//! [`StashManager`] when the build environment is prepared; a queued task
//! cancelled before that point is cleaned up by the [`StashedFileReaper`].

pub mod build;
pub mod cancel;
pub mod definition;
pub mod env;
pub mod error;
pub mod listener;
pub mod node;
pub mod queue;
pub mod reaper;
pub mod stash;
pub mod upload;
pub mod value;
pub mod wrapper;

pub use build::{
    discard_uploads, Build, BuildKey, BuildResult, BuildStore, ExecContext, ParameterValue,
    StringParameterValue,
};
pub use cancel::CancellationToken;
pub use definition::{
    FileKind, FileParameterDefinition, FormValidation, JobDefinition, ParameterDefinition,
    StepDefinition, StringParameterDefinition,
};
pub use env::EnvVars;
pub use error::{CleanupWarning, ParamError};
pub use listener::{CapturingListener, NullListener, StderrListener, TaskListener};
pub use node::{Launcher, LocalLauncher, Node};
pub use queue::{
    install_default_listeners, queue_listeners, LeftItem, Queue, QueueItem, QueueListener,
    QueueListeners,
};
pub use reaper::StashedFileReaper;
pub use stash::{DirectoryStash, StashManager, StashSelection};
pub use upload::{FileItem, MultipartForm, UploadError, UploadRequest};
pub use value::{
    Base64FileParameterValue, FileContent, FileParameterValue, StashedFileParameterValue,
};
pub use wrapper::{
    run_step, Delete, FileParameterWrapper, MaterializedFile, StepContext, StepOutcome,
    WrapperState,
};
