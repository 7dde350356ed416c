//! Shared plain data for filebind crates.
//!
//! Nothing in here touches a build or a node. The parameter core and the CLI
//! both depend on these definitions so that naming rules, environment
//! variable conventions and on-disk locations agree everywhere.

pub mod config;
pub mod defaults;
pub mod naming;
pub mod paths;
pub mod types;

pub use config::{ConfigError, SystemConfig};
pub use naming::{check_good_name, is_good_name, GoodName, NameError};
pub use types::{ParameterKind, QueueItemStatus};
