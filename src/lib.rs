//! backend-dev library
//!
//! Entry resolution, bundler configuration and development process
//! supervision for backend packages.

pub mod bundler;
pub mod cli;
pub mod config;
pub mod paths;
pub mod plugins;
pub mod resolver;
pub mod supervisor;
pub mod utils;

pub use bundler::{build_config, BuildConfiguration, BuildOptions, BuildTarget};
pub use cli::Cli;
pub use config::Settings;
pub use resolver::{EntryMode, EntryResolver};
pub use supervisor::{start_backend, start_backend_plugin, supervisor_for, DevProcessSupervisor};
