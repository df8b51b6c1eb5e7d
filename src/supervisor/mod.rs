//! Development process supervision
//!
//! Starting a backend follows the same sequence in both modes:
//! resolve the entry, prepare the build, launch the process, then hand the
//! caller a [`WaitHandle`] that completes when the process is gone for good.
//! Restarts and in-place hot updates happen behind the handle.
//!
//! The two modes are separate [`DevProcessSupervisor`] implementations:
//! - [`LegacySupervisor`] compiles through the external bundler
//! - [`ExperimentalSupervisor`] runs sources directly and restarts on change

mod experimental;
mod legacy;
pub mod process;

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::bundler::{BuildConfigError, CompilerError, ExternalCompiler};
use crate::config::{ConfigError, ConfigPayload, ConfigReader, Settings};
use crate::paths::Paths;
use crate::resolver::{EntryMode, EntryResolver, MissingEntry, PackageRole, ResolvedEntry};

pub use experimental::ExperimentalSupervisor;
pub use legacy::LegacySupervisor;
use process::{InspectOptions, NodeLauncher};

/// Config key holding the port the backend listens on
const LISTEN_PORT_KEY: &str = "backend.listen.port";

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Invalid build configuration: {0}")]
    Configuration(#[from] BuildConfigError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to remove stale output {path}: {source}")]
    CleanOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Compiler(#[from] CompilerError),

    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Bundler exited before the backend was started")]
    BundlerExited,

    #[error("Failed waiting for the backend process: {0}")]
    Wait(#[source] io::Error),

    #[error("Supervisor task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Options shared by `backend` and `plugin` starts
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub checks_enabled: bool,
    pub inspect: InspectOptions,
    pub require: Option<String>,
    pub import: Option<String>,
}

/// Everything a supervisor needs to know about the target package
#[derive(Debug, Clone)]
pub struct SupervisorContext {
    pub paths: Paths,
    pub settings: Settings,
    pub app_configs: Vec<ConfigPayload>,
}

impl SupervisorContext {
    pub fn config_reader(&self) -> ConfigReader {
        ConfigReader::from_payloads(&self.app_configs)
    }

    fn launcher(&self) -> Result<NodeLauncher, ConfigError> {
        let port = self.config_reader().get_optional_u16(LISTEN_PORT_KEY)?;
        Ok(NodeLauncher::new(self.settings.node.binary.clone(), self.paths.target_dir.clone())
            .with_listening_port(port))
    }

    async fn warn_on_unsupported_flags(&self, options: &StartOptions) {
        if options.import.is_none() {
            return;
        }
        if let Some(version) = process::node_version(&self.settings.node.binary).await {
            if !process::supports_import_flag(&version) {
                warn!("--import requires node 18.18 or later, found {}", version);
            }
        }
    }
}

/// An entry that resolution settled on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisedEntry {
    /// Extension-less path relative to the target, e.g. `src/run`
    pub entry_path: String,
    pub file: PathBuf,
}

/// How the supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub status: ExitStatus,
}

impl ProcessExit {
    /// Exit code to pass on, with signals mapped the way shells report them
    pub fn exit_code(&self) -> i32 {
        if let Some(code) = self.status.code() {
            return code;
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = self.status.signal() {
                return 128 + signal;
            }
        }

        1
    }
}

/// Completes when the supervised process exits for a reason other than a restart
#[derive(Debug)]
pub struct WaitHandle {
    task: JoinHandle<Result<ProcessExit, SupervisorError>>,
}

impl WaitHandle {
    fn new(task: JoinHandle<Result<ProcessExit, SupervisorError>>) -> Self {
        Self { task }
    }

    pub async fn wait(self) -> Result<ProcessExit, SupervisorError> {
        self.task.await?
    }
}

/// Result of a start request
#[derive(Debug)]
pub enum StartOutcome {
    Started(WaitHandle),
    /// No usable entry; nothing was built or launched
    Skipped(MissingEntry),
}

/// Builds and runs a backend entry in development mode
#[async_trait]
pub trait DevProcessSupervisor: Send + Sync {
    /// Layout conventions this supervisor implements
    fn mode(&self) -> EntryMode;

    fn paths(&self) -> &Paths;

    /// Start supervising a resolved entry
    async fn supervise(
        &self,
        entry: SupervisedEntry,
        options: &StartOptions,
    ) -> Result<WaitHandle, SupervisorError>;
}

/// Pick the supervisor for a mode
pub fn supervisor_for(mode: EntryMode, context: SupervisorContext) -> Box<dyn DevProcessSupervisor> {
    match mode {
        EntryMode::Legacy => {
            let cache_dir = context
                .paths
                .resolve_target(["node_modules", ".cache", "backend-dev"]);
            let compiler = ExternalCompiler::new(context.settings.bundler.command.clone(), cache_dir);
            Box::new(LegacySupervisor::new(context, Arc::new(compiler)))
        }
        EntryMode::Current => Box::new(ExperimentalSupervisor::new(context)),
    }
}

/// Start a full backend package from `src/index`
pub async fn start_backend(
    supervisor: &dyn DevProcessSupervisor,
    options: &StartOptions,
) -> Result<StartOutcome, SupervisorError> {
    start(supervisor, PackageRole::Backend, options).await
}

/// Start a backend plugin from its development entry
pub async fn start_backend_plugin(
    supervisor: &dyn DevProcessSupervisor,
    options: &StartOptions,
) -> Result<StartOutcome, SupervisorError> {
    start(supervisor, PackageRole::Plugin, options).await
}

async fn start(
    supervisor: &dyn DevProcessSupervisor,
    role: PackageRole,
    options: &StartOptions,
) -> Result<StartOutcome, SupervisorError> {
    let resolver = EntryResolver::new(supervisor.paths().clone());

    match resolver.resolve_entry(role, supervisor.mode()) {
        ResolvedEntry::NotFound(missing) => {
            warn!("{}", missing);
            Ok(StartOutcome::Skipped(missing))
        }
        ResolvedEntry::Found {
            entry_path, file, ..
        } => {
            let entry = SupervisedEntry { entry_path, file };
            let handle = supervisor.supervise(entry, options).await?;
            Ok(StartOutcome::Started(handle))
        }
    }
}
