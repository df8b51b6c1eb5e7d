//! Backend and plugin start commands

use std::ffi::OsStr;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tracing::info;

use super::Workspace;
use crate::resolver::EntryMode;
use crate::supervisor::process::InspectOptions;
use crate::supervisor::{
    start_backend, start_backend_plugin, supervisor_for, StartOptions, StartOutcome,
    SupervisorContext,
};

/// Start in development mode with rebuilds on change
#[derive(Args, Debug)]
pub struct StartCommand {
    /// Run type checking and linting alongside the build
    #[arg(long)]
    pub check: bool,

    /// Enable the node inspector, optionally on [host:]port
    #[arg(long, value_name = "ADDRESS", num_args = 0..=1, conflicts_with = "inspect_brk")]
    pub inspect: Option<Option<String>>,

    /// Enable the node inspector and break before user code starts
    #[arg(long, value_name = "ADDRESS", num_args = 0..=1)]
    pub inspect_brk: Option<Option<String>>,

    /// Module to preload with --require
    #[arg(long, value_name = "MODULE")]
    pub require: Option<String>,

    /// Module to preload with --import
    #[arg(long, value_name = "MODULE")]
    pub import: Option<String>,

    /// Use the legacy bundler-based start; also enabled by a non-empty LEGACY_BACKEND_START
    #[arg(long)]
    pub legacy: bool,
}

/// Environment toggle for the legacy start
pub const LEGACY_ENV: &str = "LEGACY_BACKEND_START";

/// Legacy mode is on for the flag or any non-empty env value, `0` and `false` included
fn legacy_requested(flag: bool, env: Option<&OsStr>) -> bool {
    flag || env.is_some_and(|value| !value.is_empty())
}

impl StartCommand {
    pub async fn execute_backend(&self, workspace: Workspace) -> Result<ExitCode> {
        self.run(workspace, false).await
    }

    pub async fn execute_plugin(&self, workspace: Workspace) -> Result<ExitCode> {
        self.run(workspace, true).await
    }

    fn options(&self) -> StartOptions {
        StartOptions {
            checks_enabled: self.check,
            inspect: InspectOptions::from_flags(self.inspect.clone(), self.inspect_brk.clone()),
            require: self.require.clone(),
            import: self.import.clone(),
        }
    }

    async fn run(&self, workspace: Workspace, plugin: bool) -> Result<ExitCode> {
        let env = std::env::var_os(LEGACY_ENV);
        let mode = EntryMode::from_legacy_flag(legacy_requested(self.legacy, env.as_deref()));
        info!("Starting in {:?} mode", mode);

        let supervisor = supervisor_for(
            mode,
            SupervisorContext {
                paths: workspace.paths,
                settings: workspace.settings,
                app_configs: workspace.app_configs,
            },
        );

        let options = self.options();
        let outcome = if plugin {
            start_backend_plugin(supervisor.as_ref(), &options).await?
        } else {
            start_backend(supervisor.as_ref(), &options).await?
        };

        match outcome {
            StartOutcome::Skipped(missing) => {
                eprintln!("{} {}", "!".yellow().bold(), missing.to_string().yellow());
                Ok(ExitCode::SUCCESS)
            }
            StartOutcome::Started(handle) => {
                let exit = handle.wait().await?;
                let code = exit.exit_code();
                eprintln!(
                    "\n{} Backend exited with code {}\n",
                    if exit.status.success() { "✓".green() } else { "✗".red() },
                    code
                );
                Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
            }
        }
    }
}
