//! Print the generated bundler configuration

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use super::Workspace;
use crate::bundler::{build_config, BuildOptions, BuildTarget};
use crate::paths::BundlingPaths;

/// Show the configuration that would be handed to the bundler
#[derive(Args, Debug)]
pub struct PrintConfigCommand {
    /// Platform to build for
    #[arg(long, value_enum, default_value = "server")]
    pub target: BuildTarget,

    /// Entry point, relative to the package and without extension
    #[arg(long, default_value = "src/index")]
    pub entry: String,

    /// Produce the production variant instead of the development one
    #[arg(long)]
    pub prod: bool,

    /// Include type checking in the plugin list
    #[arg(long)]
    pub check: bool,
}

impl PrintConfigCommand {
    pub fn execute(&self, workspace: Workspace) -> Result<ExitCode> {
        let paths = BundlingPaths::for_entry(&workspace.paths, &self.entry);
        info!("Building {:?} configuration for {}", self.target, self.entry);

        let mut options =
            BuildOptions::development(workspace.app_configs, workspace.settings.workspace.namespace);
        options.is_dev = !self.prod;
        options.checks_enabled = self.check;

        let config = build_config(&paths, self.target, &options)?;
        let json = serde_json::to_string_pretty(&config).context("Failed to serialize configuration")?;
        println!("{}", json);

        Ok(ExitCode::SUCCESS)
    }
}
