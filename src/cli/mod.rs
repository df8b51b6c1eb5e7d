//! Command-line interface
//!
//! Provides the main CLI structure using clap with subcommands for:
//! - `backend`: Start a backend package in development mode
//! - `plugin`: Start a backend plugin in development mode
//! - `print-config`: Show the generated bundler configuration

mod print;
mod start;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::debug;

use crate::config::{load_app_configs, ConfigPayload, Settings};
use crate::paths::Paths;

pub use print::PrintConfigCommand;
pub use start::StartCommand;

/// Default app config file, loaded when present and no --config is given
const DEFAULT_APP_CONFIG: &str = "app-config.toml";

/// Development build and process supervision for backend packages
#[derive(Parser, Debug)]
#[command(name = "backend-dev")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// App config file; may be given multiple times, later files win
    #[arg(short, long = "config", global = true)]
    pub configs: Vec<PathBuf>,

    /// Tool settings file
    #[arg(long, global = true, default_value = "backend-dev.toml")]
    pub settings: PathBuf,

    /// Package directory to operate on
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a backend in development mode
    Backend(StartCommand),

    /// Start a backend plugin in development mode
    Plugin(StartCommand),

    /// Print the bundler configuration for a target as JSON
    PrintConfig(PrintConfigCommand),
}

/// Loaded project state shared by the subcommands
pub struct Workspace {
    pub paths: Paths,
    pub settings: Settings,
    pub app_configs: Vec<ConfigPayload>,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<ExitCode> {
        match &self.command {
            Commands::Backend(cmd) => {
                print_banner();
                cmd.execute_backend(self.load_workspace()?).await
            }
            Commands::Plugin(cmd) => {
                print_banner();
                cmd.execute_plugin(self.load_workspace()?).await
            }
            Commands::PrintConfig(cmd) => cmd.execute(self.load_workspace()?),
        }
    }

    fn load_workspace(&self) -> Result<Workspace> {
        let target_dir = match &self.cwd {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Failed to determine current directory")?,
        };
        let paths = Paths::discover(&target_dir);

        let settings_path = resolve_in(&paths, &self.settings);
        let settings = Settings::load(&settings_path)
            .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

        let config_files: Vec<PathBuf> = if self.configs.is_empty() {
            let default = resolve_in(&paths, Path::new(DEFAULT_APP_CONFIG));
            if default.is_file() {
                vec![default]
            } else {
                debug!("No {} found, continuing without app config", DEFAULT_APP_CONFIG);
                Vec::new()
            }
        } else {
            self.configs.iter().map(|p| resolve_in(&paths, p)).collect()
        };

        let app_configs = load_app_configs(&config_files).context("Failed to load app config")?;

        Ok(Workspace {
            paths,
            settings,
            app_configs,
        })
    }
}

/// Resolve a relative file against the target package, then the workspace root
fn resolve_in(paths: &Paths, file: &Path) -> PathBuf {
    if file.is_absolute() {
        return file.to_path_buf();
    }
    let in_target = paths.resolve_target([file]);
    if in_target.exists() {
        return in_target;
    }
    let in_root = paths.resolve_root([file]);
    if in_root.exists() {
        in_root
    } else {
        in_target
    }
}

/// Print the banner
fn print_banner() {
    eprintln!(
        "\n{} {} {}\n",
        "⚡".cyan(),
        "backend-dev".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
