//! Bridge to the external watch-mode bundler
//!
//! The bundler runs as its own process. It receives the path of a JSON file
//! holding the [`BuildConfiguration`] and reports progress on stdout as one
//! JSON object per line:
//!
//! ```text
//! {"event":"done","hash":"3f2a9c1b"}
//! {"event":"failed","errors":["src/index.ts: Unexpected token"]}
//! ```
//!
//! Any other output line is forwarded to the log.
//!
//! The bundler only compiles. Running the server bundle belongs to the
//! supervisor, which starts exactly one process per session; the
//! `start-server` plugin entry only tells the bundler which file that process
//! will load.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{BuildConfiguration, BuildTarget};
use crate::utils::hash_content;

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("No bundler command configured; set [bundler] command in the settings file")]
    NoCommand,

    #[error("Failed to serialize build configuration: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write build configuration to {path}: {source}")]
    WriteConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn bundler '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Progress reported by the bundler
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum CompileEvent {
    /// A compile finished and the output directory is up to date
    Done {
        #[serde(default)]
        hash: Option<String>,
    },
    /// A compile finished with errors; the bundler keeps watching
    Failed {
        #[serde(default)]
        errors: Vec<String>,
    },
}

/// A running watch session
///
/// The session ends when the bundler exits, which shows up as
/// [`WatchSession::next_event`] returning `None`.
pub struct WatchSession {
    events: mpsc::Receiver<CompileEvent>,
    process: Option<Child>,
}

impl WatchSession {
    /// Session fed by an arbitrary event source
    pub fn from_channel(events: mpsc::Receiver<CompileEvent>) -> Self {
        Self {
            events,
            process: None,
        }
    }

    pub async fn next_event(&mut self) -> Option<CompileEvent> {
        self.events.recv().await
    }

    /// Stop watching and terminate the bundler
    pub async fn close(mut self) {
        self.events.close();
        if let Some(mut child) = self.process.take() {
            if let Err(e) = child.kill().await {
                debug!("Bundler already gone: {}", e);
            }
        }
    }
}

/// A bundler that can compile a configuration in watch mode
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn watch(&self, config: &BuildConfiguration) -> Result<WatchSession, CompilerError>;
}

/// Runs a configured bundler command
pub struct ExternalCompiler {
    command: Vec<String>,
    cache_dir: PathBuf,
}

impl ExternalCompiler {
    pub fn new(command: Vec<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            cache_dir: cache_dir.into(),
        }
    }

    async fn write_config(&self, config: &BuildConfiguration) -> Result<PathBuf, CompilerError> {
        let json = serde_json::to_vec_pretty(config)?;
        let kind = match config.target {
            BuildTarget::Browser => "browser",
            BuildTarget::Server => "server",
        };
        let path = self
            .cache_dir
            .join(format!("{}-config.{}.json", kind, hash_content(&json)));

        let write = async {
            tokio::fs::create_dir_all(&self.cache_dir).await?;
            tokio::fs::write(&path, &json).await
        };
        write.await.map_err(|source| CompilerError::WriteConfig {
            path: path.clone(),
            source,
        })?;

        Ok(path)
    }
}

#[async_trait]
impl Compiler for ExternalCompiler {
    async fn watch(&self, config: &BuildConfiguration) -> Result<WatchSession, CompilerError> {
        let (program, args) = self.command.split_first().ok_or(CompilerError::NoCommand)?;
        let config_path = self.write_config(config).await?;

        debug!("Starting bundler {} with {}", program, config_path.display());

        let mut child = Command::new(program)
            .args(args)
            .arg(&config_path)
            .current_dir(&config.context)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CompilerError::Spawn {
                program: program.clone(),
                source,
            })?;

        let (tx, rx) = mpsc::channel(16);

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if let Some(event) = parse_event_line(&line) {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Failed to read bundler output: {}", e);
                            break;
                        }
                    }
                }
            });
        }

        Ok(WatchSession {
            events: rx,
            process: Some(child),
        })
    }
}

fn parse_event_line(line: &str) -> Option<CompileEvent> {
    let trimmed = line.trim();
    if trimmed.starts_with('{') {
        if let Ok(event) = serde_json::from_str::<CompileEvent>(trimmed) {
            return Some(event);
        }
    }
    if !trimmed.is_empty() {
        info!("[bundler] {}", trimmed);
    }
    None
}
