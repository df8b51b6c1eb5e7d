//! Node process launching

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Debugger flags forwarded to node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InspectOptions {
    #[default]
    Disabled,
    /// `--inspect`: debugger can attach, execution starts immediately
    Attach { address: Option<String> },
    /// `--inspect-brk`: execution waits for the debugger
    BreakOnStart { address: Option<String> },
}

impl InspectOptions {
    /// Combine `--inspect[=addr]` and `--inspect-brk[=addr]` flag values
    pub fn from_flags(inspect: Option<Option<String>>, inspect_brk: Option<Option<String>>) -> Self {
        match (inspect, inspect_brk) {
            (_, Some(address)) => InspectOptions::BreakOnStart { address },
            (Some(address), None) => InspectOptions::Attach { address },
            (None, None) => InspectOptions::Disabled,
        }
    }

    pub fn node_arg(&self) -> Option<String> {
        let (flag, address) = match self {
            InspectOptions::Disabled => return None,
            InspectOptions::Attach { address } => ("--inspect", address),
            InspectOptions::BreakOnStart { address } => ("--inspect-brk", address),
        };

        Some(match address {
            Some(address) => format!("{}={}", flag, address),
            None => flag.to_string(),
        })
    }
}

/// Node arguments for debugging and module preloading
pub fn node_args(inspect: &InspectOptions, require: Option<&str>, import: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = inspect.node_arg().into_iter().collect();
    if let Some(module) = require {
        args.extend(["--require".to_string(), module.to_string()]);
    }
    if let Some(module) = import {
        args.extend(["--import".to_string(), module.to_string()]);
    }
    args
}

/// Matches the `vMAJOR.MINOR.PATCH` line printed by `node --version`
static NODE_VERSION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"v?(\d+\.\d+\.\d+)").unwrap());

/// Version of the node binary, if it can be determined
pub async fn node_version(binary: &str) -> Option<Version> {
    let output = Command::new(binary).arg("--version").output().await.ok()?;
    parse_node_version(&String::from_utf8_lossy(&output.stdout))
}

fn parse_node_version(raw: &str) -> Option<Version> {
    let captures = NODE_VERSION_REGEX.captures(raw)?;
    Version::parse(&captures[1]).ok()
}

/// `--import` is available from node 18.18
pub fn supports_import_flag(version: &Version) -> bool {
    *version >= Version::new(18, 18, 0)
}

/// A live supervised child process
#[derive(Debug)]
pub struct RunningProcess {
    pub pid: Option<u32>,
    pub started_at: Instant,
    pub listening_port: Option<u16>,
    child: Child,
}

impl RunningProcess {
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Wait for the process to exit on its own
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Kill the process and wait until it is gone
    pub async fn terminate(mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }
        self.child.start_kill()?;
        self.child.wait().await
    }
}

/// Spawns node processes for a target package
#[derive(Debug, Clone)]
pub struct NodeLauncher {
    binary: String,
    cwd: PathBuf,
    listening_port: Option<u16>,
}

impl NodeLauncher {
    pub fn new(binary: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            cwd: cwd.into(),
            listening_port: None,
        }
    }

    /// Port the backend is configured to listen on
    pub fn with_listening_port(mut self, port: Option<u16>) -> Self {
        self.listening_port = port;
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn launch(&self, args: &[String]) -> io::Result<RunningProcess> {
        debug!("Launching {} {}", self.binary, args.join(" "));

        let child = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let process = RunningProcess {
            pid: child.id(),
            started_at: Instant::now(),
            listening_port: self.listening_port,
            child,
        };

        match (process.pid, process.listening_port) {
            (Some(pid), Some(port)) => info!("Backend process {} starting on port {}", pid, port),
            (Some(pid), None) => info!("Backend process {} starting", pid),
            _ => {}
        }

        Ok(process)
    }
}
