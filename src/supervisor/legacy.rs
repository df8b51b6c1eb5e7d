//! Bundler-driven supervision for the historical backend layout

use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use colored::Colorize;
use tracing::{debug, error, info};

use super::process::{NodeLauncher, RunningProcess};
use super::{
    DevProcessSupervisor, ProcessExit, StartOptions, SupervisedEntry, SupervisorContext,
    SupervisorError, WaitHandle,
};
use crate::bundler::{
    build_config, BuildOptions, BuildTarget, CompileEvent, Compiler, WatchSession, SERVER_BUNDLE,
};
use crate::paths::{BundlingPaths, Paths};
use crate::resolver::EntryMode;
use crate::utils::format_duration;

/// Compiles the entry in watch mode and runs the emitted server bundle
pub struct LegacySupervisor {
    context: SupervisorContext,
    compiler: Arc<dyn Compiler>,
}

impl LegacySupervisor {
    pub fn new(context: SupervisorContext, compiler: Arc<dyn Compiler>) -> Self {
        Self { context, compiler }
    }

    /// Remove output left behind by an earlier session.
    ///
    /// A previous build's entrypoint would otherwise be picked up next to the
    /// new one and both would race for the same port.
    async fn clean_output(&self, paths: &BundlingPaths) -> Result<(), SupervisorError> {
        match tokio::fs::remove_dir_all(&paths.target_dist).await {
            Ok(()) => {
                debug!("Removed {}", paths.target_dist.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SupervisorError::CleanOutput {
                path: paths.target_dist.clone(),
                source,
            }),
        }
    }
}

#[async_trait]
impl DevProcessSupervisor for LegacySupervisor {
    fn mode(&self) -> EntryMode {
        EntryMode::Legacy
    }

    fn paths(&self) -> &Paths {
        &self.context.paths
    }

    async fn supervise(
        &self,
        entry: SupervisedEntry,
        options: &StartOptions,
    ) -> Result<WaitHandle, SupervisorError> {
        let paths = BundlingPaths::for_entry_file(&self.context.paths, entry.file);

        self.clean_output(&paths).await?;

        let build_options = BuildOptions {
            checks_enabled: options.checks_enabled,
            is_dev: true,
            config: self.context.config_reader(),
            app_configs: self.context.app_configs.clone(),
            inspect: options.inspect.clone(),
            require: options.require.clone(),
            import: options.import.clone(),
            namespace: self.context.settings.workspace.namespace.clone(),
        };
        let config = build_config(&paths, BuildTarget::Server, &build_options)?;

        // The bundler only compiles; this session owns the single server process.
        let (bundle, node_args) = config
            .start_server()
            .map(|(name, args)| (name.to_string(), args.to_vec()))
            .unwrap_or_else(|| (SERVER_BUNDLE.to_string(), build_options.node_args()));
        let mut launch_args = node_args;
        launch_args.push(paths.target_dist.join(bundle).display().to_string());

        let launcher = self.context.launcher()?;
        self.context.warn_on_unsupported_flags(options).await;

        eprintln!(
            "{} Compiling {} in watch mode",
            "→".blue(),
            entry.entry_path.cyan()
        );

        let session = self.compiler.watch(&config).await?;

        Ok(WaitHandle::new(tokio::spawn(run_session(
            session,
            launcher,
            launch_args,
        ))))
    }
}

async fn wait_for(process: &mut Option<RunningProcess>) -> io::Result<std::process::ExitStatus> {
    match process {
        Some(process) => process.wait().await,
        None => std::future::pending().await,
    }
}

/// Drive one watch session until the backend process exits
async fn run_session(
    mut session: WatchSession,
    launcher: NodeLauncher,
    launch_args: Vec<String>,
) -> Result<ProcessExit, SupervisorError> {
    let started = Instant::now();
    let mut process: Option<RunningProcess> = None;
    let mut compiling = true;

    loop {
        tokio::select! {
            event = session.next_event(), if compiling => match event {
                Some(CompileEvent::Done { hash }) => {
                    if process.is_none() {
                        info!("Compiled in {}", format_duration(started.elapsed()));
                        let launched = launcher.launch(&launch_args).map_err(|source| {
                            SupervisorError::Launch {
                                program: launcher.binary().to_string(),
                                source,
                            }
                        });
                        match launched {
                            Ok(running) => process = Some(running),
                            Err(e) => {
                                session.close().await;
                                return Err(e);
                            }
                        }
                    } else {
                        debug!("Hot update {} applied in place", hash.as_deref().unwrap_or("-"));
                    }
                }
                Some(CompileEvent::Failed { errors }) => {
                    for message in &errors {
                        error!("{}", message);
                    }
                    eprintln!(
                        "{} Compile failed, waiting for changes",
                        "✗".red()
                    );
                }
                None => {
                    compiling = false;
                    if process.is_none() {
                        return Err(SupervisorError::BundlerExited);
                    }
                    debug!("Bundler exited, backend keeps running");
                }
            },
            status = wait_for(&mut process) => {
                session.close().await;
                let status = status.map_err(SupervisorError::Wait)?;
                info!("Backend process exited with {}", status);
                return Ok(ProcessExit { status });
            }
        }
    }
}
