//! Bundler-free supervision for the current plugin layout
//!
//! Node runs the source entry directly with a transform preloaded. The
//! package sources are watched and any relevant change replaces the running
//! process with a fresh one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use colored::Colorize;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, Debouncer};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::process::{node_args, NodeLauncher, RunningProcess};
use super::{
    DevProcessSupervisor, ProcessExit, StartOptions, SupervisedEntry, SupervisorContext,
    SupervisorError, WaitHandle,
};
use crate::bundler::WatchOptions;
use crate::paths::{Paths, SOURCE_EXTENSIONS};
use crate::resolver::EntryMode;
use crate::utils::{format_duration, relative_path};

/// Runs sources directly and restarts on change
pub struct ExperimentalSupervisor {
    context: SupervisorContext,
}

impl ExperimentalSupervisor {
    pub fn new(context: SupervisorContext) -> Self {
        Self { context }
    }

    fn launch_args(&self, entry: &Path, options: &StartOptions) -> Vec<String> {
        let transform = &self.context.settings.node.transform;
        let mut args = Vec::new();
        if !transform.is_empty() {
            args.extend(["--require".to_string(), transform.clone()]);
        }
        args.extend(node_args(
            &options.inspect,
            options.require.as_deref(),
            options.import.as_deref(),
        ));
        args.push(entry.display().to_string());
        args
    }

    /// Watch the package source directories, forwarding relevant changes
    fn watch_sources(&self) -> Result<SourceWatch, SupervisorError> {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let (tx, rx) = std::sync::mpsc::channel();

        let debounce = Duration::from_millis(self.context.settings.watch.debounce_ms);
        let mut debouncer = new_debouncer(debounce, tx).map_err(|source| SupervisorError::Watch {
            path: self.context.paths.target_dir.clone(),
            source,
        })?;

        for dir in ["src", "dev"] {
            let path = self.context.paths.resolve_target([dir]);
            if !path.is_dir() {
                continue;
            }
            debouncer
                .watcher()
                .watch(&path, RecursiveMode::Recursive)
                .map_err(|source| SupervisorError::Watch { path: path.clone(), source })?;
        }

        let filter = WatchOptions::for_namespace(&self.context.settings.workspace.namespace);
        let dist = self.context.paths.resolve_target(["dist"]);

        // Runs until the debouncer is dropped, which closes `rx`.
        let forwarder = std::thread::spawn(move || {
            while let Ok(result) = rx.recv() {
                match result {
                    Ok(events) => {
                        for event in events {
                            if !is_relevant_change(&event.path, &filter, &dist) {
                                continue;
                            }
                            // The session may already be over; keep draining until shutdown.
                            let _ = changes_tx.send(event.path);
                        }
                    }
                    Err(e) => error!("Watch error: {:?}", e),
                }
            }
        });

        Ok(SourceWatch {
            changes: changes_rx,
            debouncer,
            forwarder,
        })
    }
}

/// File watching owned by one supervision session
struct SourceWatch {
    changes: mpsc::UnboundedReceiver<PathBuf>,
    debouncer: Debouncer<RecommendedWatcher>,
    forwarder: std::thread::JoinHandle<()>,
}

impl SourceWatch {
    async fn next_change(&mut self) -> Option<PathBuf> {
        self.changes.recv().await
    }

    /// Discard changes that queued up behind the one being handled
    fn drain(&mut self) {
        while self.changes.try_recv().is_ok() {}
    }

    /// Stop the watcher; the returned thread exits shortly after
    fn stop(self) -> std::thread::JoinHandle<()> {
        drop(self.debouncer);
        self.forwarder
    }
}

/// Source files whose change warrants a restart
fn is_relevant_change(path: &Path, filter: &WatchOptions, dist: &Path) -> bool {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let is_source = SOURCE_EXTENSIONS.contains(&extension)
        || matches!(extension, "json" | "yaml" | "yml");

    is_source && !filter.is_ignored(path) && !path.starts_with(dist)
}

#[async_trait]
impl DevProcessSupervisor for ExperimentalSupervisor {
    fn mode(&self) -> EntryMode {
        EntryMode::Current
    }

    fn paths(&self) -> &Paths {
        &self.context.paths
    }

    async fn supervise(
        &self,
        entry: SupervisedEntry,
        options: &StartOptions,
    ) -> Result<WaitHandle, SupervisorError> {
        if options.checks_enabled {
            debug!("Type checking is not supported when running sources directly, skipping");
        }

        let launcher = self.context.launcher()?;
        self.context.warn_on_unsupported_flags(options).await;

        let args = self.launch_args(&entry.file, options);
        let watch = self.watch_sources()?;

        eprintln!(
            "{} Starting {} with file watching",
            "→".blue(),
            entry.entry_path.cyan()
        );

        let process = launch(&launcher, &args)?;
        let target_dir = self.context.paths.target_dir.clone();

        Ok(WaitHandle::new(tokio::spawn(run_with_restarts(
            process, watch, launcher, args, target_dir,
        ))))
    }
}

fn launch(launcher: &NodeLauncher, args: &[String]) -> Result<RunningProcess, SupervisorError> {
    launcher.launch(args).map_err(|source| SupervisorError::Launch {
        program: launcher.binary().to_string(),
        source,
    })
}

/// Keep one process alive, replacing it on every change
async fn run_with_restarts(
    process: RunningProcess,
    mut watch: SourceWatch,
    launcher: NodeLauncher,
    args: Vec<String>,
    target_dir: PathBuf,
) -> Result<ProcessExit, SupervisorError> {
    let result = restart_loop(process, &mut watch, &launcher, &args, &target_dir).await;
    drop(watch.stop());
    result
}

async fn restart_loop(
    mut process: RunningProcess,
    watch: &mut SourceWatch,
    launcher: &NodeLauncher,
    args: &[String],
    target_dir: &Path,
) -> Result<ProcessExit, SupervisorError> {
    loop {
        tokio::select! {
            status = process.wait() => {
                let status = status.map_err(SupervisorError::Wait)?;
                info!("Backend process exited with {}", status);
                return Ok(ProcessExit { status });
            }
            Some(path) = watch.next_change() => {
                watch.drain();

                let shown = relative_path(target_dir, &path).unwrap_or_else(|| path.display().to_string());
                eprintln!("  {} Change in {}, restarting", "↻".yellow(), shown.dimmed());

                let uptime = process.uptime();
                // The old process must be gone before its replacement binds the port.
                process
                    .terminate()
                    .await
                    .map_err(SupervisorError::Wait)?;
                debug!("Stopped previous process after {}", format_duration(uptime));

                process = launch(launcher, args)?;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::supervisor::tests::{context, write};
    use crate::supervisor::{start_backend_plugin, StartOutcome};

    #[test]
    fn test_relevant_changes() {
        let filter = WatchOptions::for_namespace("@backstage");
        let dist = Path::new("/repo/plugin/dist");

        assert!(is_relevant_change(Path::new("/repo/plugin/src/router.ts"), &filter, dist));
        assert!(is_relevant_change(Path::new("/repo/plugin/dev/config.yaml"), &filter, dist));
        assert!(!is_relevant_change(Path::new("/repo/plugin/src/notes.md"), &filter, dist));
        assert!(!is_relevant_change(Path::new("/repo/plugin/dist/main.js"), &filter, dist));
        assert!(!is_relevant_change(
            Path::new("/repo/plugin/src/node_modules/left-pad/index.js"),
            &filter,
            dist
        ));
    }

    #[test]
    fn test_launch_args() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), "node");
        ctx.settings.node.transform = "@backstage/cli/config/nodeTransform.cjs".to_string();
        let supervisor = ExperimentalSupervisor::new(ctx);

        let options = StartOptions {
            inspect: crate::supervisor::process::InspectOptions::Attach { address: None },
            import: Some("./hooks.mjs".to_string()),
            ..StartOptions::default()
        };
        let args = supervisor.launch_args(Path::new("/pkg/dev/index.ts"), &options);

        assert_eq!(
            args,
            vec![
                "--require",
                "@backstage/cli/config/nodeTransform.cjs",
                "--inspect",
                "--import",
                "./hooks.mjs",
                "/pkg/dev/index.ts",
            ]
        );
    }

    #[test]
    fn test_stopping_watch_ends_forwarding_thread() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/index.ts", "export {};\n");
        let supervisor = ExperimentalSupervisor::new(context(dir.path(), "sh"));

        for _ in 0..3 {
            let watch = supervisor.watch_sources().unwrap();
            let forwarder = watch.stop();

            let (done_tx, done_rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let _ = forwarder.join();
                let _ = done_tx.send(());
            });
            done_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("watch thread outlived its session");
        }
    }

    #[tokio::test]
    async fn test_exit_resolves_handle() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "dev/index.ts", "exit 0\n");
        let supervisor = ExperimentalSupervisor::new(context(dir.path(), "sh"));
        let options = StartOptions {
            checks_enabled: true,
            ..StartOptions::default()
        };

        let StartOutcome::Started(handle) = start_backend_plugin(&supervisor, &options).await.unwrap() else {
            panic!("expected the plugin to start");
        };

        let exit = handle.wait().await.unwrap();
        assert!(exit.status.success());
    }

    #[tokio::test]
    async fn test_change_restarts_process() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "dev/index.ts",
            "echo started >> starts.log\nif [ $(wc -l < starts.log) -ge 2 ]; then exit 3; fi\nexec sleep 30\n",
        );
        write(dir.path(), "src/index.ts", "export {};\n");
        let supervisor = ExperimentalSupervisor::new(context(dir.path(), "sh"));

        let StartOutcome::Started(handle) =
            start_backend_plugin(&supervisor, &StartOptions::default()).await.unwrap()
        else {
            panic!("expected the plugin to start");
        };

        let root = dir.path().to_path_buf();
        let touch = tokio::spawn(async move {
            for round in 0..60 {
                tokio::time::sleep(Duration::from_millis(300)).await;
                write(&root, "src/index.ts", &format!("export const round = {};\n", round));
            }
        });

        let exit = tokio::time::timeout(Duration::from_secs(20), handle.wait())
            .await
            .expect("process was not restarted")
            .unwrap();
        touch.abort();

        assert_eq!(exit.exit_code(), 3);
        let starts = std::fs::read_to_string(dir.path().join("starts.log")).unwrap();
        assert!(starts.lines().count() >= 2);
    }
}
