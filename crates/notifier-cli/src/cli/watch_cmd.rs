use super::shared::runner;
use super::*;
use notifier_core::daemon::LoopHandle;
use std::future::Future;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use tracing::warn;

pub(super) fn handle_watch(config_path: &Path, args: WatchArgs) -> anyhow::Result<()> {
    let lock_path = match args.lock {
        Some(path) => path,
        None => default_lock_path()?,
    };
    let Some(_lock) = WatchLock::try_acquire(&lock_path)? else {
        match lock_holder(&lock_path) {
            Some(pid) => {
                anyhow::bail!("already watching (pid {pid}, lock {})", lock_path.display())
            }
            None => anyhow::bail!("already watching (lock {})", lock_path.display()),
        }
    };

    let workspace = Workspace::load(config_path)?;
    let log_dir = match args.error_log {
        Some(dir) => dir,
        None => default_error_log_dir()?,
    };
    let error_log = ErrorLog::new(log_dir)?;
    let _writer = error_log.spawn_writer(ErrorChannel::global().subscribe());

    let (changes_tx, changes_rx) = mpsc::channel();
    let status_loop = StatusLoop::new(
        Arc::clone(&workspace.registry),
        runner(),
        workspace.config.tools.clone(),
        workspace.config.intervals,
        workspace.config.parallel_checks,
    )
    .with_status_sender(changes_tx);
    stop_on(tokio::signal::ctrl_c(), status_loop.handle())?;

    let printer = thread::spawn(move || {
        for change in changes_rx {
            if change.previous != change.current {
                println!(
                    "{}: {} -> {}",
                    change.path.display(),
                    change.previous,
                    change.current
                );
            }
        }
    });

    info!(
        repositories = workspace.registry.len(),
        lock = %lock_path.display(),
        idle = args.idle,
        "watching"
    );
    let exit = status_loop.run(!args.idle);
    let _ = printer.join();
    match exit {
        LoopExit::Stopped => Ok(()),
        LoopExit::ShutdownInProgress => {
            anyhow::bail!("system shutdown in progress, stopped watching")
        }
    }
}

/// Stops the status loop once `signal` fires, so tracked processes get killed.
pub(super) fn stop_on<F>(signal: F, handle: LoopHandle) -> anyhow::Result<JoinHandle<()>>
where
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;
    Ok(thread::spawn(move || {
        runtime.block_on(async move {
            match signal.await {
                Ok(()) => {
                    info!("interrupt received, stopping");
                    handle.stop();
                }
                Err(err) => warn!(error = %err, "could not listen for interrupt"),
            }
        })
    }))
}

pub(super) fn handle_errors(args: ErrorsArgs) -> anyhow::Result<()> {
    let dir = match args.dir {
        Some(dir) => dir,
        None => default_error_log_dir()?,
    };
    let entries = ErrorLog::new(dir)?.recent(args.limit)?;
    if entries.is_empty() {
        println!("No errors recorded");
        return Ok(());
    }
    for entry in entries {
        println!("{} {}", entry.ts, entry.path);
        for line in entry.message.lines() {
            println!("    {line}");
        }
    }
    Ok(())
}
