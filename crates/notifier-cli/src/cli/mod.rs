use anyhow::Context;
use clap::Parser;
use notifier_core::config::{
    AppConfig, default_config_path, default_error_log_dir, default_lock_path,
};
use notifier_core::daemon::{LoopExit, StatusLoop};
use notifier_core::error_channel::ErrorChannel;
use notifier_core::error_log::ErrorLog;
use notifier_core::process::ProcessRunner;
use notifier_core::registry::RepositoryRegistry;
use notifier_core::repository::{CheckOutcome, Repository, RepositorySettings};
use notifier_core::watch_lock::{WatchLock, lock_holder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

mod args;
mod repo_cmd;
mod scm_cmd;
mod shared;
#[cfg(test)]
mod tests;
mod watch_cmd;

use args::*;
use repo_cmd::{handle_add, handle_list, handle_remove, handle_set_disabled};
use scm_cmd::{handle_changelog, handle_check, handle_commit, handle_log, handle_update};
use shared::Workspace;
use watch_cmd::{handle_errors, handle_watch};

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dispatch(cli)
}

fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    match cli.command {
        Commands::Add(args) => handle_add(&config_path, args),
        Commands::List => handle_list(&config_path),
        Commands::Remove(args) => handle_remove(&config_path, args.index),
        Commands::Enable(args) => handle_set_disabled(&config_path, args.index, false),
        Commands::Disable(args) => handle_set_disabled(&config_path, args.index, true),
        Commands::Check(args) => handle_check(&config_path, args.index),
        Commands::Update(args) => handle_update(&config_path, args),
        Commands::Commit(args) => handle_commit(&config_path, args.index),
        Commands::Log(args) => handle_log(&config_path, args.index),
        Commands::Changelog(args) => handle_changelog(&config_path, args.index),
        Commands::Watch(args) => handle_watch(&config_path, args),
        Commands::Errors(args) => handle_errors(args),
    }
}
