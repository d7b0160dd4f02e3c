use super::shared::{format_time, runner};
use super::*;
use notifier_core::error_channel::ErrorEvent;
use std::sync::mpsc::Receiver;
use std::thread;

pub(super) fn handle_check(config_path: &Path, index: Option<usize>) -> anyhow::Result<()> {
    let workspace = Workspace::load(config_path)?;
    let repos = workspace.select(index)?;
    if repos.is_empty() {
        println!("No enabled repositories in {}", config_path.display());
        return Ok(());
    }
    let errors = ErrorChannel::global().subscribe();
    let runner = runner();
    let tools = &workspace.config.tools;
    let parallel = workspace.config.parallel_checks.max(1);

    for chunk in repos.chunks(parallel) {
        let outcomes: Vec<_> = thread::scope(|scope| {
            let workers: Vec<_> = chunk
                .iter()
                .map(|repo| {
                    let runner = &runner;
                    scope.spawn(move || repo.check_status(runner, tools))
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| {
                    worker
                        .join()
                        .map_err(|_| anyhow::anyhow!("status check thread panicked"))
                })
                .collect()
        });

        for (repo, outcome) in chunk.iter().zip(outcomes) {
            match outcome?? {
                CheckOutcome::Checked(status) => println!(
                    "{} {} [{}] checked {}",
                    repo.visible_path(),
                    status,
                    repo.icon_key(),
                    format_time(repo.status_stamp().updated_at)
                ),
                CheckOutcome::Busy => println!("{} busy", repo.visible_path()),
            }
        }
    }
    print_errors(&errors);
    Ok(())
}

pub(super) fn handle_update(config_path: &Path, args: UpdateArgs) -> anyhow::Result<()> {
    let workspace = Workspace::load(config_path)?;
    let repo = workspace.repository(args.index)?;
    let errors = ErrorChannel::global().subscribe();
    let report = repo.update(&runner(), &workspace.config.tools, args.all)?;
    for line in &report.output {
        println!("{line}");
    }
    print_errors(&errors);
    if report.failed {
        anyhow::bail!("update of {} failed (now {})", repo.visible_path(), report.status);
    }
    println!("{} is now {}", repo.visible_path(), report.status);
    Ok(())
}

pub(super) fn handle_commit(config_path: &Path, index: usize) -> anyhow::Result<()> {
    let workspace = Workspace::load(config_path)?;
    let repo = workspace.repository(index)?;
    repo.commit(&runner(), &workspace.config.tools)?;
    Ok(())
}

pub(super) fn handle_log(config_path: &Path, index: usize) -> anyhow::Result<()> {
    let workspace = Workspace::load(config_path)?;
    let repo = workspace.repository(index)?;
    repo.open_log_window(&runner(), &workspace.config.tools)?;
    Ok(())
}

pub(super) fn handle_changelog(config_path: &Path, index: usize) -> anyhow::Result<()> {
    let workspace = Workspace::load(config_path)?;
    let repo = workspace.repository(index)?;
    repo.open_change_log_window(&runner(), &workspace.config.tools, true)?;
    let marks = repo.revision_marks();
    info!(
        path = %repo.path().display(),
        update = marks.update_revision,
        reviewed = marks.reviewed_revision,
        "change log opened"
    );
    Ok(())
}

fn print_errors(errors: &Receiver<ErrorEvent>) {
    for event in errors.try_iter() {
        eprintln!("error: {}: {}", event.path.display(), event.message);
    }
}
