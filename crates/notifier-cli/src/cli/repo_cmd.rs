use super::shared::format_interval;
use super::*;

pub(super) fn handle_add(config_path: &Path, args: AddArgs) -> anyhow::Result<()> {
    let mut workspace = Workspace::load(config_path)?;
    let path = std::path::absolute(&args.path)
        .with_context(|| format!("resolve {}", args.path.display()))?;
    if workspace.registry.contains_path(&path) {
        println!("Already monitoring {}", path.display());
        return Ok(());
    }
    let Some(repo) = Repository::create(&path) else {
        anyhow::bail!("{} is not an SVN working copy or Git repository", path.display());
    };
    let defaults = RepositorySettings::default();
    let repo = repo.with_settings(RepositorySettings {
        active_interval: args.active.unwrap_or(defaults.active_interval),
        idle_interval: args.idle.unwrap_or(defaults.idle_interval),
        disabled: args.disabled,
    });
    let kind = repo.kind();
    let index = workspace.registry.add(Arc::new(repo));
    workspace.save()?;
    info!(path = %path.display(), kind = %kind, index, "repository added");
    println!("Added [{index}] {kind} {}", path.display());
    Ok(())
}

pub(super) fn handle_list(config_path: &Path) -> anyhow::Result<()> {
    let workspace = Workspace::load(config_path)?;
    if workspace.registry.is_empty() {
        println!("No repositories configured in {}", config_path.display());
        return Ok(());
    }
    for (index, repo) in workspace.registry.snapshot().iter().enumerate() {
        let settings = repo.settings();
        println!(
            "[{index}] {} {}{}",
            repo.kind(),
            repo.visible_path(),
            if settings.disabled { " (disabled)" } else { "" }
        );
        println!(
            "    active={} idle={} icon={}",
            format_interval(settings.active_interval),
            format_interval(settings.idle_interval),
            repo.icon_key()
        );
    }
    Ok(())
}

pub(super) fn handle_remove(config_path: &Path, index: usize) -> anyhow::Result<()> {
    let mut workspace = Workspace::load(config_path)?;
    let repo = workspace.repository(index)?;
    workspace.registry.remove_at(index);
    workspace.save()?;
    info!(path = %repo.path().display(), "repository removed");
    println!("Removed [{index}] {}", repo.visible_path());
    Ok(())
}

pub(super) fn handle_set_disabled(
    config_path: &Path,
    index: usize,
    disabled: bool,
) -> anyhow::Result<()> {
    let mut workspace = Workspace::load(config_path)?;
    let repo = workspace.repository(index)?;
    repo.set_settings(RepositorySettings {
        disabled,
        ..repo.settings()
    });
    workspace.save()?;
    let verb = if disabled { "Disabled" } else { "Enabled" };
    println!("{verb} [{index}] {}", repo.visible_path());
    Ok(())
}
