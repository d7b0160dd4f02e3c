use super::*;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Watch SVN and Git working copies for updates and local changes"
)]
pub(super) struct Cli {
    #[arg(long, global = true, help = "Config file (defaults to the per-user config dir)")]
    pub(super) config: Option<PathBuf>,
    #[command(subcommand)]
    pub(super) command: Commands,
}

#[derive(clap::Subcommand)]
pub(super) enum Commands {
    #[command(about = "Start monitoring a working copy")]
    Add(AddArgs),
    #[command(about = "List monitored working copies")]
    List,
    #[command(about = "Stop monitoring a working copy")]
    Remove(IndexArgs),
    #[command(about = "Resume polling a working copy")]
    Enable(IndexArgs),
    #[command(about = "Pause polling a working copy")]
    Disable(IndexArgs),
    #[command(about = "Check status now")]
    Check(CheckArgs),
    #[command(about = "Update a working copy")]
    Update(UpdateArgs),
    #[command(about = "Open the commit window of the configured front-end")]
    Commit(IndexArgs),
    #[command(about = "Open the log window of the configured front-end")]
    Log(IndexArgs),
    #[command(about = "Open the log for revisions not yet reviewed")]
    Changelog(IndexArgs),
    #[command(about = "Poll all enabled working copies until stopped")]
    Watch(WatchArgs),
    #[command(about = "Show recent scm errors")]
    Errors(ErrorsArgs),
}

#[derive(Parser)]
pub(super) struct AddArgs {
    pub(super) path: PathBuf,
    #[arg(
        long,
        allow_hyphen_values = true,
        help = "Seconds between checks while active (-1: default)"
    )]
    pub(super) active: Option<i32>,
    #[arg(
        long,
        allow_hyphen_values = true,
        help = "Seconds between checks while idle (-1: default)"
    )]
    pub(super) idle: Option<i32>,
    #[arg(long)]
    pub(super) disabled: bool,
}

#[derive(Parser)]
pub(super) struct IndexArgs {
    pub(super) index: usize,
}

#[derive(Parser)]
pub(super) struct CheckArgs {
    #[arg(help = "Only check this entry")]
    pub(super) index: Option<usize>,
}

#[derive(Parser)]
pub(super) struct UpdateArgs {
    pub(super) index: usize,
    #[arg(long, help = "Include externals / submodules")]
    pub(super) all: bool,
}

#[derive(Parser)]
pub(super) struct WatchArgs {
    #[arg(long, help = "Use idle cadences instead of active ones")]
    pub(super) idle: bool,
    #[arg(long)]
    pub(super) lock: Option<PathBuf>,
    #[arg(long, help = "Directory for the persistent error log")]
    pub(super) error_log: Option<PathBuf>,
}

#[derive(Parser)]
pub(super) struct ErrorsArgs {
    #[arg(long, default_value_t = 20)]
    pub(super) limit: usize,
    #[arg(long, help = "Directory of the persistent error log")]
    pub(super) dir: Option<PathBuf>,
}
