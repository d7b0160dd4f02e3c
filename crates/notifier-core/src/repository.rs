use crate::config::{IntervalDefaults, ToolPaths};
use crate::process::{ProcessRunner, RunnerError, Wait};
use crate::process_output::{CommandKind, RepositoryProcess};
use crate::status::RepositoryStatus;
use crate::{git_backend, svn_backend};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

const RECORD_SEPARATOR: char = '|';
const RECORD_FIELDS: usize = 6;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ScmKind {
    Svn,
    Git,
}

impl ScmKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            ScmKind::Svn => "SVN",
            ScmKind::Git => "Git",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "SVN" | "Svn" => Some(ScmKind::Svn),
            "Git" => Some(ScmKind::Git),
            _ => None,
        }
    }
}

impl fmt::Display for ScmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum PathKind {
    #[default]
    Directory,
    HeadDirectory,
    File,
}

impl PathKind {
    pub fn as_index(&self) -> u8 {
        match self {
            PathKind::Directory => 0,
            PathKind::HeadDirectory => 1,
            PathKind::File => 2,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(PathKind::Directory),
            1 => Some(PathKind::HeadDirectory),
            2 => Some(PathKind::File),
            _ => None,
        }
    }
}

/// User-editable polling settings. A negative interval means "use the
/// global default for that mode".
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RepositorySettings {
    pub active_interval: i32,
    pub idle_interval: i32,
    pub disabled: bool,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            active_interval: -1,
            idle_interval: -1,
            disabled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct StatusStamp {
    pub status: RepositoryStatus,
    pub updated_at: SystemTime,
}

/// Revisions remembered for the change-log window.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct RevisionMarks {
    pub update_revision: u64,
    pub reviewed_revision: u64,
}

#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("expected 6 fields, found {0}")]
    FieldCount(usize),
    #[error("unknown backend tag {0:?}")]
    UnknownBackend(String),
    #[error("invalid {field} interval {value:?}")]
    Interval { field: &'static str, value: String },
    #[error("invalid disabled flag {0:?}")]
    Disabled(String),
    #[error("invalid path kind {0:?}")]
    PathKind(String),
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error("another operation is already running for {0}")]
    Busy(PathBuf),
    #[error("no {0} front-end is configured")]
    NoFrontEnd(ScmKind),
}

impl RepositoryError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RepositoryError::Runner(err) if err.is_fatal())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CheckOutcome {
    Checked(RepositoryStatus),
    /// A check or update for this repository was already in flight.
    Busy,
}

#[derive(Debug, Clone)]
pub struct UpdateReport {
    pub output: Vec<String>,
    pub failed: bool,
    pub status: RepositoryStatus,
}

/// Held while an operation runs; at most one exists per repository.
#[derive(Debug)]
pub struct OperationGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// One monitored working copy.
#[derive(Debug)]
pub struct Repository {
    kind: ScmKind,
    path: PathBuf,
    original_path: String,
    visible_path: String,
    path_kind: PathKind,
    settings: RwLock<RepositorySettings>,
    state: Mutex<StatusStamp>,
    revisions: Mutex<RevisionMarks>,
    busy: Arc<AtomicBool>,
}

impl Repository {
    pub fn new(kind: ScmKind, original_path: &str, path_kind: PathKind) -> Self {
        Self {
            kind,
            path: PathBuf::from(expand_path_template(original_path)),
            original_path: original_path.to_string(),
            visible_path: original_path.to_string(),
            path_kind,
            settings: RwLock::new(RepositorySettings::default()),
            state: Mutex::new(StatusStamp {
                status: RepositoryStatus::Unknown,
                updated_at: UNIX_EPOCH,
            }),
            revisions: Mutex::new(RevisionMarks::default()),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Probes `path` for SCM metadata and builds the matching repository.
    pub fn create(path: &Path) -> Option<Self> {
        let raw = path.display().to_string();
        if svn_backend::is_working_copy(path) {
            return Some(Self::new(ScmKind::Svn, &raw, PathKind::Directory));
        }
        if git_backend::is_repository_dir(path) {
            return Some(Self::new(ScmKind::Git, &raw, PathKind::Directory));
        }
        None
    }

    pub fn with_settings(self, settings: RepositorySettings) -> Self {
        self.set_settings(settings);
        self
    }

    pub fn with_visible_path(mut self, visible_path: impl Into<String>) -> Self {
        self.visible_path = visible_path.into();
        self
    }

    pub fn kind(&self) -> ScmKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original_path(&self) -> &str {
        &self.original_path
    }

    pub fn visible_path(&self) -> &str {
        &self.visible_path
    }

    pub fn path_kind(&self) -> PathKind {
        self.path_kind
    }

    pub fn settings(&self) -> RepositorySettings {
        *self
            .settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_settings(&self, settings: RepositorySettings) {
        *self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = settings;
    }

    pub fn is_disabled(&self) -> bool {
        self.settings().disabled
    }

    pub fn status(&self) -> RepositoryStatus {
        self.status_stamp().status
    }

    pub fn status_stamp(&self) -> StatusStamp {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records `status` and restarts the polling clock, even when unchanged.
    pub fn set_status(&self, status: RepositoryStatus) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = StatusStamp {
            status,
            updated_at: SystemTime::now(),
        };
    }

    pub fn revision_marks(&self) -> RevisionMarks {
        *self
            .revisions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn icon_key(&self) -> String {
        icon_key(self.kind, self.status())
    }

    /// Polling cadence in seconds for the given UI mode.
    pub fn interval_secs(&self, active_mode: bool, defaults: &IntervalDefaults) -> u32 {
        let settings = self.settings();
        let own = if active_mode {
            settings.active_interval
        } else {
            settings.idle_interval
        };
        u32::try_from(own).unwrap_or_else(|_| defaults.for_mode(active_mode))
    }

    pub fn next_check_at(&self, active_mode: bool, defaults: &IntervalDefaults) -> SystemTime {
        let interval = Duration::from_secs(u64::from(self.interval_secs(active_mode, defaults)));
        self.status_stamp().updated_at + interval
    }

    pub fn try_begin_operation(&self) -> Option<OperationGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| OperationGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn serialize(&self) -> String {
        let settings = self.settings();
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.kind.as_tag(),
            self.original_path,
            settings.active_interval,
            settings.idle_interval,
            if settings.disabled { "True" } else { "False" },
            self.path_kind.as_index()
        )
    }

    pub fn deserialize(record: &str) -> Result<Self, RecordError> {
        let fields: Vec<&str> = record.split(RECORD_SEPARATOR).collect();
        if fields.len() != RECORD_FIELDS {
            return Err(RecordError::FieldCount(fields.len()));
        }
        let kind = ScmKind::from_tag(fields[0])
            .ok_or_else(|| RecordError::UnknownBackend(fields[0].to_string()))?;
        let active_interval = parse_interval("active", fields[2])?;
        let idle_interval = parse_interval("idle", fields[3])?;
        let disabled = parse_flag(fields[4])?;
        let path_kind = fields[5]
            .trim()
            .parse()
            .ok()
            .and_then(PathKind::from_index)
            .ok_or_else(|| RecordError::PathKind(fields[5].to_string()))?;

        Ok(Self::new(kind, fields[1], path_kind).with_settings(RepositorySettings {
            active_interval,
            idle_interval,
            disabled,
        }))
    }

    /// Directory SCM commands run in; the parent for single-file entries.
    pub fn working_dir(&self) -> &Path {
        match self.path_kind {
            PathKind::File => self.path.parent().unwrap_or(&self.path),
            PathKind::Directory | PathKind::HeadDirectory => &self.path,
        }
    }

    /// Revision on the server; 0 when it cannot be determined.
    pub fn head_revision(
        &self,
        runner: &ProcessRunner,
        tools: &ToolPaths,
    ) -> Result<u64, RunnerError> {
        match self.kind {
            ScmKind::Svn => self.svn_revision(runner, tools, "HEAD"),
            ScmKind::Git => {
                git_backend::count_revisions(runner, &tools.git, self.working_dir(), "@{u}")
            }
        }
    }

    pub fn committed_revision(
        &self,
        runner: &ProcessRunner,
        tools: &ToolPaths,
    ) -> Result<u64, RunnerError> {
        match self.kind {
            ScmKind::Svn => self.svn_revision(runner, tools, "BASE"),
            ScmKind::Git => {
                git_backend::count_revisions(runner, &tools.git, self.working_dir(), "HEAD")
            }
        }
    }

    fn svn_revision(
        &self,
        runner: &ProcessRunner,
        tools: &ToolPaths,
        revision: &str,
    ) -> Result<u64, RunnerError> {
        let queried = svn_backend::query_revision(
            runner,
            &tools.svn,
            &self.path,
            self.working_dir(),
            revision,
        )?;
        Ok(queried.unwrap_or(0))
    }

    /// Runs the full backend probe without touching the stored status.
    ///
    /// Recoverable failures come back as [`RepositoryStatus::Error`]; only
    /// the fatal shutdown condition is returned as `Err`.
    pub fn get_status(
        &self,
        runner: &ProcessRunner,
        tools: &ToolPaths,
    ) -> Result<RepositoryStatus, RunnerError> {
        let probe = match self.kind {
            ScmKind::Svn => {
                svn_backend::probe_status(runner, &tools.svn, &self.path, self.working_dir())
            }
            ScmKind::Git => git_backend::probe_status(runner, &tools.git, self.working_dir()),
        };
        self.settle(runner, probe)
    }

    pub fn check_status(
        &self,
        runner: &ProcessRunner,
        tools: &ToolPaths,
    ) -> Result<CheckOutcome, RunnerError> {
        let Some(guard) = self.try_begin_operation() else {
            return Ok(CheckOutcome::Busy);
        };
        self.refresh_status(&guard, runner, tools).map(CheckOutcome::Checked)
    }

    /// Probes and stores the status while the caller holds this repository's guard.
    pub fn refresh_status(
        &self,
        _guard: &OperationGuard,
        runner: &ProcessRunner,
        tools: &ToolPaths,
    ) -> Result<RepositoryStatus, RunnerError> {
        let status = if runner.has_running_process(self.working_dir()) {
            debug!(path = %self.path.display(), "earlier scm process still running");
            RepositoryStatus::Error
        } else {
            self.get_status(runner, tools)?
        };
        let previous = self.status();
        self.set_status(status);
        if previous != status {
            info!(path = %self.path.display(), from = %previous, to = %status, "status changed");
        }
        Ok(status)
    }

    pub fn update(
        &self,
        runner: &ProcessRunner,
        tools: &ToolPaths,
        update_all: bool,
    ) -> Result<UpdateReport, RepositoryError> {
        let _guard = self
            .try_begin_operation()
            .ok_or_else(|| RepositoryError::Busy(self.path.clone()))?;
        if runner.has_running_process(self.working_dir()) {
            return Err(RepositoryError::Busy(self.path.clone()));
        }
        Ok(self.run_update(runner, tools, update_all)?)
    }

    /// Starts an update on a worker thread. Returns `false` if the
    /// repository already has an operation in flight.
    pub fn begin_update_silently(
        self: &Arc<Self>,
        runner: &ProcessRunner,
        tools: &ToolPaths,
    ) -> bool {
        let Some(guard) = self.try_begin_operation() else {
            return false;
        };
        if runner.has_running_process(self.working_dir()) {
            return false;
        }
        let repository = Arc::clone(self);
        let runner = runner.clone();
        let tools = tools.clone();
        thread::spawn(move || {
            let _guard = guard;
            if let Err(err) = repository.run_update(&runner, &tools, false) {
                warn!(
                    path = %repository.path.display(),
                    error = %err,
                    "background update failed"
                );
            }
        });
        true
    }

    pub fn commit(
        &self,
        runner: &ProcessRunner,
        tools: &ToolPaths,
    ) -> Result<(), RepositoryError> {
        self.launch_front_end(runner, tools, "commit", &[])
    }

    pub fn open_log_window(
        &self,
        runner: &ProcessRunner,
        tools: &ToolPaths,
    ) -> Result<(), RepositoryError> {
        self.launch_front_end(runner, tools, "log", &[])
    }

    /// Opens the log for revisions not yet reviewed, refreshing the marks first
    /// when `update_revisions` is set.
    pub fn open_change_log_window(
        &self,
        runner: &ProcessRunner,
        tools: &ToolPaths,
        update_revisions: bool,
    ) -> Result<(), RepositoryError> {
        if update_revisions {
            let head = self.head_revision(runner, tools)?;
            let committed = self.committed_revision(runner, tools)?;
            *self
                .revisions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = RevisionMarks {
                update_revision: head,
                reviewed_revision: committed,
            };
        }
        let marks = self.revision_marks();
        let range = if marks.update_revision > marks.reviewed_revision {
            vec![
                format!("/startrev:{}", marks.update_revision),
                format!("/endrev:{}", marks.reviewed_revision + 1),
            ]
        } else {
            Vec::new()
        };
        self.launch_front_end(runner, tools, "log", &range)
    }

    fn run_update(
        &self,
        runner: &ProcessRunner,
        tools: &ToolPaths,
        update_all: bool,
    ) -> Result<UpdateReport, RunnerError> {
        let (binary, args) = match self.kind {
            ScmKind::Svn => (&tools.svn, svn_backend::update_args(&self.path, update_all)),
            ScmKind::Git => (&tools.git, git_backend::update_args(update_all)),
        };
        info!(path = %self.path.display(), update_all, "updating working copy");
        let working_dir = self.working_dir();
        let process = match runner.execute(binary, working_dir, &args, Wait::Detached, false) {
            Ok(result) => result.handle.map(|handle| {
                let mut process = RepositoryProcess::new(
                    self.path.clone(),
                    working_dir.to_path_buf(),
                    handle,
                    CommandKind::Update,
                );
                runner.read_process_output(&mut process);
                process
            }),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                runner.errors().publish(&self.path, &err.to_string());
                None
            }
        };

        let mut timed_out = false;
        let (output, failed) = match process {
            Some(process) => {
                let failed = process.failed();
                if failed {
                    runner
                        .errors()
                        .publish(&self.path, &process.output.join("\n"));
                }
                timed_out = process.timed_out;
                (process.output, failed)
            }
            None => (Vec::new(), true),
        };
        // A runaway update still owns the working copy; probing now would overlap it.
        let status = if timed_out {
            RepositoryStatus::Error
        } else {
            self.get_status(runner, tools)?
        };
        self.set_status(status);
        Ok(UpdateReport {
            output,
            failed,
            status,
        })
    }

    fn launch_front_end(
        &self,
        runner: &ProcessRunner,
        tools: &ToolPaths,
        command: &str,
        extra: &[String],
    ) -> Result<(), RepositoryError> {
        let front_end = match self.kind {
            ScmKind::Svn => tools.svn_front_end.as_deref(),
            ScmKind::Git => tools.git_front_end.as_deref(),
        }
        .ok_or(RepositoryError::NoFrontEnd(self.kind))?;

        let mut args = vec![
            format!("/command:{command}"),
            format!("/path:{}", self.path.display()),
        ];
        args.extend_from_slice(extra);
        runner.execute(front_end, self.working_dir(), &args, Wait::Detached, false)?;
        Ok(())
    }

    fn settle(
        &self,
        runner: &ProcessRunner,
        probe: Result<RepositoryStatus, RunnerError>,
    ) -> Result<RepositoryStatus, RunnerError> {
        match probe {
            Ok(status) => Ok(status),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                runner.errors().publish(&self.path, &err.to_string());
                Ok(RepositoryStatus::Error)
            }
        }
    }
}

pub fn icon_key(kind: ScmKind, status: RepositoryStatus) -> String {
    format!("{}_FolderStatus_{}", kind.as_tag(), status.as_str())
}

/// Replaces a `%NAME%` token with the environment value of `NAME`.
pub fn expand_path_template(raw: &str) -> String {
    expand_path_template_with(raw, |name| std::env::var(name).ok())
}

/// As [`expand_path_template`], resolving names through `lookup`. Unknown
/// names leave the input untouched.
pub fn expand_path_template_with<F>(raw: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    let token = TOKEN.get_or_init(|| Regex::new(r"%([^%]+)%").expect("valid token regex"));

    let Some(caps) = token.captures(raw) else {
        return raw.to_string();
    };
    let name = caps[1].trim();
    if name.is_empty() {
        return raw.to_string();
    }
    match lookup(name) {
        Some(value) => raw.replacen(&caps[0], &value, 1),
        None => raw.to_string(),
    }
}

fn parse_interval(field: &'static str, value: &str) -> Result<i32, RecordError> {
    value.trim().parse().map_err(|_| RecordError::Interval {
        field,
        value: value.to_string(),
    })
}

fn parse_flag(value: &str) -> Result<bool, RecordError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(RecordError::Disabled(value.to_string())),
    }
}
