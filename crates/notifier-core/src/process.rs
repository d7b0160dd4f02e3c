use crate::error_channel::ErrorChannel;
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(600);
pub const TIMEOUT_MESSAGE: &str = "Process timed out";
/// STATUS_DLL_INIT_FAILED: child processes exit with this while Windows is shutting down.
pub const SHUTDOWN_EXIT_CODE: u32 = 0xC000_0142;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const IDLE_NICENESS: i32 = 19;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command} exited with the shutdown-in-progress status")]
    ShutdownInProgress { command: String },
}

impl RunnerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunnerError::ShutdownInProgress { .. })
    }
}

/// Outcome of an operation whose failure callers are allowed to discard.
#[derive(Debug)]
pub enum BestEffort {
    Done,
    Ignored(io::Error),
}

impl BestEffort {
    pub fn is_done(&self) -> bool {
        matches!(self, BestEffort::Done)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Wait {
    /// Drain output and wait for exit, bounded by the runner timeout.
    Blocking,
    /// Return right after spawning; output stays attached to the handle.
    Detached,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Shared handle on a spawned child. Cloning does not duplicate the process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    child: Arc<Mutex<Child>>,
}

impl ProcessHandle {
    fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Arc::new(Mutex::new(child)),
        }
    }

    pub fn id(&self) -> u32 {
        self.pid
    }

    pub fn kill(&self) -> BestEffort {
        let mut child = self.lock();
        match child.kill() {
            Ok(()) => {
                let _ = child.wait();
                BestEffort::Done
            }
            Err(err) => BestEffort::Ignored(err),
        }
    }

    pub fn try_exit_status(&self) -> io::Result<Option<ExitStatus>> {
        self.lock().try_wait()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.try_exit_status(), Ok(None))
    }

    fn same_process(&self, other: &ProcessHandle) -> bool {
        Arc::ptr_eq(&self.child, &other.child)
    }

    fn take_streams(&self) -> (Option<ChildStdout>, Option<ChildStderr>) {
        let mut child = self.lock();
        (child.stdout.take(), child.stderr.take())
    }

    fn lock(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Captured outcome of one external command.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Set while the process may still be running: detached or timed out runs.
    pub handle: Option<ProcessHandle>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ExecutionResult {
    fn detached(handle: ProcessHandle) -> Self {
        Self {
            handle: Some(handle),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            timed_out: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }
}

struct RunnerInner {
    errors: Arc<ErrorChannel>,
    timeout: Duration,
    background: Mutex<HashMap<PathBuf, Vec<ProcessHandle>>>,
}

/// Runs SCM executables with bounded waits and concurrent output draining.
///
/// Blocking runs are tracked per working directory until they finish, so a
/// runaway process left behind by a timeout can be killed later through
/// [`ProcessRunner::kill_background_process`].
#[derive(Clone)]
pub struct ProcessRunner {
    inner: Arc<RunnerInner>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(ErrorChannel::global())
    }
}

impl ProcessRunner {
    pub fn new(errors: Arc<ErrorChannel>) -> Self {
        Self::with_timeout(errors, EXECUTION_TIMEOUT)
    }

    pub fn with_timeout(errors: Arc<ErrorChannel>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                errors,
                timeout,
                background: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn errors(&self) -> &Arc<ErrorChannel> {
        &self.inner.errors
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn execute(
        &self,
        program: &str,
        working_dir: &Path,
        args: &[String],
        wait: Wait,
        low_priority: bool,
    ) -> Result<ExecutionResult, RunnerError> {
        debug!(program, path = %working_dir.display(), args = ?args, "starting scm command");
        let handle = spawn(program, working_dir, args)?;

        if low_priority && let BestEffort::Ignored(err) = lower_priority(handle.id()) {
            debug!(pid = handle.id(), error = %err, "could not lower process priority");
        }

        if wait == Wait::Detached {
            return Ok(ExecutionResult::detached(handle));
        }

        self.track(working_dir, &handle);
        let deadline = Instant::now() + self.inner.timeout;
        let mut stdout_lines = Vec::new();
        let mut stderr_lines = Vec::new();
        let drained = drain_streams(&handle, deadline, |stream, line| match stream {
            OutputStream::Stdout => stdout_lines.push(line),
            OutputStream::Stderr => stderr_lines.push(line),
        });
        let status = if drained {
            wait_for_exit(&handle, deadline)
        } else {
            None
        };

        let Some(status) = status else {
            let message = timeout_message(program, args);
            warn!(
                program,
                pid = handle.id(),
                path = %working_dir.display(),
                "scm command timed out"
            );
            self.inner.errors.publish(working_dir, &message);
            return Ok(ExecutionResult {
                handle: Some(handle),
                stdout: String::new(),
                stderr: message,
                exit_code: None,
                timed_out: true,
            });
        };
        self.untrack(working_dir, &handle);

        let stdout = stdout_lines.join("\n");
        let stderr = stderr_lines.join("\n");
        if !status.success() && !stderr.is_empty() {
            self.inner.errors.publish(working_dir, &stderr);
        }
        if is_shutdown_exit(status.code()) {
            error!(program, "system shutdown in progress; stopping");
            return Err(RunnerError::ShutdownInProgress {
                command: program.to_string(),
            });
        }

        Ok(ExecutionResult {
            handle: None,
            stdout,
            stderr,
            exit_code: status.code(),
            timed_out: false,
        })
    }

    /// Kills every tracked blocking process started in `working_dir`.
    pub fn kill_background_process(&self, working_dir: &Path) -> BestEffort {
        let handles = match self.inner.background.lock() {
            Ok(mut background) => background.remove(working_dir).unwrap_or_default(),
            Err(_) => return BestEffort::Done,
        };
        let mut outcome = BestEffort::Done;
        for handle in handles {
            if let BestEffort::Ignored(err) = handle.kill() {
                debug!(pid = handle.id(), error = %err, "kill ignored");
                outcome = BestEffort::Ignored(err);
            }
        }
        outcome
    }

    /// Kills everything still tracked; returns how many processes were signalled.
    pub fn kill_all_background_processes(&self) -> usize {
        let drained: Vec<ProcessHandle> = match self.inner.background.lock() {
            Ok(mut background) => background.drain().flat_map(|(_, handles)| handles).collect(),
            Err(_) => return 0,
        };
        let count = drained.len();
        for handle in drained {
            let _ = handle.kill();
        }
        if count > 0 {
            info!(count, "killed background scm processes");
        }
        count
    }

    pub fn tracked_processes(&self, working_dir: &Path) -> usize {
        self.inner
            .background
            .lock()
            .map(|background| background.get(working_dir).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Whether a tracked process in `working_dir` is still alive. Exited
    /// handles are dropped from tracking on the way.
    pub fn has_running_process(&self, working_dir: &Path) -> bool {
        let Ok(mut background) = self.inner.background.lock() else {
            return false;
        };
        let Some(handles) = background.get_mut(working_dir) else {
            return false;
        };
        handles.retain(ProcessHandle::is_running);
        if handles.is_empty() {
            background.remove(working_dir);
            return false;
        }
        true
    }

    pub(crate) fn track(&self, working_dir: &Path, handle: &ProcessHandle) {
        if let Ok(mut background) = self.inner.background.lock() {
            background
                .entry(working_dir.to_path_buf())
                .or_default()
                .push(handle.clone());
        }
    }

    pub(crate) fn untrack(&self, working_dir: &Path, handle: &ProcessHandle) {
        if let Ok(mut background) = self.inner.background.lock()
            && let Some(handles) = background.get_mut(working_dir)
        {
            handles.retain(|tracked| !tracked.same_process(handle));
            if handles.is_empty() {
                background.remove(working_dir);
            }
        }
    }
}

pub fn timeout_message(program: &str, args: &[String]) -> String {
    format!(
        "{TIMEOUT_MESSAGE}\nProcess: {program}\nArguments: {}",
        args.join(" ")
    )
}

fn is_shutdown_exit(code: Option<i32>) -> bool {
    code.is_some_and(|code| code as u32 == SHUTDOWN_EXIT_CODE)
}

fn spawn(program: &str, working_dir: &Path, args: &[String]) -> Result<ProcessHandle, RunnerError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in tool_environment() {
        command.env(key, value);
    }
    let child = command.spawn().map_err(|source| RunnerError::Spawn {
        command: program.to_string(),
        source,
    })?;
    Ok(ProcessHandle::new(child))
}

/// Variables every SCM child sees so POSIX-style ports find a home and a terminal type.
fn tool_environment() -> &'static [(String, String)] {
    static ENVIRONMENT: OnceLock<Vec<(String, String)>> = OnceLock::new();
    ENVIRONMENT.get_or_init(|| {
        let mut vars = Vec::new();
        if let Ok(profile) = std::env::var("USERPROFILE") {
            vars.push(("HOME".to_string(), profile));
        }
        vars.push(("TERM".to_string(), "msys".to_string()));
        vars
    })
}

#[cfg(unix)]
fn lower_priority(pid: u32) -> BestEffort {
    // SAFETY: setpriority only reads its scalar arguments.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, IDLE_NICENESS) };
    if rc == 0 {
        BestEffort::Done
    } else {
        BestEffort::Ignored(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn lower_priority(_pid: u32) -> BestEffort {
    let _ = IDLE_NICENESS;
    BestEffort::Ignored(io::Error::new(
        io::ErrorKind::Unsupported,
        "process priority is not adjustable on this platform",
    ))
}

enum StreamEvent {
    Line(OutputStream, String),
    Closed,
}

fn spawn_reader<R>(stream: OutputStream, reader: Option<R>, tx: Sender<StreamEvent>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        if let Some(reader) = reader {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf)
                            .trim_end_matches(['\r', '\n'])
                            .to_string();
                        if tx.send(StreamEvent::Line(stream, line)).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        debug!(stream = ?stream, error = %err, "output stream read failed");
                        break;
                    }
                }
            }
        }
        let _ = tx.send(StreamEvent::Closed);
    });
}

/// Reads stdout and stderr on two threads until both close or `deadline` passes.
///
/// Lines reach `on_line` in arrival order. Returns `false` on timeout.
pub(crate) fn drain_streams<F>(handle: &ProcessHandle, deadline: Instant, mut on_line: F) -> bool
where
    F: FnMut(OutputStream, String),
{
    let (stdout, stderr) = handle.take_streams();
    let (tx, rx) = mpsc::channel();
    spawn_reader(OutputStream::Stdout, stdout, tx.clone());
    spawn_reader(OutputStream::Stderr, stderr, tx);

    let mut open_streams = 2;
    while open_streams > 0 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(StreamEvent::Line(stream, line)) => on_line(stream, line),
            Ok(StreamEvent::Closed) => open_streams -= 1,
            Err(_) => return false,
        }
    }
    true
}

pub(crate) fn wait_for_exit(handle: &ProcessHandle, deadline: Instant) -> Option<ExitStatus> {
    loop {
        match handle.try_exit_status() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(err) => {
                warn!(pid = handle.id(), error = %err, "waiting for scm process failed");
                return None;
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}
