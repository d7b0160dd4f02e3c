use crate::process::{OutputStream, ProcessHandle, ProcessRunner, TIMEOUT_MESSAGE};
use crate::process::{drain_streams, wait_for_exit};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, warn};

/// Line prefixes that mean an update did not apply cleanly.
const UPDATE_ERROR_PREFIXES: [&str; 6] =
    ["C ", "CONFLICT", "svn", "Skipped ", "error:", "fatal:"];

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CommandKind {
    Update,
    Other,
}

/// A detached SCM process together with what it has printed so far.
#[derive(Debug)]
pub struct RepositoryProcess {
    pub repository: PathBuf,
    /// Key the runner tracks the child under while it runs.
    pub working_dir: PathBuf,
    pub handle: ProcessHandle,
    pub kind: CommandKind,
    pub output: Vec<String>,
    pub update_error: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl RepositoryProcess {
    pub fn new(
        repository: PathBuf,
        working_dir: PathBuf,
        handle: ProcessHandle,
        kind: CommandKind,
    ) -> Self {
        Self {
            repository,
            working_dir,
            handle,
            kind,
            output: Vec::new(),
            update_error: false,
            exit_code: None,
            timed_out: false,
        }
    }

    pub fn failed(&self) -> bool {
        self.update_error || self.timed_out
    }

    fn record_line(&mut self, stream: OutputStream, line: String) {
        if classify_line(self.kind, stream, &line) {
            self.update_error = true;
        }
        self.output.push(line);
    }
}

/// Decides whether one line of update output reports a problem.
///
/// Only update commands are classified. Anything on stderr counts; on stdout
/// a conflict marker, a tool-prefixed error or a skipped path does.
pub fn classify_line(kind: CommandKind, stream: OutputStream, line: &str) -> bool {
    if kind != CommandKind::Update {
        return false;
    }
    match stream {
        OutputStream::Stderr => true,
        OutputStream::Stdout => {
            line.len() > 1
                && UPDATE_ERROR_PREFIXES
                    .iter()
                    .any(|prefix| line.starts_with(prefix))
        }
    }
}

impl ProcessRunner {
    /// Drains a detached process into `process.output`, classifying as it goes.
    ///
    /// The child is tracked under `process.working_dir` while it runs and
    /// stays tracked if it outlives the runner timeout. Returns `false` on
    /// timeout.
    pub fn read_process_output(&self, process: &mut RepositoryProcess) -> bool {
        let deadline = Instant::now() + self.timeout();
        let handle = process.handle.clone();
        self.track(&process.working_dir, &handle);
        let drained = drain_streams(&handle, deadline, |stream, line| {
            process.record_line(stream, line)
        });
        let status = if drained {
            wait_for_exit(&handle, deadline)
        } else {
            None
        };
        let Some(status) = status else {
            warn!(
                path = %process.repository.display(),
                pid = handle.id(),
                "scm process did not finish in time"
            );
            process.output.push(TIMEOUT_MESSAGE.to_string());
            process.timed_out = true;
            return false;
        };
        self.untrack(&process.working_dir, &handle);
        process.exit_code = status.code();
        debug!(
            path = %process.repository.display(),
            lines = process.output.len(),
            update_error = process.update_error,
            "scm output drained"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_marker_flags_update() {
        assert!(classify_line(
            CommandKind::Update,
            OutputStream::Stdout,
            "C    src/main.c"
        ));
        assert!(classify_line(
            CommandKind::Update,
            OutputStream::Stdout,
            "CONFLICT (content): Merge conflict in README.md"
        ));
    }

    #[test]
    fn skipped_and_tool_errors_flag_update() {
        assert!(classify_line(
            CommandKind::Update,
            OutputStream::Stdout,
            "Skipped 'docs/old' -- Node remains in conflict"
        ));
        assert!(classify_line(
            CommandKind::Update,
            OutputStream::Stdout,
            "svn: E155004: Run 'svn cleanup' to remove locks"
        ));
    }

    #[test]
    fn informational_lines_pass() {
        for line in [
            "U    src/main.c",
            "Updated to revision 1042.",
            "Already up to date.",
            "C",
            "",
        ] {
            assert!(
                !classify_line(CommandKind::Update, OutputStream::Stdout, line),
                "{line}"
            );
        }
    }

    #[test]
    fn stderr_flags_only_update_commands() {
        assert!(classify_line(
            CommandKind::Update,
            OutputStream::Stderr,
            "warning: anything"
        ));
        assert!(!classify_line(
            CommandKind::Other,
            OutputStream::Stderr,
            "warning: anything"
        ));
        assert!(!classify_line(
            CommandKind::Other,
            OutputStream::Stdout,
            "C    src/main.c"
        ));
    }

    #[cfg(unix)]
    mod draining {
        use super::*;
        use crate::error_channel::ErrorChannel;
        use crate::process::Wait;
        use std::sync::Arc;
        use std::time::Duration;
        use tempfile::TempDir;

        fn start(runner: &ProcessRunner, dir: &TempDir, script: &str) -> ProcessHandle {
            runner
                .execute(
                    "sh",
                    dir.path(),
                    &["-c".to_string(), script.to_string()],
                    Wait::Detached,
                    false,
                )
                .unwrap()
                .handle
                .unwrap()
        }

        #[test]
        fn update_output_with_conflict_sets_error() {
            let tmp = TempDir::new().unwrap();
            let runner = ProcessRunner::new(Arc::new(ErrorChannel::new()));
            let handle = start(&runner, &tmp, "echo 'U    a.txt'; echo 'C    b.txt'");
            let mut process = RepositoryProcess::new(
                tmp.path().to_path_buf(),
                tmp.path().to_path_buf(),
                handle,
                CommandKind::Update,
            );

            assert!(runner.read_process_output(&mut process));
            assert_eq!(process.output, vec!["U    a.txt", "C    b.txt"]);
            assert!(process.update_error);
            assert_eq!(process.exit_code, Some(0));
        }

        #[test]
        fn clean_update_output_keeps_flag_clear() {
            let tmp = TempDir::new().unwrap();
            let runner = ProcessRunner::new(Arc::new(ErrorChannel::new()));
            let handle = start(&runner, &tmp, "echo 'Updated to revision 7.'");
            let mut process = RepositoryProcess::new(
                tmp.path().to_path_buf(),
                tmp.path().to_path_buf(),
                handle,
                CommandKind::Update,
            );

            assert!(runner.read_process_output(&mut process));
            assert!(!process.failed());
            assert_eq!(runner.tracked_processes(tmp.path()), 0);
        }

        #[test]
        fn stalled_output_times_out() {
            let tmp = TempDir::new().unwrap();
            let runner = ProcessRunner::with_timeout(
                Arc::new(ErrorChannel::new()),
                Duration::from_millis(150),
            );
            let handle = start(&runner, &tmp, "exec sleep 30");
            let mut process = RepositoryProcess::new(
                tmp.path().to_path_buf(),
                tmp.path().to_path_buf(),
                handle.clone(),
                CommandKind::Other,
            );

            assert!(!runner.read_process_output(&mut process));
            assert!(process.failed());
            assert_eq!(process.output.last().map(String::as_str), Some(TIMEOUT_MESSAGE));
            assert!(runner.has_running_process(tmp.path()));
            assert_eq!(runner.kill_all_background_processes(), 1);
            assert!(!handle.is_running());
        }
    }
}
