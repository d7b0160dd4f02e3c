use crate::config::{IntervalDefaults, ToolPaths};
use crate::process::{ProcessRunner, RunnerError};
use crate::registry::RepositoryRegistry;
use crate::repository::{OperationGuard, Repository};
use crate::scheduler::{IDLE_DELAY_MS, StatusScheduler};
use crate::status::RepositoryStatus;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ControlMessage {
    /// Host UI switched between active and idle cadence.
    SetActive(bool),
    /// Recompute due times now, e.g. after settings changed.
    Wake,
    Stop,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LoopExit {
    Stopped,
    /// A child reported that the system is shutting down.
    ShutdownInProgress,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub path: PathBuf,
    pub previous: RepositoryStatus,
    pub current: RepositoryStatus,
}

enum LoopEvent {
    Control(ControlMessage),
    Finished {
        path: PathBuf,
        previous: RepositoryStatus,
        result: Result<RepositoryStatus, RunnerError>,
    },
}

/// Cloneable remote control for a running [`StatusLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    tx: Sender<LoopEvent>,
}

impl LoopHandle {
    pub fn set_active(&self, active: bool) -> bool {
        self.send(ControlMessage::SetActive(active))
    }

    pub fn wake(&self) -> bool {
        self.send(ControlMessage::Wake)
    }

    pub fn stop(&self) -> bool {
        self.send(ControlMessage::Stop)
    }

    /// Returns `false` once the loop has exited.
    pub fn send(&self, message: ControlMessage) -> bool {
        self.tx.send(LoopEvent::Control(message)).is_ok()
    }
}

/// Polling loop: sleeps until the next deadline, then checks every due
/// repository on its own worker thread, at most `parallel_checks` at once.
pub struct StatusLoop {
    scheduler: StatusScheduler,
    runner: ProcessRunner,
    tools: ToolPaths,
    parallel_checks: usize,
    changes: Option<Sender<StatusChange>>,
    tx: Sender<LoopEvent>,
    rx: Receiver<LoopEvent>,
}

impl StatusLoop {
    pub fn new(
        registry: Arc<RepositoryRegistry>,
        runner: ProcessRunner,
        tools: ToolPaths,
        defaults: IntervalDefaults,
        parallel_checks: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            scheduler: StatusScheduler::new(registry, defaults),
            runner,
            tools,
            parallel_checks: parallel_checks.max(1),
            changes: None,
            tx,
            rx,
        }
    }

    /// Reports every completed check, changed or not.
    pub fn with_status_sender(mut self, changes: Sender<StatusChange>) -> Self {
        self.changes = Some(changes);
        self
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn run(self, active_mode: bool) -> LoopExit {
        let mut active = active_mode;
        let mut in_flight = 0usize;
        info!(
            repositories = self.scheduler.registry().len(),
            parallel = self.parallel_checks,
            "status loop started"
        );

        loop {
            let delay = if in_flight >= self.parallel_checks {
                IDLE_DELAY_MS
            } else {
                for repo in self.scheduler.due_repositories(active, SystemTime::now()) {
                    if in_flight >= self.parallel_checks {
                        break;
                    }
                    if let Some(guard) = repo.try_begin_operation() {
                        self.spawn_check(repo, guard);
                        in_flight += 1;
                    }
                }
                if in_flight >= self.parallel_checks {
                    IDLE_DELAY_MS
                } else {
                    self.scheduler.find_next_status_update_time_ms(active)
                }
            };

            match self.rx.recv_timeout(Duration::from_millis(delay)) {
                Ok(LoopEvent::Control(ControlMessage::Stop)) => {
                    info!("status loop stopping");
                    self.runner.kill_all_background_processes();
                    return LoopExit::Stopped;
                }
                Ok(LoopEvent::Control(ControlMessage::SetActive(mode))) => {
                    debug!(active = mode, "status loop mode changed");
                    active = mode;
                }
                Ok(LoopEvent::Control(ControlMessage::Wake)) => {}
                Ok(LoopEvent::Finished {
                    path,
                    previous,
                    result,
                }) => {
                    in_flight = in_flight.saturating_sub(1);
                    match result {
                        Ok(current) => self.report(StatusChange {
                            path,
                            previous,
                            current,
                        }),
                        Err(err) => {
                            error!(path = %path.display(), error = %err, "fatal scm condition");
                            self.runner.kill_all_background_processes();
                            return LoopExit::ShutdownInProgress;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return LoopExit::Stopped,
            }
        }
    }

    fn spawn_check(&self, repo: Arc<Repository>, guard: OperationGuard) {
        let runner = self.runner.clone();
        let tools = self.tools.clone();
        let tx = self.tx.clone();
        debug!(path = %repo.path().display(), "checking repository");
        thread::spawn(move || {
            let previous = repo.status();
            let result = repo.refresh_status(&guard, &runner, &tools);
            drop(guard);
            let _ = tx.send(LoopEvent::Finished {
                path: repo.path().to_path_buf(),
                previous,
                result,
            });
        });
    }

    fn report(&self, change: StatusChange) {
        if let Some(changes) = &self.changes
            && changes.send(change).is_err()
        {
            warn!("status listener went away");
        }
    }
}
