use crate::config::IntervalDefaults;
use crate::registry::RepositoryRegistry;
use crate::repository::Repository;
use std::sync::Arc;
use std::time::SystemTime;

/// Delay returned when nothing is schedulable, so a caller's loop keeps a sane cadence.
pub const IDLE_DELAY_MS: u64 = 3000;

/// Decides when each repository is next due for a status check.
///
/// Holds no timer state: every answer is computed from the registry at call
/// time, so a status write is reflected on the next call. Disabled
/// repositories and repositories with an operation in flight are not
/// scheduled.
#[derive(Debug, Clone)]
pub struct StatusScheduler {
    registry: Arc<RepositoryRegistry>,
    defaults: IntervalDefaults,
}

impl StatusScheduler {
    pub fn new(registry: Arc<RepositoryRegistry>, defaults: IntervalDefaults) -> Self {
        Self { registry, defaults }
    }

    pub fn registry(&self) -> &Arc<RepositoryRegistry> {
        &self.registry
    }

    pub fn defaults(&self) -> IntervalDefaults {
        self.defaults
    }

    pub fn find_next_status_update_time_ms(&self, active_mode: bool) -> u64 {
        self.find_next_status_update_time_ms_at(active_mode, SystemTime::now())
    }

    /// Milliseconds until the earliest deadline; 0 as soon as one has passed.
    pub fn find_next_status_update_time_ms_at(&self, active_mode: bool, now: SystemTime) -> u64 {
        let mut earliest: Option<SystemTime> = None;
        for repo in self.registry.snapshot() {
            if !is_schedulable(&repo) {
                continue;
            }
            let due = repo.next_check_at(active_mode, &self.defaults);
            if due <= now {
                return 0;
            }
            earliest = Some(earliest.map_or(due, |current| current.min(due)));
        }

        match earliest {
            Some(due) => due
                .duration_since(now)
                .map(|gap| u64::try_from(gap.as_micros().div_ceil(1000)).unwrap_or(u64::MAX))
                .unwrap_or(0),
            None => IDLE_DELAY_MS,
        }
    }

    /// Repositories whose deadline has passed, in registry order.
    pub fn due_repositories(&self, active_mode: bool, now: SystemTime) -> Vec<Arc<Repository>> {
        self.registry
            .snapshot()
            .into_iter()
            .filter(|repo| {
                is_schedulable(repo) && repo.next_check_at(active_mode, &self.defaults) <= now
            })
            .collect()
    }
}

fn is_schedulable(repo: &Repository) -> bool {
    !repo.is_disabled() && !repo.is_busy()
}
