use crate::repository::Repository;
use crate::status::RepositoryStatus;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Ordered, thread-safe set of monitored repositories.
///
/// Entries are shared: callers hold `Arc<Repository>` clones and identity is
/// pointer identity.
#[derive(Debug, Default)]
pub struct RepositoryRegistry {
    repos: Mutex<Vec<Arc<Repository>>>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from persisted records, skipping lines that do not parse.
    pub fn from_records<I, S>(records: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let registry = Self::new();
        for record in records {
            let record = record.as_ref();
            match Repository::deserialize(record) {
                Ok(repo) => {
                    registry.add(Arc::new(repo));
                }
                Err(err) => warn!(record, error = %err, "skipping unreadable repository record"),
            }
        }
        registry
    }

    pub fn to_records(&self) -> Vec<String> {
        self.lock().iter().map(|repo| repo.serialize()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Appends `repo` and returns its index.
    pub fn add(&self, repo: Arc<Repository>) -> usize {
        let mut repos = self.lock();
        repos.push(repo);
        repos.len() - 1
    }

    /// Inserts at `index`, clamped to the end of the list.
    pub fn insert(&self, index: usize, repo: Arc<Repository>) {
        let mut repos = self.lock();
        let index = index.min(repos.len());
        repos.insert(index, repo);
    }

    pub fn get(&self, index: usize) -> Option<Arc<Repository>> {
        self.lock().get(index).cloned()
    }

    /// Replaces the entry at `index`, returning the previous one.
    pub fn set(&self, index: usize, repo: Arc<Repository>) -> Option<Arc<Repository>> {
        let mut repos = self.lock();
        let slot = repos.get_mut(index)?;
        Some(std::mem::replace(slot, repo))
    }

    pub fn remove_at(&self, index: usize) -> Option<Arc<Repository>> {
        let mut repos = self.lock();
        (index < repos.len()).then(|| repos.remove(index))
    }

    pub fn remove(&self, repo: &Arc<Repository>) -> bool {
        let mut repos = self.lock();
        match repos.iter().position(|entry| Arc::ptr_eq(entry, repo)) {
            Some(index) => {
                repos.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn index_of(&self, repo: &Arc<Repository>) -> Option<usize> {
        self.lock().iter().position(|entry| Arc::ptr_eq(entry, repo))
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.lock().iter().any(|repo| repo.path() == path)
    }

    /// True iff an enabled repository currently has exactly `status`.
    pub fn contains_status(&self, status: RepositoryStatus) -> bool {
        self.lock()
            .iter()
            .any(|repo| !repo.is_disabled() && repo.status() == status)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Point-in-time copy of the entries, for iterating without holding the lock.
    pub fn snapshot(&self) -> Vec<Arc<Repository>> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Repository>>> {
        self.repos.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{PathKind, RepositorySettings, ScmKind};
    use std::thread;

    fn repo(path: &str) -> Arc<Repository> {
        Arc::new(Repository::new(ScmKind::Git, path, PathKind::Directory))
    }

    #[test]
    fn keeps_insertion_order() {
        let registry = RepositoryRegistry::new();
        let a = repo("/a");
        let b = repo("/b");
        assert_eq!(registry.add(Arc::clone(&a)), 0);
        assert_eq!(registry.add(Arc::clone(&b)), 1);
        let c = repo("/c");
        registry.insert(1, Arc::clone(&c));

        assert_eq!(registry.index_of(&a), Some(0));
        assert_eq!(registry.index_of(&c), Some(1));
        assert_eq!(registry.index_of(&b), Some(2));
    }

    #[test]
    fn remove_by_index_and_value() {
        let registry = RepositoryRegistry::new();
        let a = repo("/a");
        let b = repo("/b");
        registry.add(Arc::clone(&a));
        registry.add(Arc::clone(&b));

        assert!(registry.remove(&a));
        assert!(!registry.remove(&a));
        let removed = registry.remove_at(0).unwrap();
        assert!(Arc::ptr_eq(&removed, &b));
        assert!(registry.remove_at(0).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn set_replaces_entry() {
        let registry = RepositoryRegistry::new();
        registry.add(repo("/a"));
        let previous = registry.set(0, repo("/b")).unwrap();
        assert_eq!(previous.path(), Path::new("/a"));
        assert!(registry.contains_path(Path::new("/b")));
        assert!(!registry.contains_path(Path::new("/a")));
        assert!(registry.set(5, repo("/c")).is_none());
    }

    #[test]
    fn contains_status_ignores_disabled() {
        let registry = RepositoryRegistry::new();
        let disabled = repo("/disabled");
        disabled.set_settings(RepositorySettings {
            disabled: true,
            ..RepositorySettings::default()
        });
        disabled.set_status(RepositoryStatus::Error);
        registry.add(Arc::clone(&disabled));

        assert!(!registry.contains_status(RepositoryStatus::Error));

        let enabled = repo("/enabled");
        enabled.set_status(RepositoryStatus::Error);
        registry.add(enabled);
        assert!(registry.contains_status(RepositoryStatus::Error));
        assert!(!registry.contains_status(RepositoryStatus::NeedUpdate));
    }

    #[test]
    fn records_round_trip_and_skip_garbage() {
        let registry = RepositoryRegistry::from_records([
            "Git|/src/app|-1|-1|False|0",
            "not a record",
            "SVN|/work/trunk|30|300|True|1",
        ]);
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.to_records(),
            vec!["Git|/src/app|-1|-1|False|0", "SVN|/work/trunk|30|300|True|1"]
        );
    }

    #[test]
    fn concurrent_mutation_is_safe() {
        let registry = Arc::new(RepositoryRegistry::new());
        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for item in 0..25 {
                        registry.add(repo(&format!("/w{worker}/{item}")));
                        let _ = registry.contains_status(RepositoryStatus::Unknown);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(registry.len(), 200);
    }
}
