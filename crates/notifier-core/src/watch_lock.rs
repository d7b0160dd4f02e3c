use anyhow::Context;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Exclusive per-user lock held for the lifetime of a status loop.
///
/// The file body is the holder's pid, so a second instance can say who
/// is already polling.
#[derive(Debug)]
pub struct WatchLock {
    path: PathBuf,
    file: File,
}

impl WatchLock {
    pub fn try_acquire(path: &Path) -> anyhow::Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create lock directory")?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("open lock file {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                file.set_len(0).context("truncate lock file")?;
                file.seek(SeekFrom::Start(0)).context("rewind lock file")?;
                write!(file, "{}", std::process::id()).context("record lock holder")?;
                file.flush().context("flush lock file")?;
                Ok(Some(Self {
                    path: path.to_path_buf(),
                    file,
                }))
            }
            Err(err) if is_lock_held(&err) => Ok(None),
            Err(err) => Err(err).context("lock file exclusively"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WatchLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = self.file.unlock();
    }
}

/// Pid recorded by the current holder, if any.
pub fn lock_holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn is_lock_held(err: &std::io::Error) -> bool {
    if err.kind() == std::io::ErrorKind::WouldBlock {
        return true;
    }
    // ERROR_LOCK_VIOLATION on Windows.
    matches!(err.raw_os_error(), Some(33))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_watcher_is_refused() {
        let tmp = TempDir::new().unwrap();
        let lock_path = tmp.path().join("watch.lock");
        let first = WatchLock::try_acquire(&lock_path).unwrap();
        assert!(first.is_some());
        assert!(WatchLock::try_acquire(&lock_path).unwrap().is_none());
    }

    #[test]
    fn holder_pid_is_recorded_and_cleared() {
        let tmp = TempDir::new().unwrap();
        let lock_path = tmp.path().join("nested").join("watch.lock");
        let lock = WatchLock::try_acquire(&lock_path).unwrap().unwrap();
        assert_eq!(lock.path(), lock_path.as_path());
        assert_eq!(lock_holder(&lock_path), Some(std::process::id()));

        drop(lock);
        assert_eq!(lock_holder(&lock_path), None);
        assert!(WatchLock::try_acquire(&lock_path).unwrap().is_some());
    }
}
