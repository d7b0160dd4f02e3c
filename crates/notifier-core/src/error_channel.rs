use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::SystemTime;
use tracing::warn;

/// One execution failure published for whoever is listening.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub path: PathBuf,
    pub message: String,
    pub at: SystemTime,
}

/// Broadcast point for execution failures.
///
/// Publishing never blocks: each subscriber owns an unbounded receiver and
/// subscribers that dropped their receiver are pruned on the next publish.
#[derive(Default)]
pub struct ErrorChannel {
    subscribers: Mutex<Vec<Sender<ErrorEvent>>>,
}

impl ErrorChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide channel used when no explicit one is injected.
    pub fn global() -> Arc<ErrorChannel> {
        static GLOBAL: OnceLock<Arc<ErrorChannel>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ErrorChannel::new())))
    }

    pub fn subscribe(&self) -> Receiver<ErrorEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    pub fn publish(&self, path: &Path, message: &str) {
        warn!(path = %path.display(), error = %message, "scm command failed");
        let event = ErrorEvent {
            path: path.to_path_buf(),
            message: message.to_string(),
            at: SystemTime::now(),
        };
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}
