pub mod config;
pub mod daemon;
pub mod error_channel;
pub mod error_log;
pub mod git_backend;
pub mod process;
pub mod process_output;
pub mod registry;
pub mod repository;
pub mod scheduler;
pub mod status;
pub mod svn_backend;
pub mod watch_lock;

#[cfg(all(test, unix))]
mod test_support;
