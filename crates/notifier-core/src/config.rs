use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_ACTIVE_INTERVAL_SECS: u32 = 60;
pub const DEFAULT_IDLE_INTERVAL_SECS: u32 = 600;
pub const DEFAULT_PARALLEL_CHECKS: usize = 4;

/// Global cadences used by repositories that do not set their own.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct IntervalDefaults {
    pub active_secs: u32,
    pub idle_secs: u32,
}

impl Default for IntervalDefaults {
    fn default() -> Self {
        Self {
            active_secs: DEFAULT_ACTIVE_INTERVAL_SECS,
            idle_secs: DEFAULT_IDLE_INTERVAL_SECS,
        }
    }
}

impl IntervalDefaults {
    pub fn for_mode(&self, active_mode: bool) -> u32 {
        if active_mode {
            self.active_secs
        } else {
            self.idle_secs
        }
    }
}

/// Executables the backends shell out to.
///
/// The front-ends are TortoiseSVN-style GUI programs taking
/// `/command:<name> /path:<path>` arguments; without one, commit and log
/// windows are unavailable.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ToolPaths {
    pub svn: String,
    pub git: String,
    #[serde(default)]
    pub svn_front_end: Option<String>,
    #[serde(default)]
    pub git_front_end: Option<String>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        if cfg!(target_os = "windows") {
            Self {
                svn: "svn.exe".to_string(),
                git: "git.exe".to_string(),
                svn_front_end: Some("TortoiseProc.exe".to_string()),
                git_front_end: Some("TortoiseGitProc.exe".to_string()),
            }
        } else {
            Self {
                svn: "svn".to_string(),
                git: "git".to_string(),
                svn_front_end: None,
                git_front_end: None,
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub intervals: IntervalDefaults,
    pub parallel_checks: usize,
    pub tools: ToolPaths,
    /// Persisted repository records, one pipe-delimited line each.
    pub repositories: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            intervals: IntervalDefaults::default(),
            parallel_checks: DEFAULT_PARALLEL_CHECKS,
            tools: ToolPaths::default(),
            repositories: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path).context("read config")?;
        let config = serde_json::from_str(&data).context("parse config")?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create config directory")?;
        }
        let data = serde_json::to_string_pretty(self).context("serialize config")?;
        fs::write(path, data).context("write config")?;
        Ok(())
    }
}

fn project_dirs() -> anyhow::Result<ProjectDirs> {
    ProjectDirs::from("com", "scm-notifier", "scm-notifier").context("resolve project dirs")
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.json"))
}

pub fn default_lock_path() -> anyhow::Result<PathBuf> {
    let project = project_dirs()?;
    Ok(project
        .runtime_dir()
        .unwrap_or(project.cache_dir())
        .join("watch.lock"))
}

pub fn default_error_log_dir() -> anyhow::Result<PathBuf> {
    Ok(project_dirs()?.data_local_dir().join("errors"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = AppConfig::load(&tmp.path().join("config.json")).unwrap();
        assert_eq!(config.intervals, IntervalDefaults::default());
        assert_eq!(config.parallel_checks, DEFAULT_PARALLEL_CHECKS);
        assert!(config.repositories.is_empty());
    }

    #[test]
    fn save_then_load_keeps_records() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.json");
        let config = AppConfig {
            intervals: IntervalDefaults {
                active_secs: 30,
                idle_secs: 900,
            },
            repositories: vec!["Git|/src/app|-1|-1|False|0".to_string()],
            ..AppConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.intervals.for_mode(true), 30);
        assert_eq!(loaded.intervals.for_mode(false), 900);
        assert_eq!(loaded.repositories, config.repositories);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"parallel_checks": 2}"#).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.parallel_checks, 2);
        assert_eq!(loaded.tools, ToolPaths::default());
    }
}
