use super::*;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Config file plus the registry rebuilt from its records.
pub(super) struct Workspace {
    pub(super) config_path: PathBuf,
    pub(super) config: AppConfig,
    pub(super) registry: Arc<RepositoryRegistry>,
}

impl Workspace {
    pub(super) fn load(config_path: &Path) -> anyhow::Result<Self> {
        let config = AppConfig::load(config_path)
            .with_context(|| format!("load config {}", config_path.display()))?;
        let registry = Arc::new(RepositoryRegistry::from_records(&config.repositories));
        Ok(Self {
            config_path: config_path.to_path_buf(),
            config,
            registry,
        })
    }

    pub(super) fn save(&mut self) -> anyhow::Result<()> {
        self.config.repositories = self.registry.to_records();
        self.config.save(&self.config_path)
    }

    pub(super) fn repository(&self, index: usize) -> anyhow::Result<Arc<Repository>> {
        self.registry.get(index).with_context(|| {
            format!(
                "no repository at index {index} ({} configured)",
                self.registry.len()
            )
        })
    }

    /// The entry at `index`, or every enabled entry when none was given.
    pub(super) fn select(&self, index: Option<usize>) -> anyhow::Result<Vec<Arc<Repository>>> {
        match index {
            Some(index) => Ok(vec![self.repository(index)?]),
            None => Ok(self
                .registry
                .snapshot()
                .into_iter()
                .filter(|repo| !repo.is_disabled())
                .collect()),
        }
    }
}

pub(super) fn runner() -> ProcessRunner {
    ProcessRunner::new(ErrorChannel::global())
}

pub(super) fn format_time(at: std::time::SystemTime) -> String {
    if at == std::time::UNIX_EPOCH {
        return "never".to_string();
    }
    OffsetDateTime::from(at)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "-".to_string())
}

pub(super) fn format_interval(value: i32) -> String {
    if value < 0 {
        "default".to_string()
    } else {
        format!("{value}s")
    }
}
