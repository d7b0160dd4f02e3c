use std::fmt;

/// State of a monitored working copy.
///
/// The `*Modified` variants mean the working copy has local uncommitted
/// changes on top of the base state.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub enum RepositoryStatus {
    #[default]
    Unknown,
    Error,
    NeedUpdate,
    NeedUpdateModified,
    UpToDate,
    UpToDateModified,
}

impl RepositoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryStatus::Unknown => "Unknown",
            RepositoryStatus::Error => "Error",
            RepositoryStatus::NeedUpdate => "NeedUpdate",
            RepositoryStatus::NeedUpdateModified => "NeedUpdate_Modified",
            RepositoryStatus::UpToDate => "UpToDate",
            RepositoryStatus::UpToDateModified => "UpToDate_Modified",
        }
    }

    /// Combines the two independent probe results into one status.
    pub fn from_probe(need_update: bool, modified: bool) -> Self {
        match (need_update, modified) {
            (true, true) => RepositoryStatus::NeedUpdateModified,
            (true, false) => RepositoryStatus::NeedUpdate,
            (false, true) => RepositoryStatus::UpToDateModified,
            (false, false) => RepositoryStatus::UpToDate,
        }
    }
}

impl fmt::Display for RepositoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
