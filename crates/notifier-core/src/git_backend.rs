use crate::process::{ProcessRunner, RunnerError, Wait};
use crate::status::RepositoryStatus;
use git2::Repository as GitRepository;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct BranchSummary {
    pub ahead: u32,
    pub behind: u32,
    pub modified: bool,
}

/// True when `path` itself is the top of a Git working tree.
pub fn is_repository_dir(path: &Path) -> bool {
    GitRepository::open(path).is_ok_and(|repo| !repo.is_bare())
}

pub fn fetch_args() -> Vec<String> {
    vec!["fetch".to_string(), "--quiet".to_string()]
}

pub fn status_args() -> Vec<String> {
    vec![
        "status".to_string(),
        "--porcelain=v1".to_string(),
        "--branch".to_string(),
    ]
}

pub fn update_args(update_all: bool) -> Vec<String> {
    let mut args = vec!["pull".to_string(), "--ff-only".to_string()];
    if update_all {
        args.push("--recurse-submodules".to_string());
    }
    args
}

fn rev_count_args(revision: &str) -> Vec<String> {
    vec![
        "rev-list".to_string(),
        "--count".to_string(),
        revision.to_string(),
    ]
}

/// Parses `status --porcelain=v1 --branch` output.
///
/// Untracked entries are not local modifications.
pub fn parse_porcelain(output: &str) -> BranchSummary {
    let mut summary = BranchSummary::default();
    for line in output.lines() {
        if let Some(header) = line.strip_prefix("## ") {
            if let Some(start) = header.find('[') {
                let tracking = header[start + 1..].trim_end_matches(']');
                for part in tracking.split(',').map(str::trim) {
                    if let Some(count) = part.strip_prefix("ahead ") {
                        summary.ahead = count.parse().unwrap_or(0);
                    } else if let Some(count) = part.strip_prefix("behind ") {
                        summary.behind = count.parse().unwrap_or(0);
                    }
                }
            }
            continue;
        }
        if line.len() > 2 && !line.starts_with("??") && !line.starts_with("!!") {
            summary.modified = true;
        }
    }
    summary
}

/// Commit count reachable from `revision`; 0 when git cannot answer.
pub fn count_revisions(
    runner: &ProcessRunner,
    binary: &str,
    working_dir: &Path,
    revision: &str,
) -> Result<u64, RunnerError> {
    let result = runner.execute(
        binary,
        working_dir,
        &rev_count_args(revision),
        Wait::Blocking,
        false,
    )?;
    if !result.succeeded() {
        return Ok(0);
    }
    Ok(result.stdout.trim().parse().unwrap_or(0))
}

pub fn probe_status(
    runner: &ProcessRunner,
    binary: &str,
    working_dir: &Path,
) -> Result<RepositoryStatus, RunnerError> {
    let fetch = runner.execute(binary, working_dir, &fetch_args(), Wait::Blocking, true)?;
    if !fetch.succeeded() {
        return Ok(RepositoryStatus::Error);
    }
    let status = runner.execute(binary, working_dir, &status_args(), Wait::Blocking, true)?;
    if !status.succeeded() {
        return Ok(RepositoryStatus::Error);
    }
    let summary = parse_porcelain(&status.stdout);
    debug!(
        path = %working_dir.display(),
        ahead = summary.ahead,
        behind = summary.behind,
        modified = summary.modified,
        "git probe"
    );
    Ok(RepositoryStatus::from_probe(
        summary.behind > 0,
        summary.modified,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn behind_branch_with_changes() {
        let output = "## main...origin/main [ahead 1, behind 3]\n M src/lib.rs\n?? notes.txt\n";
        assert_eq!(
            parse_porcelain(output),
            BranchSummary {
                ahead: 1,
                behind: 3,
                modified: true,
            }
        );
    }

    #[test]
    fn clean_tracking_branch() {
        let summary = parse_porcelain("## main...origin/main\n");
        assert_eq!(summary, BranchSummary::default());
    }

    #[test]
    fn untracked_files_are_not_modifications() {
        let summary = parse_porcelain("## main...origin/main [behind 2]\n?? build.log\n");
        assert_eq!(summary.behind, 2);
        assert!(!summary.modified);
    }

    #[test]
    fn detached_head_has_no_tracking() {
        let summary = parse_porcelain("## HEAD (no branch)\nA  new.rs\n");
        assert_eq!(summary.behind, 0);
        assert!(summary.modified);
    }

    #[test]
    fn repository_dir_requires_repo_root() {
        let tmp = TempDir::new().unwrap();
        assert!(!is_repository_dir(tmp.path()));

        GitRepository::init(tmp.path()).unwrap();
        assert!(is_repository_dir(tmp.path()));

        let nested = tmp.path().join("src");
        std::fs::create_dir(&nested).unwrap();
        assert!(!is_repository_dir(&nested));
    }

    #[test]
    fn pull_recurses_only_when_updating_all() {
        assert_eq!(update_args(false), vec!["pull", "--ff-only"]);
        assert!(update_args(true).contains(&"--recurse-submodules".to_string()));
    }
}
