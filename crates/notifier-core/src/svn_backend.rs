use crate::process::{ProcessRunner, RunnerError, Wait};
use crate::status::RepositoryStatus;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// Status columns that mark a versioned item as locally changed.
const MODIFIED_ITEM_CODES: &[char] = &['A', 'C', 'D', 'M', 'R', '!', '~'];
const MODIFIED_PROPERTY_CODES: &[char] = &['C', 'M'];

pub fn is_working_copy(path: &Path) -> bool {
    path.join(".svn").is_dir() || path.join("_svn").is_dir()
}

pub fn info_args(target: &Path, revision: &str) -> Vec<String> {
    vec![
        "info".to_string(),
        "--non-interactive".to_string(),
        "--xml".to_string(),
        target.display().to_string(),
        "-r".to_string(),
        revision.to_string(),
    ]
}

pub fn status_args(target: &Path) -> Vec<String> {
    vec![
        "status".to_string(),
        "--non-interactive".to_string(),
        "--quiet".to_string(),
        target.display().to_string(),
    ]
}

pub fn update_args(target: &Path, update_all: bool) -> Vec<String> {
    let mut args = vec!["update".to_string(), "--non-interactive".to_string()];
    if !update_all {
        args.push("--ignore-externals".to_string());
    }
    args.push(target.display().to_string());
    args
}

/// Runs `info --xml` for `revision` and returns the revision it reports.
///
/// `None` when the command failed or timed out. Output from a successful run
/// that does not parse yields 0, which callers read as "unknown, not ahead".
pub fn query_revision(
    runner: &ProcessRunner,
    binary: &str,
    target: &Path,
    working_dir: &Path,
    revision: &str,
) -> Result<Option<u64>, RunnerError> {
    let result = runner.execute(
        binary,
        working_dir,
        &info_args(target, revision),
        Wait::Blocking,
        false,
    )?;
    if !result.succeeded() {
        return Ok(None);
    }
    let parsed = parse_info_revision(&result.stdout);
    if parsed.is_none() {
        debug!(path = %target.display(), revision, "unparseable info output; using revision 0");
    }
    Ok(Some(parsed.unwrap_or(0)))
}

/// Extracts the last-changed revision from `info --xml` output, falling
/// back to the entry revision when no commit element is present.
pub fn parse_info_revision(xml: &str) -> Option<u64> {
    static COMMIT: OnceLock<Regex> = OnceLock::new();
    static ANY: OnceLock<Regex> = OnceLock::new();
    let commit = COMMIT.get_or_init(|| {
        Regex::new(r#"<commit\s+revision\s*=\s*"(\d+)""#).expect("valid commit regex")
    });
    let any = ANY.get_or_init(|| Regex::new(r#"\brevision\s*=\s*"(\d+)""#).expect("valid regex"));

    commit
        .captures(xml)
        .or_else(|| any.captures(xml))
        .and_then(|caps| caps[1].parse().ok())
}

pub fn has_local_modifications(status_output: &str) -> bool {
    status_output.lines().any(|line| {
        let mut columns = line.chars();
        let item = columns.next();
        let property = columns.next();
        item.is_some_and(|code| MODIFIED_ITEM_CODES.contains(&code))
            || property.is_some_and(|code| MODIFIED_PROPERTY_CODES.contains(&code))
    })
}

pub fn probe_status(
    runner: &ProcessRunner,
    binary: &str,
    target: &Path,
    working_dir: &Path,
) -> Result<RepositoryStatus, RunnerError> {
    let status = runner.execute(binary, working_dir, &status_args(target), Wait::Blocking, true)?;
    if !status.succeeded() {
        return Ok(RepositoryStatus::Error);
    }
    let modified = has_local_modifications(&status.stdout);

    let Some(head) = query_revision(runner, binary, target, working_dir, "HEAD")? else {
        return Ok(RepositoryStatus::Error);
    };
    let Some(committed) = query_revision(runner, binary, target, working_dir, "BASE")? else {
        return Ok(RepositoryStatus::Error);
    };
    debug!(path = %target.display(), head, committed, modified, "svn probe");
    Ok(RepositoryStatus::from_probe(head > committed, modified))
}
