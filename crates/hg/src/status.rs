//! Parsers for `hg status` and `hg resolve --list` output.
//!
//! Both are pure: no I/O, and the same text always yields the same records.
//! Lines the parser does not understand are skipped, never fatal, so a newer
//! hg printing an unknown keyword still produces a usable status.
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Modified,
    Added,
    Deleted,
    Conflict,
    Missing,
    Untracked,
    Renamed,
}

impl StatusCode {
    /// Single-letter form shown next to a path.
    pub fn letter(self) -> char {
        match self {
            StatusCode::Modified => 'M',
            StatusCode::Added => 'A',
            StatusCode::Deleted => 'D',
            StatusCode::Conflict => 'U',
            StatusCode::Missing => '!',
            StatusCode::Untracked => '?',
            StatusCode::Renamed => 'R',
        }
    }
}

/// Leading keyword of a status line and what it means.
///
/// hg itself prints the one-character codes; the long forms come from
/// extensions and wrappers that spell the state out.
pub const STATUS_KEYWORDS: &[(&str, StatusCode)] = &[
    ("M", StatusCode::Modified),
    ("MODIFIED", StatusCode::Modified),
    ("A", StatusCode::Added),
    ("ADDED", StatusCode::Added),
    ("R", StatusCode::Deleted),
    ("REMOVED", StatusCode::Deleted),
    ("!", StatusCode::Missing),
    ("MISSING", StatusCode::Missing),
    ("?", StatusCode::Untracked),
    ("UNKNOWN", StatusCode::Untracked),
    ("UNTRACKED", StatusCode::Untracked),
    ("EXTRA", StatusCode::Untracked),
    ("U", StatusCode::Conflict),
    ("CONFLICT", StatusCode::Conflict),
    ("UNRESOLVED", StatusCode::Conflict),
    ("RENAMED", StatusCode::Renamed),
];

const RENAME_ARROW: &str = " -> ";

pub fn status_for_keyword(keyword: &str) -> Option<StatusCode> {
    STATUS_KEYWORDS
        .iter()
        .find(|(k, _)| *k == keyword)
        .map(|(_, status)| *status)
}

/// One reported change. `path` is repository-relative with `/` separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileStatus {
    pub path: String,
    pub status: StatusCode,
    /// Old path of a rename; `path` is the new one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
}

impl FileStatus {
    pub fn new(path: impl Into<String>, status: StatusCode) -> Self {
        Self {
            path: path.into(),
            status,
            renamed_from: None,
        }
    }

    pub fn renamed(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            path: to.into(),
            status: StatusCode::Renamed,
            renamed_from: Some(from.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeState {
    #[default]
    None,
    Resolved,
    Unresolved,
}

/// Which report a list of bare paths came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeReportSource {
    Unresolved,
    Resolved,
}

impl MergeReportSource {
    fn state(self) -> MergeState {
        match self {
            MergeReportSource::Unresolved => MergeState::Unresolved,
            MergeReportSource::Resolved => MergeState::Resolved,
        }
    }
}

/// Parse `hg status -C` style output.
///
/// With `-C`, a copy prints `A new` followed by an indented `  old` line. When
/// `old` is also reported removed the pair is a rename and collapses into one
/// [`StatusCode::Renamed`] record; otherwise it stays a plain add.
pub fn parse_status(raw: &str) -> Vec<FileStatus> {
    let mut records: Vec<FileStatus> = Vec::new();
    let mut copies: Vec<(usize, String)> = Vec::new();

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with(char::is_whitespace) {
            if let Some(last) = records.last()
                && last.status == StatusCode::Added
            {
                copies.push((records.len() - 1, line.trim().to_string()));
            }
            continue;
        }

        let Some((keyword, rest)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let Some(status) = status_for_keyword(keyword) else {
            continue;
        };
        let path = rest.trim_start();
        if path.is_empty() {
            continue;
        }

        if status == StatusCode::Renamed {
            if let Some((from, to)) = path.split_once(RENAME_ARROW)
                && !from.trim().is_empty()
                && !to.trim().is_empty()
            {
                records.push(FileStatus::renamed(from.trim(), to.trim()));
            }
            continue;
        }

        records.push(FileStatus::new(path, status));
    }

    fold_renames(records, copies)
}

fn fold_renames(mut records: Vec<FileStatus>, copies: Vec<(usize, String)>) -> Vec<FileStatus> {
    if copies.is_empty() {
        return records;
    }

    let removed: HashSet<String> = records
        .iter()
        .filter(|r| r.status == StatusCode::Deleted)
        .map(|r| r.path.clone())
        .collect();

    let mut consumed = HashSet::new();
    for (index, source) in copies {
        if removed.contains(&source) {
            let record = &mut records[index];
            record.status = StatusCode::Renamed;
            record.renamed_from = Some(source.clone());
            consumed.insert(source);
        }
    }

    records.retain(|r| !(r.status == StatusCode::Deleted && consumed.contains(&r.path)));
    records
}

/// Parse a list of bare paths, all in the state implied by `source`.
pub fn parse_merge_report(raw: &str, source: MergeReportSource) -> Vec<(String, MergeState)> {
    raw.lines()
        .map(|line| line.trim_end_matches('\r').trim())
        .filter(|line| !line.is_empty())
        .map(|path| (path.to_string(), source.state()))
        .collect()
}

/// Parse `hg resolve --list`: `U path` is unresolved, `R path` resolved.
pub fn parse_resolve_list(raw: &str) -> Vec<(String, MergeState)> {
    let mut entries = Vec::new();
    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        let Some((tag, path)) = line.split_once(' ') else {
            continue;
        };
        let state = match tag {
            "U" => MergeState::Unresolved,
            "R" => MergeState::Resolved,
            _ => continue,
        };
        if !path.is_empty() {
            entries.push((path.to_string(), state));
        }
    }
    entries
}
