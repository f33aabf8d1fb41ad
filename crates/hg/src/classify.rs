//! Partitioning parsed status into the five resource groups.
//!
//! hg has no notion of "staged": that membership is remembered from earlier
//! refreshes and passed in explicitly, which keeps [`classify`] a pure
//! function of its inputs.
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::status::{FileStatus, MergeState, StatusCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupName {
    Conflict,
    Staging,
    Merge,
    Working,
    Untracked,
}

impl GroupName {
    pub const ALL: [GroupName; 5] = [
        GroupName::Conflict,
        GroupName::Staging,
        GroupName::Merge,
        GroupName::Working,
        GroupName::Untracked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GroupName::Conflict => "conflict",
            GroupName::Staging => "staging",
            GroupName::Merge => "merge",
            GroupName::Working => "working",
            GroupName::Untracked => "untracked",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            GroupName::Conflict => 0,
            GroupName::Staging => 1,
            GroupName::Merge => 2,
            GroupName::Working => 3,
            GroupName::Untracked => 4,
        }
    }
}

impl std::fmt::Display for GroupName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status record placed in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedResource {
    /// Absolute path; the key used across refreshes.
    pub identity: PathBuf,
    #[serde(flatten)]
    pub record: FileStatus,
    pub group: GroupName,
    pub merge_state: MergeState,
}

impl ClassifiedResource {
    pub fn path(&self) -> &str {
        &self.record.path
    }

    pub fn status(&self) -> StatusCode {
        self.record.status
    }
}

/// Raw inputs of one refresh, in the order they were read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub version: u64,
    pub records: Vec<FileStatus>,
    pub merge: Vec<(String, MergeState)>,
    /// The working directory has two parents.
    pub in_merge: bool,
}

/// Output of [`classify`]: one list per group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartitionedResources {
    pub conflict: Vec<ClassifiedResource>,
    pub staging: Vec<ClassifiedResource>,
    pub merge: Vec<ClassifiedResource>,
    pub working: Vec<ClassifiedResource>,
    pub untracked: Vec<ClassifiedResource>,
}

impl PartitionedResources {
    pub fn group(&self, name: GroupName) -> &[ClassifiedResource] {
        match name {
            GroupName::Conflict => &self.conflict,
            GroupName::Staging => &self.staging,
            GroupName::Merge => &self.merge,
            GroupName::Working => &self.working,
            GroupName::Untracked => &self.untracked,
        }
    }

    pub fn group_mut(&mut self, name: GroupName) -> &mut Vec<ClassifiedResource> {
        match name {
            GroupName::Conflict => &mut self.conflict,
            GroupName::Staging => &mut self.staging,
            GroupName::Merge => &mut self.merge,
            GroupName::Working => &mut self.working,
            GroupName::Untracked => &mut self.untracked,
        }
    }

    pub fn len(&self) -> usize {
        GroupName::ALL.iter().map(|g| self.group(*g).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassifiedResource> {
        GroupName::ALL.into_iter().flat_map(|g| self.group(g).iter())
    }
}

/// Absolute identity of a repository-relative hg path.
pub fn identity_for(root: &Path, path: &str) -> PathBuf {
    path.split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

/// Group for one record, in precedence order: untracked, conflict, merge,
/// then staging or working depending on earlier staging.
///
/// While the working directory has two parents every tracked change is part
/// of the merge commit, resolved or not, so none of them can be staged.
pub fn group_for(
    status: StatusCode,
    merge_state: MergeState,
    in_merge: bool,
    previously_staged: bool,
) -> GroupName {
    if status == StatusCode::Untracked {
        GroupName::Untracked
    } else if status == StatusCode::Conflict || merge_state == MergeState::Unresolved {
        GroupName::Conflict
    } else if in_merge {
        GroupName::Merge
    } else if previously_staged {
        GroupName::Staging
    } else {
        GroupName::Working
    }
}

/// Partition a snapshot. Every path ends up in exactly one group.
///
/// Unresolved paths missing from the status report are clean files still
/// waiting for resolution; they get a synthesized record, `Conflict` when the
/// file is on disk (`exists`) and `Deleted` otherwise. That check is the only
/// place file system state stands in for hg output.
pub fn classify<F>(
    root: &Path,
    snapshot: &StatusSnapshot,
    previously_staged: &HashSet<PathBuf>,
    exists: F,
) -> PartitionedResources
where
    F: Fn(&Path) -> bool,
{
    let overlay: HashMap<&str, MergeState> = snapshot
        .merge
        .iter()
        .map(|(path, state)| (path.as_str(), *state))
        .collect();
    let reported: HashSet<&str> = snapshot.records.iter().map(|r| r.path.as_str()).collect();

    let synthesized = snapshot
        .merge
        .iter()
        .filter(|(path, state)| {
            *state == MergeState::Unresolved && !reported.contains(path.as_str())
        })
        .map(|(path, _)| {
            let status = if exists(&identity_for(root, path)) {
                StatusCode::Conflict
            } else {
                StatusCode::Deleted
            };
            FileStatus::new(path.clone(), status)
        })
        .collect::<Vec<_>>();

    let mut partitions = PartitionedResources::default();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    for record in snapshot.records.iter().cloned().chain(synthesized) {
        let identity = identity_for(root, &record.path);
        if !seen.insert(identity.clone()) {
            continue;
        }

        let overlay_state = overlay
            .get(record.path.as_str())
            .copied()
            .unwrap_or_default();
        let group = group_for(
            record.status,
            overlay_state,
            snapshot.in_merge,
            previously_staged.contains(&identity),
        );
        let merge_state = if group == GroupName::Untracked {
            MergeState::None
        } else {
            overlay_state
        };

        partitions.group_mut(group).push(ClassifiedResource {
            identity,
            record,
            group,
            merge_state,
        });
    }

    partitions
}
