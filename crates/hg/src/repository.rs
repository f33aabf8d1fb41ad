use std::{
    collections::HashSet,
    path::{Component, Path, PathBuf},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::{
    classify::{
        ClassifiedResource, GroupName, PartitionedResources, StatusSnapshot, classify, identity_for,
    },
    error::{HgError, classify_result},
    groups::{GroupSet, GroupStore},
    runner::{ExecutionResult, HgRunner, PromptHandler, RunError, RunOptions},
    status::{parse_resolve_list, parse_status},
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Command(#[from] HgError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Path is outside the repository: {0}")]
    OutsideRepository(PathBuf),
    #[error("No changed file at {0}")]
    UnknownResource(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
    Pushed,
    NothingToPush,
}

/// Counts from the summary line `hg merge`/`hg update` print.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub updated: u32,
    pub merged: u32,
    pub removed: u32,
    pub unresolved: u32,
}

impl MergeOutcome {
    /// Parse "1 files updated, 0 files merged, 0 files removed, 2 files unresolved".
    pub fn parse(stdout: &str) -> Option<Self> {
        static SUMMARY: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
            Regex::new(
                r"(\d+) files? updated, (\d+) files? merged, (\d+) files? removed, (\d+) files? unresolved",
            )
            .expect("valid regex")
        });
        let caps = SUMMARY.captures(stdout)?;
        let n = |i: usize| caps[i].parse::<u32>().ok();
        Some(Self {
            updated: n(1)?,
            merged: n(2)?,
            removed: n(3)?,
            unresolved: n(4)?,
        })
    }
}

/// One Mercurial working copy and its resource groups.
///
/// Mutating commands hold `operation_lock`, so at most one of them runs per
/// repository. Refreshes do not take it; each one commits all groups at once
/// and the last to finish wins.
pub struct Repository {
    root: PathBuf,
    runner: HgRunner,
    groups: GroupStore,
    refresh_counter: AtomicU64,
    /// Whether the last refresh saw two working directory parents.
    in_merge: AtomicBool,
    seeded_staged: Mutex<HashSet<PathBuf>>,
    operation_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("root", &self.root)
            .field("version", &self.groups.version())
            .finish()
    }
}

impl Repository {
    /// Open the working copy containing `path`.
    pub async fn open(path: &Path, runner: HgRunner) -> Result<Self, RepositoryError> {
        let result = runner.run(path, ["root"], RunOptions::new()).await?;
        let result = classify_result(result, "root")?;
        let root = dunce::canonicalize(result.stdout.trim())?;
        tracing::debug!(root = %root.display(), "Opened hg repository");
        Ok(Self::with_root(root, runner))
    }

    /// Wrap an already known root without asking hg.
    pub fn with_root(root: PathBuf, runner: HgRunner) -> Self {
        Self {
            root,
            runner,
            groups: GroupStore::new(),
            refresh_counter: AtomicU64::new(0),
            in_merge: AtomicBool::new(false),
            seeded_staged: Mutex::new(HashSet::new()),
            operation_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn runner(&self) -> &HgRunner {
        &self.runner
    }

    pub fn groups(&self) -> GroupSet {
        self.groups.snapshot()
    }

    pub fn group(&self, name: GroupName) -> Vec<ClassifiedResource> {
        self.groups.group(name)
    }

    /// Look a resource up by path; relative paths are taken from the root.
    pub fn resource(&self, path: &Path) -> Option<ClassifiedResource> {
        self.groups.find(&self.identity(path))
    }

    /// Identities the next refresh should treat as staged, e.g. restored
    /// from a previous session.
    pub fn seed_staged<I>(&self, identities: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut seeded = self
            .seeded_staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        seeded.extend(identities);
    }

    /// Re-read status from hg and replace all five groups.
    pub async fn refresh(&self) -> Result<PartitionedResources, RepositoryError> {
        let snapshot = self.read_snapshot().await?;

        let seeded = std::mem::take(
            &mut *self
                .seeded_staged
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let mut staged = self.groups.staged_identities();
        staged.extend(seeded);

        let partitions = classify(&self.root, &snapshot, &staged, |path| path.exists());
        let version = self.groups.commit(partitions.clone());
        self.in_merge.store(snapshot.in_merge, Ordering::SeqCst);

        tracing::debug!(
            snapshot = snapshot.version,
            version,
            conflict = partitions.conflict.len(),
            staging = partitions.staging.len(),
            merge = partitions.merge.len(),
            working = partitions.working.len(),
            untracked = partitions.untracked.len(),
            "Refreshed hg status"
        );
        Ok(partitions)
    }

    async fn read_snapshot(&self) -> Result<StatusSnapshot, RepositoryError> {
        let version = self.refresh_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let (status, resolve, parents) = tokio::try_join!(
            self.exec("status", ["status", "-C"], RunOptions::new()),
            self.exec("resolve", ["resolve", "--list"], RunOptions::new()),
            self.exec("parents", ["parents", "-T", "{node}\n"], RunOptions::new()),
        )?;

        Ok(StatusSnapshot {
            version,
            records: parse_status(&status.stdout),
            merge: parse_resolve_list(&resolve.stdout),
            in_merge: parents.stdout.lines().filter(|l| !l.trim().is_empty()).count() > 1,
        })
    }

    /// Run any hg command in the repository root. Failures come back
    /// classified; nothing is refreshed.
    pub async fn run_raw(
        &self,
        args: &[String],
        prompt: Option<Arc<dyn PromptHandler>>,
    ) -> Result<ExecutionResult, RepositoryError> {
        let command = args.first().map(String::as_str).unwrap_or("hg");
        self.exec(command, args, RunOptions::new().with_optional_prompt(prompt))
            .await
    }

    /// Move changed files into the staging group.
    ///
    /// Untracked files are `hg add`ed first. Conflicted and merge files stay
    /// where they are; they have to be resolved instead.
    pub async fn stage(&self, paths: &[PathBuf]) -> Result<PartitionedResources, RepositoryError> {
        let _guard = self.operation_lock.lock().await;
        self.ensure_loaded().await?;

        let mut to_add = Vec::new();
        let mut to_move = Vec::new();
        for path in paths {
            let identity = self.identity(path);
            let resource = self
                .groups
                .find(&identity)
                .ok_or_else(|| RepositoryError::UnknownResource(identity.clone()))?;
            match resource.group {
                GroupName::Untracked => to_add.push(identity),
                GroupName::Working => to_move.push(identity),
                GroupName::Staging => {}
                GroupName::Conflict | GroupName::Merge => {
                    tracing::debug!(path = %resource.path(), group = %resource.group, "Not staging file")
                }
            }
        }

        if !to_move.is_empty() {
            self.groups.transaction(|set| {
                set.move_resources(
                    to_move.iter().map(PathBuf::as_path),
                    GroupName::Working,
                    GroupName::Staging,
                )
            });
        }

        if to_add.is_empty() {
            return Ok(self.groups.snapshot().to_partitions());
        }

        let mut args = vec!["add".to_string(), "--".to_string()];
        args.extend(self.relative_paths(&to_add)?);
        self.exec("add", &args, RunOptions::new()).await?;
        self.seed_staged(to_add);
        self.refresh().await
    }

    /// Move staged files back to the working group. No hg command runs.
    pub async fn unstage(&self, paths: &[PathBuf]) -> Result<PartitionedResources, RepositoryError> {
        let _guard = self.operation_lock.lock().await;
        self.ensure_loaded().await?;

        let identities: Vec<PathBuf> = paths.iter().map(|p| self.identity(p)).collect();
        let (_, moved) = self.groups.transaction(|set| {
            set.move_resources(
                identities.iter().map(PathBuf::as_path),
                GroupName::Staging,
                GroupName::Working,
            )
        });
        tracing::debug!(moved, "Unstaged files");
        Ok(self.groups.snapshot().to_partitions())
    }

    /// Commit the staged files, or every change when nothing is staged.
    ///
    /// A merge can only be committed as a whole, so while one is in progress
    /// no file arguments are passed.
    pub async fn commit(&self, message: &str) -> Result<PartitionedResources, RepositoryError> {
        let _guard = self.operation_lock.lock().await;
        self.ensure_loaded().await?;

        let staged: Vec<PathBuf> = self
            .groups
            .group(GroupName::Staging)
            .into_iter()
            .map(|r| r.identity)
            .collect();

        let mut args = vec!["commit".to_string(), "-m".to_string(), message.to_string()];
        if self.in_merge() {
            tracing::debug!(staged = staged.len(), "Committing the whole merge");
        } else if !staged.is_empty() {
            args.push("--".to_string());
            args.extend(self.relative_paths(&self.with_rename_sources(staged))?);
        }
        self.exec("commit", &args, RunOptions::new()).await?;
        self.refresh().await
    }

    pub async fn add(&self, paths: &[PathBuf]) -> Result<PartitionedResources, RepositoryError> {
        self.mutate_paths("add", &["add"], paths).await
    }

    pub async fn forget(&self, paths: &[PathBuf]) -> Result<PartitionedResources, RepositoryError> {
        self.mutate_paths("forget", &["forget"], paths).await
    }

    pub async fn remove(&self, paths: &[PathBuf]) -> Result<PartitionedResources, RepositoryError> {
        self.mutate_paths("remove", &["remove", "--after"], paths)
            .await
    }

    /// Discard working changes, without leaving `.orig` backups behind.
    /// Reverting a renamed file also restores its source.
    pub async fn revert(&self, paths: &[PathBuf]) -> Result<PartitionedResources, RepositoryError> {
        self.ensure_loaded().await?;
        let identities = paths.iter().map(|p| self.identity(p)).collect();
        self.mutate_identities(
            "revert",
            &["revert", "--no-backup"],
            self.with_rename_sources(identities),
        )
        .await
    }

    pub async fn resolve_mark(
        &self,
        paths: &[PathBuf],
    ) -> Result<PartitionedResources, RepositoryError> {
        self.mutate_paths("resolve", &["resolve", "--mark"], paths)
            .await
    }

    pub async fn resolve_unmark(
        &self,
        paths: &[PathBuf],
    ) -> Result<PartitionedResources, RepositoryError> {
        self.mutate_paths("resolve", &["resolve", "--unmark"], paths)
            .await
    }

    pub async fn update(
        &self,
        rev: &str,
        clean: bool,
        prompt: Option<Arc<dyn PromptHandler>>,
    ) -> Result<PartitionedResources, RepositoryError> {
        let mut args = interactive_args("update");
        if clean {
            args.push("--clean".to_string());
        }
        args.extend(["--rev".to_string(), rev.to_string()]);
        self.mutate("update", args, RunOptions::new().with_optional_prompt(prompt))
            .await
    }

    /// Merge `rev` (or the other head) into the working copy.
    ///
    /// Leaving files unresolved is a normal outcome, not an error: hg exits 1
    /// and the files show up in the conflict group.
    pub async fn merge(
        &self,
        rev: Option<&str>,
        prompt: Option<Arc<dyn PromptHandler>>,
    ) -> Result<(MergeOutcome, PartitionedResources), RepositoryError> {
        let _guard = self.operation_lock.lock().await;

        let mut args = interactive_args("merge");
        if let Some(rev) = rev {
            args.extend(["--rev".to_string(), rev.to_string()]);
        }
        let result = self
            .runner
            .run(&self.root, &args, RunOptions::new().with_optional_prompt(prompt))
            .await?;

        let outcome = match MergeOutcome::parse(&result.stdout) {
            Some(outcome) if result.exit_code == 1 && outcome.unresolved > 0 => outcome,
            _ => {
                let result = classify_result(result, "merge")?;
                MergeOutcome::parse(&result.stdout).unwrap_or_default()
            }
        };
        let partitions = self.refresh().await?;
        Ok((outcome, partitions))
    }

    pub async fn pull(&self, source: Option<&str>) -> Result<PartitionedResources, RepositoryError> {
        let mut args = vec!["pull".to_string()];
        args.extend(source.map(str::to_string));
        self.mutate("pull", args, RunOptions::new()).await
    }

    /// hg exits 1 with "no changes found" when there is nothing to push.
    pub async fn push(&self, dest: Option<&str>, force: bool) -> Result<PushOutcome, RepositoryError> {
        let _guard = self.operation_lock.lock().await;

        let mut args = vec!["push".to_string()];
        if force {
            args.push("--force".to_string());
        }
        args.extend(dest.map(str::to_string));

        let result = self.runner.run(&self.root, &args, RunOptions::new()).await?;
        let nothing = |text: &str| text.contains("no changes found");
        if result.exit_code == 1 && (nothing(&result.stdout) || nothing(&result.stderr)) {
            return Ok(PushOutcome::NothingToPush);
        }
        classify_result(result, "push")?;
        Ok(PushOutcome::Pushed)
    }

    pub async fn rollback(&self) -> Result<PartitionedResources, RepositoryError> {
        self.mutate("rollback", vec!["rollback".to_string()], RunOptions::new())
            .await
    }

    pub async fn create_branch(&self, name: &str) -> Result<PartitionedResources, RepositoryError> {
        self.mutate(
            "branch",
            vec!["branch".to_string(), name.to_string()],
            RunOptions::new(),
        )
        .await
    }

    pub async fn create_bookmark(
        &self,
        name: &str,
    ) -> Result<PartitionedResources, RepositoryError> {
        self.mutate(
            "bookmark",
            vec!["bookmark".to_string(), name.to_string()],
            RunOptions::new(),
        )
        .await
    }

    /// File contents at `rev`. Prompt detection is off because arbitrary
    /// content may end in `:` or `?`.
    pub async fn cat(&self, rev: &str, path: &Path) -> Result<String, RepositoryError> {
        let relative = self.relative_path(&self.identity(path))?;
        let result = self
            .exec(
                "cat",
                ["cat", "--rev", rev, "--", relative.as_str()],
                RunOptions::new().without_prompt_detection(),
            )
            .await?;
        Ok(result.stdout)
    }

    async fn mutate_paths(
        &self,
        command: &str,
        base: &[&str],
        paths: &[PathBuf],
    ) -> Result<PartitionedResources, RepositoryError> {
        let identities = paths.iter().map(|p| self.identity(p)).collect();
        self.mutate_identities(command, base, identities).await
    }

    async fn mutate_identities(
        &self,
        command: &str,
        base: &[&str],
        identities: Vec<PathBuf>,
    ) -> Result<PartitionedResources, RepositoryError> {
        let mut args: Vec<String> = base.iter().map(|s| s.to_string()).collect();
        args.push("--".to_string());
        args.extend(self.relative_paths(&identities)?);
        self.mutate(command, args, RunOptions::new()).await
    }

    async fn mutate(
        &self,
        command: &str,
        args: Vec<String>,
        options: RunOptions,
    ) -> Result<PartitionedResources, RepositoryError> {
        let _guard = self.operation_lock.lock().await;
        self.exec(command, &args, options).await?;
        self.refresh().await
    }

    async fn exec<I, S>(
        &self,
        command: &str,
        args: I,
        options: RunOptions,
    ) -> Result<ExecutionResult, RepositoryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let result = self.runner.run(&self.root, args, options).await?;
        Ok(classify_result(result, command)?)
    }

    /// A rename is a removal plus an add in hg; both halves have to travel
    /// together or the rename is recorded as a copy.
    fn with_rename_sources(&self, identities: Vec<PathBuf>) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(identities.len());
        for identity in identities {
            let source = self
                .groups
                .find(&identity)
                .and_then(|r| r.record.renamed_from)
                .map(|from| identity_for(&self.root, &from));
            for path in std::iter::once(identity).chain(source) {
                if seen.insert(path.clone()) {
                    out.push(path);
                }
            }
        }
        out
    }

    /// True when the last refresh found a merge in progress.
    pub fn in_merge(&self) -> bool {
        self.in_merge.load(Ordering::SeqCst)
    }

    async fn ensure_loaded(&self) -> Result<(), RepositoryError> {
        if self.groups.version() == 0 {
            self.refresh().await?;
        }
        Ok(())
    }

    fn identity(&self, path: &Path) -> PathBuf {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        normalize(&joined)
    }

    fn relative_path(&self, identity: &Path) -> Result<String, RepositoryError> {
        let relative = identity
            .strip_prefix(&self.root)
            .map_err(|_| RepositoryError::OutsideRepository(identity.to_path_buf()))?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            Ok(".".to_string())
        } else {
            Ok(parts.join("/"))
        }
    }

    fn relative_paths(&self, identities: &[PathBuf]) -> Result<Vec<String>, RepositoryError> {
        identities.iter().map(|i| self.relative_path(i)).collect()
    }
}

/// hg only asks questions when it believes someone is there to answer.
fn interactive_args(command: &str) -> Vec<String> {
    vec![
        "--config".to_string(),
        "ui.interactive=true".to_string(),
        command.to_string(),
    ]
}

/// Lexically drop `.` and resolve `..`; identities must compare equal
/// whatever spelling the caller used.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
