#![cfg(unix)]
//! Repository commands against a shell script standing in for hg. The script
//! logs every argv it receives and prints canned status output.

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use hg::{GroupName, HgRunner, Repository, RunnerConfig, StatusCode};
use tempfile::TempDir;

const FAKE_HG: &str = r#"#!/bin/sh
printf '%s\n' "$*" >> "$FAKE_HG_LOG"
case "$1" in
  status) printf "$FAKE_HG_STATUS" ;;
  parents) printf "$FAKE_HG_PARENTS" ;;
esac
"#;

struct FakeHg {
    _dir: TempDir,
    root: PathBuf,
    log: PathBuf,
}

impl FakeHg {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap().join("repo");
        fs::create_dir_all(&root).unwrap();

        let script = dir.path().join("hg");
        fs::write(&script, FAKE_HG).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let log = dir.path().join("argv.log");
        Self {
            _dir: dir,
            root,
            log,
        }
    }

    /// `status` and `parents` are printf formats, so `\n` may be escaped.
    fn repository(&self, status: &str, parents: &str) -> Repository {
        let script = self.log.with_file_name("hg");
        let mut config = RunnerConfig::default().with_executable(script);
        for (key, value) in [
            ("FAKE_HG_LOG", self.log.to_string_lossy().into_owned()),
            ("FAKE_HG_STATUS", status.to_string()),
            ("FAKE_HG_PARENTS", parents.to_string()),
        ] {
            config.env.insert(key.to_string(), value);
        }
        Repository::with_root(self.root.clone(), HgRunner::new(config))
    }

    fn calls(&self, command: &str) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .filter(|line| line.split(' ').next() == Some(command))
            .map(str::to_string)
            .collect()
    }
}

fn paths(rel: &[&str]) -> Vec<PathBuf> {
    rel.iter().map(PathBuf::from).collect()
}

const RENAME_STATUS: &str = r"A new.txt\n  old.txt\nR old.txt\nM other.txt\n";
const ONE_PARENT: &str = r"1111\n";
const TWO_PARENTS: &str = r"1111\n2222\n";

#[tokio::test]
async fn staged_rename_commits_both_paths() {
    let fake = FakeHg::new();
    let repo = fake.repository(RENAME_STATUS, ONE_PARENT);

    let groups = repo.stage(&paths(&["new.txt"])).await.unwrap();
    assert_eq!(groups.staging.len(), 1);
    assert_eq!(groups.staging[0].status(), StatusCode::Renamed);

    repo.commit("msg").await.unwrap();

    assert_eq!(fake.calls("commit"), vec!["commit -m msg -- new.txt old.txt"]);
}

#[tokio::test]
async fn staged_plain_change_commits_only_itself() {
    let fake = FakeHg::new();
    let repo = fake.repository(RENAME_STATUS, ONE_PARENT);

    repo.stage(&paths(&["other.txt"])).await.unwrap();
    repo.commit("msg").await.unwrap();

    assert_eq!(fake.calls("commit"), vec!["commit -m msg -- other.txt"]);
}

#[tokio::test]
async fn reverting_a_rename_restores_its_source() {
    let fake = FakeHg::new();
    let repo = fake.repository(RENAME_STATUS, ONE_PARENT);

    repo.revert(&paths(&["new.txt"])).await.unwrap();

    assert_eq!(
        fake.calls("revert"),
        vec!["revert --no-backup -- new.txt old.txt"]
    );
}

#[tokio::test]
async fn merge_in_progress_commits_everything() {
    let fake = FakeHg::new();
    let repo = fake.repository(r"M other.txt\nM local.txt\n", TWO_PARENTS);
    repo.seed_staged([fake.root.join("local.txt")]);

    let groups = repo.refresh().await.unwrap();
    assert!(repo.in_merge());
    assert!(groups.staging.is_empty());
    assert_eq!(groups.merge.len(), 2);

    // Staging is refused mid-merge; the file stays with the merge.
    let groups = repo.stage(&paths(&["other.txt"])).await.unwrap();
    assert!(groups.staging.is_empty());
    assert_eq!(
        repo.resource(Path::new("other.txt")).unwrap().group,
        GroupName::Merge
    );

    repo.commit("merge").await.unwrap();
    assert_eq!(fake.calls("commit"), vec!["commit -m merge"]);
}

#[tokio::test]
async fn nothing_staged_commits_everything() {
    let fake = FakeHg::new();
    let repo = fake.repository(RENAME_STATUS, ONE_PARENT);

    repo.commit("all").await.unwrap();

    assert_eq!(fake.calls("commit"), vec!["commit -m all"]);
}
