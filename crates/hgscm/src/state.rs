//! Staging lives only in memory inside the library; between CLI runs it is
//! kept in `.hg/hgscm/staged.json` as root-relative paths.
use std::path::{Path, PathBuf};

use hg::{GroupName, Repository};

use crate::error::CliError;

fn state_path(root: &Path) -> PathBuf {
    root.join(".hg").join("hgscm").join("staged.json")
}

pub fn load_staged(root: &Path) -> Result<Vec<PathBuf>, CliError> {
    let path = state_path(root);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = std::fs::read_to_string(&path)?;
    let relative: Vec<String> = serde_json::from_str(&contents)?;
    Ok(relative
        .iter()
        .map(|p| p.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part)))
        .collect())
}

pub fn save_staged(repo: &Repository) -> Result<(), CliError> {
    let root = repo.root();
    let relative: Vec<String> = repo
        .group(GroupName::Staging)
        .iter()
        .map(|r| r.path().to_string())
        .collect();

    let path = state_path(root);
    if relative.is_empty() {
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(&relative)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_state_is_empty() {
        let td = TempDir::new().unwrap();
        assert!(load_staged(td.path()).unwrap().is_empty());
    }

    #[test]
    fn state_paths_resolve_under_root() {
        let td = TempDir::new().unwrap();
        let path = state_path(td.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"["a.txt", "src/lib.rs"]"#).unwrap();

        assert_eq!(
            load_staged(td.path()).unwrap(),
            vec![
                td.path().join("a.txt"),
                td.path().join("src").join("lib.rs")
            ]
        );
    }

    #[test]
    fn corrupt_state_is_an_error() {
        let td = TempDir::new().unwrap();
        let path = state_path(td.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(load_staged(td.path()), Err(CliError::State(_))));
    }
}
