use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runner::ExecutionResult;

/// Stable tag for every way an hg command is known to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthenticationFailed,
    NotARepository,
    UnmergedChanges,
    PushRejectedNewHead,
    FileNotFound,
    NameAlreadyExists,
    NoUndoAvailable,
    UntrackedFilesConflict,
    OperationRequiresForce,
    Unclassified,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::NotARepository => "not_a_repository",
            ErrorKind::UnmergedChanges => "unmerged_changes",
            ErrorKind::PushRejectedNewHead => "push_rejected_new_head",
            ErrorKind::FileNotFound => "file_not_found",
            ErrorKind::NameAlreadyExists => "name_already_exists",
            ErrorKind::NoUndoAvailable => "no_undo_available",
            ErrorKind::UntrackedFilesConflict => "untracked_files_conflict",
            ErrorKind::OperationRequiresForce => "operation_requires_force",
            ErrorKind::Unclassified => "unclassified",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed hg command. Built only by [`classify_result`].
#[derive(Debug, Clone, Error)]
pub enum HgError {
    #[error("hg {command}: authentication failed")]
    AuthenticationFailed {
        command: String,
        result: ExecutionResult,
    },
    #[error("hg {command}: not a Mercurial repository")]
    NotARepository {
        command: String,
        result: ExecutionResult,
    },
    #[error("hg {command}: there are unresolved merge changes")]
    UnmergedChanges {
        command: String,
        result: ExecutionResult,
    },
    #[error("hg {command}: push creates a new remote head")]
    PushRejectedNewHead {
        command: String,
        result: ExecutionResult,
    },
    #[error("hg {command}: file not found")]
    FileNotFound {
        command: String,
        result: ExecutionResult,
    },
    #[error("hg {command}: {} already exists", .name.as_deref().unwrap_or("name"))]
    NameAlreadyExists {
        command: String,
        name: Option<String>,
        result: ExecutionResult,
    },
    #[error("hg {command}: nothing to undo")]
    NoUndoAvailable {
        command: String,
        result: ExecutionResult,
    },
    #[error("hg {command}: untracked files would be overwritten: {}", .files.join(", "))]
    UntrackedFilesConflict {
        command: String,
        files: Vec<String>,
        result: ExecutionResult,
    },
    #[error("hg {command}: operation needs --force")]
    OperationRequiresForce {
        command: String,
        result: ExecutionResult,
    },
    #[error("hg {command} failed with exit code {}: {}", .result.exit_code, .result.stderr.trim())]
    Unclassified {
        command: String,
        result: ExecutionResult,
    },
}

impl HgError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HgError::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            HgError::NotARepository { .. } => ErrorKind::NotARepository,
            HgError::UnmergedChanges { .. } => ErrorKind::UnmergedChanges,
            HgError::PushRejectedNewHead { .. } => ErrorKind::PushRejectedNewHead,
            HgError::FileNotFound { .. } => ErrorKind::FileNotFound,
            HgError::NameAlreadyExists { .. } => ErrorKind::NameAlreadyExists,
            HgError::NoUndoAvailable { .. } => ErrorKind::NoUndoAvailable,
            HgError::UntrackedFilesConflict { .. } => ErrorKind::UntrackedFilesConflict,
            HgError::OperationRequiresForce { .. } => ErrorKind::OperationRequiresForce,
            HgError::Unclassified { .. } => ErrorKind::Unclassified,
        }
    }

    pub fn command(&self) -> &str {
        match self {
            HgError::AuthenticationFailed { command, .. }
            | HgError::NotARepository { command, .. }
            | HgError::UnmergedChanges { command, .. }
            | HgError::PushRejectedNewHead { command, .. }
            | HgError::FileNotFound { command, .. }
            | HgError::NameAlreadyExists { command, .. }
            | HgError::NoUndoAvailable { command, .. }
            | HgError::UntrackedFilesConflict { command, .. }
            | HgError::OperationRequiresForce { command, .. }
            | HgError::Unclassified { command, .. } => command,
        }
    }

    pub fn result(&self) -> &ExecutionResult {
        match self {
            HgError::AuthenticationFailed { result, .. }
            | HgError::NotARepository { result, .. }
            | HgError::UnmergedChanges { result, .. }
            | HgError::PushRejectedNewHead { result, .. }
            | HgError::FileNotFound { result, .. }
            | HgError::NameAlreadyExists { result, .. }
            | HgError::NoUndoAvailable { result, .. }
            | HgError::UntrackedFilesConflict { result, .. }
            | HgError::OperationRequiresForce { result, .. }
            | HgError::Unclassified { result, .. } => result,
        }
    }
}

/// Ordered stderr rules; the first match wins.
///
/// `PushRejectedNewHead` and `NameAlreadyExists` sit above
/// `OperationRequiresForce` because hg appends a "use -f to force" hint to
/// both of those messages.
pub const ERROR_PATTERNS: &[(ErrorKind, &str)] = &[
    (
        ErrorKind::AuthenticationFailed,
        r"(?i)authorization (?:failed|required)|authentication failed|http error 401|permission denied \(publickey",
    ),
    (
        ErrorKind::NotARepository,
        r"(?i)no repository found|there is no mercurial repository here|repository \S+ not found|is not a (?:valid )?mercurial repository",
    ),
    (
        ErrorKind::UntrackedFilesConflict,
        r"(?i)untracked files? in working director(?:y|ies) differs?",
    ),
    (
        ErrorKind::UnmergedChanges,
        r"(?i)outstanding uncommitted merge|unresolved merge conflicts|unfinished merge",
    ),
    (
        ErrorKind::PushRejectedNewHead,
        r"(?i)push creates new remote head",
    ),
    (ErrorKind::NameAlreadyExists, r"(?i)already exists"),
    (
        ErrorKind::NoUndoAvailable,
        r"(?i)no rollback information available|nothing to undo",
    ),
    (
        ErrorKind::FileNotFound,
        r"(?i)no such file|cannot follow nonexistent file|not found in manifest",
    ),
    (
        ErrorKind::OperationRequiresForce,
        r"(?i)use (?:\S+ )?-f to force|--force",
    ),
];

struct ErrorRule {
    kind: ErrorKind,
    pattern: Regex,
}

static ERROR_RULES: LazyLock<Vec<ErrorRule>> = LazyLock::new(|| {
    ERROR_PATTERNS
        .iter()
        .map(|(kind, pattern)| ErrorRule {
            kind: *kind,
            pattern: Regex::new(pattern).expect("valid error pattern"),
        })
        .collect()
});

static UNTRACKED_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(.+?): untracked file differs\s*$").expect("valid regex")
});

static EXISTING_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:branch|bookmark|tag) '([^']+)' already exists").expect("valid regex")
});

/// Kind of the first rule matching `stderr`.
pub fn error_kind_for(stderr: &str) -> ErrorKind {
    ERROR_RULES
        .iter()
        .find(|rule| rule.pattern.is_match(stderr))
        .map(|rule| rule.kind)
        .unwrap_or(ErrorKind::Unclassified)
}

/// Pass a successful result through; turn a failed one into an [`HgError`].
pub fn classify_result(result: ExecutionResult, command: &str) -> Result<ExecutionResult, HgError> {
    if result.success() {
        return Ok(result);
    }

    let command = command.to_string();
    let kind = error_kind_for(&result.stderr);
    tracing::debug!(
        %command,
        exit_code = result.exit_code,
        kind = %kind,
        "hg command failed"
    );

    Err(match kind {
        ErrorKind::AuthenticationFailed => HgError::AuthenticationFailed { command, result },
        ErrorKind::NotARepository => HgError::NotARepository { command, result },
        ErrorKind::UnmergedChanges => HgError::UnmergedChanges { command, result },
        ErrorKind::PushRejectedNewHead => HgError::PushRejectedNewHead { command, result },
        ErrorKind::FileNotFound => HgError::FileNotFound { command, result },
        ErrorKind::NameAlreadyExists => {
            let name = EXISTING_NAME
                .captures(&result.stderr)
                .map(|caps| caps[1].to_string());
            HgError::NameAlreadyExists {
                command,
                name,
                result,
            }
        }
        ErrorKind::NoUndoAvailable => HgError::NoUndoAvailable { command, result },
        ErrorKind::UntrackedFilesConflict => {
            let files = UNTRACKED_FILE
                .captures_iter(&result.stderr)
                .map(|caps| caps[1].trim().to_string())
                .collect();
            HgError::UntrackedFilesConflict {
                command,
                files,
                result,
            }
        }
        ErrorKind::OperationRequiresForce => HgError::OperationRequiresForce { command, result },
        ErrorKind::Unclassified => HgError::Unclassified { command, result },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> ExecutionResult {
        ExecutionResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn success_is_never_classified() {
        let ok = ExecutionResult {
            exit_code: 0,
            stdout: "done\n".to_string(),
            stderr: "abort: push creates new remote head\n".to_string(),
        };
        assert_eq!(classify_result(ok.clone(), "push").unwrap(), ok);
    }

    #[test]
    fn known_messages_map_to_kinds() {
        let cases = [
            (
                "abort: authorization failed\n",
                ErrorKind::AuthenticationFailed,
            ),
            (
                "abort: no repository found in '/tmp/x' (.hg not found)!\n",
                ErrorKind::NotARepository,
            ),
            (
                "abort: outstanding uncommitted merge\n",
                ErrorKind::UnmergedChanges,
            ),
            (
                "abort: unresolved merge conflicts (see 'hg help resolve')\n",
                ErrorKind::UnmergedChanges,
            ),
            (
                "abort: push creates new remote head 1a2b3c4d5e6f on branch 'default'\n(merge or see 'hg help push' for details about pushing new heads)\n",
                ErrorKind::PushRejectedNewHead,
            ),
            (
                "abort: a branch of the same name already exists\n(use 'hg update' to switch to it)\n",
                ErrorKind::NameAlreadyExists,
            ),
            (
                "no rollback information available\n",
                ErrorKind::NoUndoAvailable,
            ),
            (
                "missing.txt: No such file or directory\n",
                ErrorKind::FileNotFound,
            ),
            (
                "abort: uncommitted changes\n(use --force to discard)\n",
                ErrorKind::OperationRequiresForce,
            ),
            ("abort: something new\n", ErrorKind::Unclassified),
        ];
        for (stderr, expected) in cases {
            assert_eq!(error_kind_for(stderr), expected, "stderr: {stderr:?}");
        }
    }

    #[test]
    fn push_new_head_has_no_payload() {
        let err = classify_result(
            failed("abort: push creates new remote head 0123abcd!\n"),
            "push",
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PushRejectedNewHead);
        assert!(matches!(err, HgError::PushRejectedNewHead { .. }));
        assert_eq!(err.command(), "push");
    }

    #[test]
    fn older_push_hint_still_means_new_head() {
        // Older hg suggests forcing; the more specific rule must win.
        let stderr = "abort: push creates new remote head abc123!\n(did you forget to merge? use push -f to force)\n";
        assert_eq!(error_kind_for(stderr), ErrorKind::PushRejectedNewHead);
    }

    #[test]
    fn existing_bookmark_name_is_extracted() {
        let err = classify_result(
            failed("abort: bookmark 'feature' already exists (use -f to force)\n"),
            "bookmark",
        )
        .unwrap_err();
        match err {
            HgError::NameAlreadyExists { name, .. } => {
                assert_eq!(name.as_deref(), Some("feature"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn existing_branch_without_name_has_no_payload() {
        let err = classify_result(
            failed("abort: a branch of the same name already exists\n"),
            "branch",
        )
        .unwrap_err();
        assert!(matches!(err, HgError::NameAlreadyExists { name: None, .. }));
    }

    #[test]
    fn untracked_conflict_lists_files() {
        let stderr = "a.txt: untracked file differs\nsub/b.txt: untracked file differs\nabort: untracked files in working directory differ from files in requested revision\n";
        let err = classify_result(failed(stderr), "update").unwrap_err();
        match err {
            HgError::UntrackedFilesConflict { files, .. } => {
                assert_eq!(files, vec!["a.txt".to_string(), "sub/b.txt".to_string()])
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unclassified_keeps_raw_output() {
        let result = ExecutionResult {
            exit_code: 255,
            stdout: "partial\n".to_string(),
            stderr: "abort: kaboom\n".to_string(),
        };
        let err = classify_result(result.clone(), "summary").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unclassified);
        assert_eq!(err.result(), &result);
        assert_eq!(err.to_string(), "hg summary failed with exit code 255: abort: kaboom");
    }

    #[test]
    fn every_rule_compiles() {
        assert_eq!(ERROR_RULES.len(), ERROR_PATTERNS.len());
    }
}
