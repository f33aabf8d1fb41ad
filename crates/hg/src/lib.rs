//! Working-copy status for Mercurial repositories, driven through the `hg`
//! command line.

mod classify;
mod commands;
mod error;
mod groups;
mod repository;
mod runner;
mod status;

pub use classify::{
    ClassifiedResource, GroupName, PartitionedResources, StatusSnapshot, classify, group_for,
    identity_for,
};
pub use commands::{
    CommandContext, CommandError, CommandHandler, CommandOutput, CommandRegistry, CommandResult,
    CommandSpec,
};
pub use error::{ERROR_PATTERNS, ErrorKind, HgError, classify_result, error_kind_for};
pub use groups::{GroupSet, GroupStore, ResourceGroup};
pub use repository::{MergeOutcome, PushOutcome, Repository, RepositoryError};
pub use runner::{
    ExecutionResult, HgRunner, PROMPT_SUFFIXES, PromptHandler, RunError, RunOptions, RunnerConfig,
    looks_like_prompt,
};
pub use status::{
    FileStatus, MergeReportSource, MergeState, STATUS_KEYWORDS, StatusCode, parse_merge_report,
    parse_resolve_list, parse_status, status_for_keyword,
};
