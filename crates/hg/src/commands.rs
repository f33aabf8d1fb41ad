//! Named commands on top of [`Repository`].
//!
//! Each entry says whether it needs an open repository. [`CommandRegistry::dispatch`]
//! refuses those before the handler runs, so handlers can assume one.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use thiserror::Error;

use crate::{
    classify::PartitionedResources,
    error::classify_result,
    repository::{MergeOutcome, PushOutcome, Repository, RepositoryError},
    runner::{HgRunner, PromptHandler, RunOptions},
};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("'{0}' needs an open hg repository")]
    RepositoryRequired(&'static str),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type CommandResult = Result<CommandOutput, CommandError>;

pub type CommandHandler = fn(CommandContext) -> BoxFuture<'static, CommandResult>;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandOutput {
    Groups { groups: PartitionedResources },
    Merge { outcome: MergeOutcome, groups: PartitionedResources },
    Push { outcome: PushOutcome },
    Text { text: String },
    Done { message: String },
}

impl CommandOutput {
    fn groups(groups: PartitionedResources) -> Self {
        Self::Groups { groups }
    }
}

/// Everything a handler may use.
#[derive(Clone)]
pub struct CommandContext {
    pub repository: Option<Arc<Repository>>,
    /// Where relative path arguments are resolved from.
    pub cwd: PathBuf,
    pub runner: HgRunner,
    pub args: Vec<String>,
    pub prompt: Option<Arc<dyn PromptHandler>>,
}

impl CommandContext {
    pub fn new(cwd: PathBuf, runner: HgRunner) -> Self {
        Self {
            repository: None,
            cwd,
            runner,
            args: Vec::new(),
            prompt: None,
        }
    }

    pub fn with_repository(mut self, repository: Arc<Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn PromptHandler>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    fn repository(&self) -> Result<Arc<Repository>, CommandError> {
        self.repository
            .clone()
            .ok_or(CommandError::RepositoryRequired("this command"))
    }

    fn paths(&self, usage: &'static str) -> Result<Vec<PathBuf>, CommandError> {
        if self.args.is_empty() {
            return Err(CommandError::Usage(usage));
        }
        Ok(self.args.iter().map(|a| self.resolve(a)).collect())
    }

    fn resolve(&self, arg: &str) -> PathBuf {
        let path = Path::new(arg);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }

    fn has_flag(&self, long: &str, short: &str) -> bool {
        self.args.iter().any(|a| a == long || a == short)
    }

    fn positional(&self) -> Vec<&str> {
        self.args
            .iter()
            .map(String::as_str)
            .filter(|a| !a.starts_with('-'))
            .collect()
    }
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("repository", &self.repository)
            .field("cwd", &self.cwd)
            .field("args", &self.args)
            .field("prompt", &self.prompt.is_some())
            .finish()
    }
}

#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub id: &'static str,
    pub requires_repository: bool,
    pub summary: &'static str,
    pub handler: CommandHandler,
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("id", &self.id)
            .field("requires_repository", &self.requires_repository)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, CommandSpec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in command.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for spec in BUILTIN {
            registry.register(*spec);
        }
        registry
    }

    /// Later registrations replace earlier ones with the same id.
    pub fn register(&mut self, spec: CommandSpec) {
        self.commands.insert(spec.id, spec);
    }

    pub fn get(&self, id: &str) -> Option<&CommandSpec> {
        self.commands.get(id)
    }

    pub fn specs(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.values()
    }

    pub async fn dispatch(&self, id: &str, ctx: CommandContext) -> CommandResult {
        let spec = self
            .get(id)
            .ok_or_else(|| CommandError::UnknownCommand(id.to_string()))?;
        if spec.requires_repository && ctx.repository.is_none() {
            return Err(CommandError::RepositoryRequired(spec.id));
        }
        tracing::debug!(command = spec.id, args = ?ctx.args, "Dispatching command");
        (spec.handler)(ctx).await
    }
}

const fn command(
    id: &'static str,
    requires_repository: bool,
    summary: &'static str,
    handler: CommandHandler,
) -> CommandSpec {
    CommandSpec {
        id,
        requires_repository,
        summary,
        handler,
    }
}

const BUILTIN: &[CommandSpec] = &[
    command("init", false, "Create a repository in the current directory", init),
    command("status", true, "Refresh and show the resource groups", status),
    command("stage", true, "Stage files, adding untracked ones", stage),
    command("unstage", true, "Move staged files back to working", unstage),
    command("commit", true, "Commit staged files, or everything", commit),
    command("add", true, "Track files", add),
    command("forget", true, "Stop tracking files", forget),
    command("remove", true, "Record missing files as removed", remove),
    command("revert", true, "Discard working changes", revert),
    command("update", true, "Update to a revision [--clean]", update),
    command("merge", true, "Merge another revision", merge),
    command("resolve", true, "Mark conflicted files resolved", resolve),
    command("unresolve", true, "Mark files unresolved again", unresolve),
    command("pull", true, "Pull changes", pull),
    command("push", true, "Push changes [--force]", push),
    command("rollback", true, "Undo the last transaction", rollback),
    command("branch", true, "Start a named branch", branch),
    command("bookmark", true, "Create a bookmark", bookmark),
    command("cat", true, "Print a file at a revision", cat),
];

fn init(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let target = ctx
            .positional()
            .first()
            .map(|p| ctx.resolve(p))
            .unwrap_or_else(|| ctx.cwd.clone());
        let target_arg = target.to_string_lossy().into_owned();
        let result = ctx
            .runner
            .run(&ctx.cwd, ["init", target_arg.as_str()], RunOptions::new())
            .await
            .map_err(RepositoryError::from)?;
        classify_result(result, "init").map_err(RepositoryError::from)?;
        Ok(CommandOutput::Done {
            message: format!("Initialized repository at {target_arg}"),
        })
    }
    .boxed()
}

fn status(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let repo = ctx.repository()?;
        Ok(CommandOutput::groups(repo.refresh().await?))
    }
    .boxed()
}

fn stage(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let paths = ctx.paths("stage <path>...")?;
        Ok(CommandOutput::groups(ctx.repository()?.stage(&paths).await?))
    }
    .boxed()
}

fn unstage(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let paths = ctx.paths("unstage <path>...")?;
        Ok(CommandOutput::groups(ctx.repository()?.unstage(&paths).await?))
    }
    .boxed()
}

fn commit(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let message = ctx.args.join(" ");
        if message.trim().is_empty() {
            return Err(CommandError::Usage("commit <message>"));
        }
        Ok(CommandOutput::groups(ctx.repository()?.commit(&message).await?))
    }
    .boxed()
}

fn add(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let paths = ctx.paths("add <path>...")?;
        Ok(CommandOutput::groups(ctx.repository()?.add(&paths).await?))
    }
    .boxed()
}

fn forget(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let paths = ctx.paths("forget <path>...")?;
        Ok(CommandOutput::groups(ctx.repository()?.forget(&paths).await?))
    }
    .boxed()
}

fn remove(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let paths = ctx.paths("remove <path>...")?;
        Ok(CommandOutput::groups(ctx.repository()?.remove(&paths).await?))
    }
    .boxed()
}

fn revert(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let paths = ctx.paths("revert <path>...")?;
        Ok(CommandOutput::groups(ctx.repository()?.revert(&paths).await?))
    }
    .boxed()
}

fn update(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let Some(rev) = ctx.positional().first().map(|r| r.to_string()) else {
            return Err(CommandError::Usage("update <rev> [--clean]"));
        };
        let clean = ctx.has_flag("--clean", "-C");
        let groups = ctx
            .repository()?
            .update(&rev, clean, ctx.prompt.clone())
            .await?;
        Ok(CommandOutput::groups(groups))
    }
    .boxed()
}

fn merge(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let rev = ctx.positional().first().map(|r| r.to_string());
        let (outcome, groups) = ctx
            .repository()?
            .merge(rev.as_deref(), ctx.prompt.clone())
            .await?;
        Ok(CommandOutput::Merge { outcome, groups })
    }
    .boxed()
}

fn resolve(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let paths = ctx.paths("resolve <path>...")?;
        Ok(CommandOutput::groups(
            ctx.repository()?.resolve_mark(&paths).await?,
        ))
    }
    .boxed()
}

fn unresolve(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let paths = ctx.paths("unresolve <path>...")?;
        Ok(CommandOutput::groups(
            ctx.repository()?.resolve_unmark(&paths).await?,
        ))
    }
    .boxed()
}

fn pull(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let source = ctx.positional().first().map(|s| s.to_string());
        Ok(CommandOutput::groups(
            ctx.repository()?.pull(source.as_deref()).await?,
        ))
    }
    .boxed()
}

fn push(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let dest = ctx.positional().first().map(|s| s.to_string());
        let force = ctx.has_flag("--force", "-f");
        let outcome = ctx.repository()?.push(dest.as_deref(), force).await?;
        Ok(CommandOutput::Push { outcome })
    }
    .boxed()
}

fn rollback(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move { Ok(CommandOutput::groups(ctx.repository()?.rollback().await?)) }.boxed()
}

fn branch(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let Some(name) = ctx.positional().first().map(|n| n.to_string()) else {
            return Err(CommandError::Usage("branch <name>"));
        };
        Ok(CommandOutput::groups(
            ctx.repository()?.create_branch(&name).await?,
        ))
    }
    .boxed()
}

fn bookmark(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let Some(name) = ctx.positional().first().map(|n| n.to_string()) else {
            return Err(CommandError::Usage("bookmark <name>"));
        };
        Ok(CommandOutput::groups(
            ctx.repository()?.create_bookmark(&name).await?,
        ))
    }
    .boxed()
}

fn cat(ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
    async move {
        let (rev, path) = match ctx.positional().as_slice() {
            [path] => (".".to_string(), ctx.resolve(path)),
            [rev, path] => (rev.to_string(), ctx.resolve(path)),
            _ => return Err(CommandError::Usage("cat [rev] <path>")),
        };
        let text = ctx.repository()?.cat(&rev, &path).await?;
        Ok(CommandOutput::Text { text })
    }
    .boxed()
}
