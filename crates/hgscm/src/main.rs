mod config;
mod error;
mod prompt;
mod render;
mod state;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use error::CliError;
use hg::{CommandContext, CommandOutput, CommandRegistry, HgRunner, Repository};
use prompt::TerminalPrompt;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hgscm")]
#[command(about = "Show and change the working copy of a Mercurial repository, grouped the way an editor's source control view groups it")]
#[command(version)]
struct Args {
    /// Command to run (see --list); defaults to status
    command: Option<String>,

    /// Arguments passed to the command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Repository directory (defaults to the current directory)
    #[arg(long, env = "HGSCM_REPO")]
    repo: Option<PathBuf>,

    /// hg executable to run
    #[arg(long, env = "HGSCM_HG")]
    hg: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    /// List available commands
    #[arg(long, default_value_t = false)]
    list: bool,

    /// Enable verbose output
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!("Args: {:?}", args);

    let registry = CommandRegistry::builtin();
    if args.list {
        for spec in registry.specs() {
            println!("{:<10} {}", spec.id, spec.summary);
        }
        return Ok(());
    }

    let json = args.json;
    let output = run(&registry, args).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print!("{}", render::render_text(&output));
    }
    Ok(())
}

async fn run(registry: &CommandRegistry, args: Args) -> Result<CommandOutput> {
    let config = config::Config::load();
    let runner = HgRunner::new(config.runner_config(args.hg));

    let cwd = match args.repo {
        Some(repo) => repo,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let command = args.command.unwrap_or_else(|| "status".to_string());

    let mut ctx = CommandContext::new(cwd.clone(), runner.clone())
        .with_args(args.args)
        .with_prompt(Arc::new(TerminalPrompt));

    let needs_repository = registry
        .get(&command)
        .is_some_and(|spec| spec.requires_repository);
    let repository = if needs_repository {
        let repository = Arc::new(Repository::open(&cwd, runner).await.map_err(CliError::from)?);
        repository.seed_staged(state::load_staged(repository.root())?);
        ctx = ctx.with_repository(repository.clone());
        Some(repository)
    } else {
        None
    };

    let output = registry
        .dispatch(&command, ctx)
        .await
        .map_err(CliError::from)?;

    // Commands that never refreshed (push, cat) leave the saved state alone.
    if let Some(repository) = repository
        && repository.groups().version() > 0
    {
        state::save_staged(&repository)?;
    }
    Ok(output)
}
