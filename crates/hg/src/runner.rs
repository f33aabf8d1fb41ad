//! Running the `hg` executable.
//!
//! Mercurial only talks to us through exit codes and unframed stdout/stderr
//! text. Some commands (merge, update) stop half way and wait for one line
//! on stdin, and the only sign of that is what the tail of stdout looks like.
//! [`HgRunner::run`] therefore reads stdout chunk by chunk and hands the
//! accumulated text to a [`PromptHandler`] whenever it ends like a question.
//!
//! The runner never interprets a failing exit code; that is the job of
//! [`crate::classify_result`].
use std::{
    collections::BTreeMap,
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{ChildStdin, ChildStdout, Command},
    task::JoinHandle,
};

/// Trailing stdout sequences that mean hg is waiting for an answer.
pub const PROMPT_SUFFIXES: [&str; 4] = ["? ", "?", ": ", ":"];

const READ_CHUNK: usize = 8 * 1024;

/// How much of the end of stdout goes into the "no handler" log line.
const TAIL_BYTES: usize = 512;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("`{program}` not found or not runnable")]
    NotAvailable { program: String },
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error while talking to hg: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything one hg invocation produced. Both streams are complete: the
/// protocol has no framing, so nothing is returned before the pipes close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Supplies answers to questions hg asks on stdout.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    /// `prompt` is all stdout seen so far, not only the last line.
    ///
    /// Returning `None` means no answer is available. Nothing is written and
    /// stdin is closed, so hg sees end of input and decides for itself.
    async fn respond(&self, prompt: &str) -> Option<String>;
}

/// Per-invocation options.
#[derive(Clone, Default)]
pub struct RunOptions {
    prompt: Option<Arc<dyn PromptHandler>>,
    disable_prompt_detection: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt(mut self, handler: Arc<dyn PromptHandler>) -> Self {
        self.prompt = Some(handler);
        self
    }

    pub fn with_optional_prompt(mut self, handler: Option<Arc<dyn PromptHandler>>) -> Self {
        self.prompt = handler;
        self
    }

    /// For commands whose payload may legitimately end in `:` or `?`,
    /// e.g. `hg cat` of an arbitrary file.
    pub fn without_prompt_detection(mut self) -> Self {
        self.disable_prompt_detection = true;
        self
    }

    fn detects_prompts(&self) -> bool {
        !self.disable_prompt_detection
    }

    fn interactive(&self) -> bool {
        self.detects_prompts() && self.prompt.is_some()
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("prompt", &self.prompt.is_some())
            .field("disable_prompt_detection", &self.disable_prompt_detection)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Program to spawn. Locating it is the caller's business.
    pub executable: PathBuf,
    /// Applied on top of the inherited environment for every invocation.
    pub env: BTreeMap<String, String>,
    /// A "still running" warning is logged once an invocation takes longer.
    pub slow_command_warning_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("hg"),
            env: default_env(),
            slow_command_warning_secs: 10,
        }
    }
}

impl RunnerConfig {
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn slow_command_warning(&self) -> Duration {
        Duration::from_secs(self.slow_command_warning_secs)
    }
}

/// Output patterns only hold for untranslated, unaliased hg.
fn default_env() -> BTreeMap<String, String> {
    [
        ("LC_ALL", "C"),
        ("LANG", "C"),
        ("HGPLAIN", "1"),
        ("HGENCODING", "utf-8"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// True when buffered stdout ends the way an hg question does.
pub fn looks_like_prompt(stdout: &str) -> bool {
    ends_like_prompt(stdout.as_bytes())
}

/// Byte-level form of [`looks_like_prompt`]. Only the last couple of bytes
/// are looked at, so the check costs the same however much output is
/// buffered.
fn ends_like_prompt(buffer: &[u8]) -> bool {
    PROMPT_SUFFIXES
        .iter()
        .any(|suffix| buffer.ends_with(suffix.as_bytes()))
}

#[derive(Debug, Clone, Default)]
pub struct HgRunner {
    config: Arc<RunnerConfig>,
}

impl HgRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `hg <args...>` in `cwd` and wait for it to finish.
    ///
    /// A non-zero exit code is not an error here; it comes back inside the
    /// [`ExecutionResult`]. `Err` means hg could not be run at all.
    pub async fn run<I, S>(
        &self,
        cwd: &Path,
        args: I,
        options: RunOptions,
    ) -> Result<ExecutionResult, RunError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        let argv: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let program = self.config.executable.to_string_lossy().into_owned();

        let mut cmd = Command::new(&self.config.executable);
        cmd.args(&args)
            .current_dir(cwd)
            .envs(&self.config.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Only interactive invocations get a stdin pipe; everyone else reads EOF.
        if options.interactive() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }

        tracing::trace!(repo = ?cwd, ?options, "Running hg command: {:?}", argv);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound && cwd.is_dir() {
                RunError::NotAvailable {
                    program: program.clone(),
                }
            } else {
                RunError::Spawn {
                    program: program.clone(),
                    source,
                }
            }
        })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("hg child has no stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("hg child has no stderr"))?;

        let _liveness = LivenessWarning::spawn(argv.clone(), self.config.slow_command_warning());

        // Exit status, stdout EOF and stderr EOF complete independently.
        let (status, stdout, stderr) = tokio::try_join!(
            async { child.wait().await.map_err(RunError::from) },
            pump_stdout(stdout, stdin, &options, &argv),
            async { read_all(stderr).await.map_err(RunError::from) },
        )?;

        let result = ExecutionResult {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        };

        tracing::debug!(
            args = ?argv,
            repo = ?cwd,
            exit_code = result.exit_code,
            duration_ms = started.elapsed().as_millis() as u64,
            "hg command finished"
        );

        Ok(result)
    }
}

/// Read stdout to EOF, answering prompts along the way.
///
/// Reading stops while the handler thinks; the next chunk is only read after
/// the answer has been written, so an answer can never be meant for output
/// that arrived after the question.
async fn pump_stdout(
    mut stdout: ChildStdout,
    mut stdin: Option<ChildStdin>,
    options: &RunOptions,
    args: &[String],
) -> Result<String, RunError> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let read = stdout.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);

        if !options.detects_prompts() {
            continue;
        }
        if !ends_like_prompt(&buffer) {
            continue;
        }

        let Some(handler) = options.prompt.as_ref() else {
            // Caller did not declare this command interactive; hg reads EOF.
            let recent = &buffer[buffer.len().saturating_sub(TAIL_BYTES)..];
            tracing::error!(
                ?args,
                tail = %tail(&String::from_utf8_lossy(recent)),
                "hg is waiting for input but no prompt handler was supplied"
            );
            continue;
        };

        let seen = String::from_utf8_lossy(&buffer);
        match handler.respond(&seen).await {
            Some(answer) => {
                let Some(pipe) = stdin.as_mut() else {
                    tracing::warn!(?args, "hg asked again after stdin was closed");
                    continue;
                };
                tracing::debug!(?args, "Answering hg prompt");
                let line = format!("{answer}\n");
                if let Err(err) = write_line(pipe, line.as_bytes()).await {
                    // hg may already have given up on the question.
                    tracing::debug!(?args, ?err, "Failed to write prompt answer");
                }
            }
            None => {
                tracing::debug!(?args, "No answer for hg prompt; closing stdin");
                stdin = None;
            }
        }
    }

    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

async fn write_line(pipe: &mut ChildStdin, line: &[u8]) -> std::io::Result<()> {
    pipe.write_all(line).await?;
    pipe.flush().await
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<String> {
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).await?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn tail(text: &str) -> &str {
    let start = text.trim_end().rfind('\n').map(|i| i + 1).unwrap_or(0);
    &text[start..]
}

/// Logs once if the command outlives `after`; never aborts it.
struct LivenessWarning(JoinHandle<()>);

impl LivenessWarning {
    fn spawn(args: Vec<String>, after: Duration) -> Self {
        Self(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            tracing::warn!(
                ?args,
                waited_secs = after.as_secs(),
                "hg command still running"
            );
        }))
    }
}

impl Drop for LivenessWarning {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_suffixes_are_detected() {
        assert!(looks_like_prompt("use (c)hanged version or (d)elete? "));
        assert!(looks_like_prompt("keep (l)ocal or take (o)ther?"));
        assert!(looks_like_prompt("enter a commit username: "));
        assert!(looks_like_prompt("password:"));
    }

    #[test]
    fn ordinary_output_is_not_a_prompt() {
        assert!(!looks_like_prompt(""));
        assert!(!looks_like_prompt("M a.txt\n"));
        assert!(!looks_like_prompt("parent: 0:abcdef\n"));
        assert!(!looks_like_prompt("question?\n"));
    }

    #[test]
    fn byte_check_ignores_invalid_utf8_before_the_question() {
        assert!(ends_like_prompt(b"\xff\xfe overwrite? "));
        assert!(ends_like_prompt(b"abort:"));
        assert!(!ends_like_prompt(b"binary \xff"));
        assert!(!ends_like_prompt(b""));
    }

    #[test]
    fn tail_returns_last_line() {
        assert_eq!(tail("merging a\nkeep (l)ocal? "), "keep (l)ocal? ");
        assert_eq!(tail("only line: "), "only line: ");
    }

    #[test]
    fn default_config_forces_plain_c_locale() {
        let config = RunnerConfig::default();
        assert_eq!(config.executable, PathBuf::from("hg"));
        assert_eq!(config.env.get("LC_ALL").map(String::as_str), Some("C"));
        assert_eq!(config.env.get("HGPLAIN").map(String::as_str), Some("1"));
        assert_eq!(config.slow_command_warning(), Duration::from_secs(10));
    }

    #[test]
    fn options_without_handler_are_not_interactive() {
        assert!(!RunOptions::new().interactive());
        assert!(RunOptions::new().detects_prompts());
        assert!(!RunOptions::new().without_prompt_detection().detects_prompts());
    }
}
