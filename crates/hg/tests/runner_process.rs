#![cfg(unix)]
//! Runner behaviour against a shell script standing in for hg.

use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use hg::{HgRunner, PromptHandler, RunError, RunOptions, RunnerConfig};
use tempfile::TempDir;

fn sh() -> HgRunner {
    HgRunner::new(RunnerConfig::default().with_executable("/bin/sh"))
}

async fn script(dir: &Path, body: &str, options: RunOptions) -> hg::ExecutionResult {
    sh().run(dir, ["-c", body], options).await.unwrap()
}

struct Scripted {
    answer: Option<&'static str>,
    prompts: Mutex<Vec<String>>,
}

impl Scripted {
    fn new(answer: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            answer,
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PromptHandler for Scripted {
    async fn respond(&self, prompt: &str) -> Option<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answer.map(str::to_string)
    }
}

#[tokio::test]
async fn prompt_is_answered_once() {
    let td = TempDir::new().unwrap();
    let handler = Scripted::new(Some("yes"));
    let result = script(
        td.path(),
        "printf 'some question: '; read answer; printf 'got %s\\n' \"$answer\"",
        RunOptions::new().with_prompt(handler.clone()),
    )
    .await;

    assert!(result.success());
    assert_eq!(result.stdout, "some question: got yes\n");
    assert_eq!(handler.prompts(), vec!["some question: ".to_string()]);
}

#[tokio::test]
async fn handler_sees_all_output_so_far() {
    let td = TempDir::new().unwrap();
    let handler = Scripted::new(Some("l"));
    let result = script(
        td.path(),
        "printf 'merging a.txt\\nkeep (l)ocal or take (o)ther? '; read answer; echo \"[$answer]\"",
        RunOptions::new().with_prompt(handler.clone()),
    )
    .await;

    assert!(result.stdout.ends_with("[l]\n"));
    assert_eq!(
        handler.prompts(),
        vec!["merging a.txt\nkeep (l)ocal or take (o)ther? ".to_string()]
    );
}

#[tokio::test]
async fn declining_closes_stdin() {
    let td = TempDir::new().unwrap();
    let handler = Scripted::new(None);
    let result = script(
        td.path(),
        "printf 'password: '; if read answer; then echo \"answer=$answer\"; else echo eof; fi",
        RunOptions::new().with_prompt(handler.clone()),
    )
    .await;

    assert_eq!(result.stdout, "password: eof\n");
    assert_eq!(handler.prompts().len(), 1);
}

#[tokio::test]
async fn prompt_without_handler_reads_eof() {
    let td = TempDir::new().unwrap();
    let result = script(
        td.path(),
        "printf 'continue? '; read answer || echo eof",
        RunOptions::new(),
    )
    .await;

    assert!(result.success());
    assert_eq!(result.stdout, "continue? eof\n");
}

#[tokio::test]
async fn disabled_detection_never_calls_handler() {
    let td = TempDir::new().unwrap();
    let handler = Scripted::new(Some("unused"));
    let result = script(
        td.path(),
        "printf 'key: value:'",
        RunOptions::new()
            .with_prompt(handler.clone())
            .without_prompt_detection(),
    )
    .await;

    assert_eq!(result.stdout, "key: value:");
    assert!(handler.prompts().is_empty());
}

#[tokio::test]
async fn failing_exit_code_is_not_an_error() {
    let td = TempDir::new().unwrap();
    let result = script(
        td.path(),
        "echo partial; echo 'abort: broken' >&2; exit 3",
        RunOptions::new(),
    )
    .await;

    assert_eq!(result.exit_code, 3);
    assert!(!result.success());
    assert_eq!(result.stdout, "partial\n");
    assert_eq!(result.stderr, "abort: broken\n");
}

#[tokio::test]
async fn large_output_is_read_completely() {
    let td = TempDir::new().unwrap();
    let result = script(
        td.path(),
        "i=0; while [ $i -lt 5000 ]; do echo \"M file$i.txt\"; i=$((i+1)); done",
        RunOptions::new(),
    )
    .await;

    assert_eq!(result.stdout.lines().count(), 5000);
    assert!(result.stdout.ends_with("M file4999.txt\n"));
}

#[tokio::test]
async fn prompt_detection_stays_linear_on_large_output() {
    let td = TempDir::new().unwrap();
    let handler = Scripted::new(Some("unused"));
    let run = script(
        td.path(),
        "head -c 16000000 /dev/zero | tr '\\0' x",
        RunOptions::new().with_prompt(handler.clone()),
    );
    let result = tokio::time::timeout(Duration::from_secs(15), run)
        .await
        .expect("16 MB of output should be read well within the timeout");

    assert!(result.success());
    assert_eq!(result.stdout.len(), 16_000_000);
    assert!(result.stdout.bytes().all(|b| b == b'x'));
    assert!(handler.prompts().is_empty());
}

#[tokio::test]
async fn prompt_after_large_output_gets_full_text() {
    let td = TempDir::new().unwrap();
    let handler = Scripted::new(Some("y"));
    let result = script(
        td.path(),
        "head -c 100000 /dev/zero | tr '\\0' x; printf '\\nproceed? '; read answer; echo \"[$answer]\"",
        RunOptions::new().with_prompt(handler.clone()),
    )
    .await;

    assert!(result.stdout.ends_with("proceed? [y]\n"));
    let prompts = handler.prompts();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].len(), 100_000 + "\nproceed? ".len());
}

#[tokio::test]
async fn environment_is_forced_to_c_locale() {
    let td = TempDir::new().unwrap();
    let result = script(
        td.path(),
        "printf '%s %s %s' \"$LC_ALL\" \"$LANG\" \"$HGPLAIN\"",
        RunOptions::new(),
    )
    .await;

    assert_eq!(result.stdout, "C C 1");
}

#[tokio::test]
async fn runs_in_requested_directory() {
    let td = TempDir::new().unwrap();
    let result = script(td.path(), "pwd", RunOptions::new()).await;

    let reported = dunce::canonicalize(result.stdout.trim()).unwrap();
    assert_eq!(reported, dunce::canonicalize(td.path()).unwrap());
}

#[tokio::test]
async fn missing_executable_is_not_available() {
    let td = TempDir::new().unwrap();
    let runner = HgRunner::new(
        RunnerConfig::default().with_executable(td.path().join("no-such-hg")),
    );
    let err = runner
        .run(td.path(), ["status"], RunOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::NotAvailable { .. }), "{err}");
}

#[tokio::test]
async fn missing_directory_is_a_spawn_error() {
    let td = TempDir::new().unwrap();
    let err = sh()
        .run(&td.path().join("gone"), ["-c", "true"], RunOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Spawn { .. }), "{err}");
}
