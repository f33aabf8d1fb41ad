use std::io::IsTerminal;

use async_trait::async_trait;
use dialoguer::{Input, Password};
use hg::PromptHandler;

/// Answers hg questions on the controlling terminal.
pub struct TerminalPrompt;

#[async_trait]
impl PromptHandler for TerminalPrompt {
    async fn respond(&self, prompt: &str) -> Option<String> {
        if !std::io::stdin().is_terminal() {
            return None;
        }

        let question = last_line(prompt).to_string();
        let secret = question.to_lowercase().contains("password");
        let answer = tokio::task::spawn_blocking(move || {
            if secret {
                Password::new()
                    .with_prompt(question.trim_end_matches([' ', ':']))
                    .allow_empty_password(true)
                    .interact()
            } else {
                Input::<String>::new()
                    .with_prompt(question.trim_end())
                    .allow_empty(true)
                    .interact_text()
            }
        })
        .await;

        match answer {
            Ok(Ok(answer)) => Some(answer),
            Ok(Err(e)) => {
                tracing::debug!("Failed to read prompt answer: {}", e);
                None
            }
            Err(e) => {
                tracing::debug!("Prompt task failed: {}", e);
                None
            }
        }
    }
}

fn last_line(text: &str) -> &str {
    text.rsplit('\n').next().unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_question_line_is_shown() {
        assert_eq!(
            last_line("merging a.txt\nkeep (l)ocal or take (o)ther? "),
            "keep (l)ocal or take (o)ther? "
        );
        assert_eq!(last_line("password: "), "password: ");
    }
}
