//! Console prompter.
//!
//! Lists the choices on stderr and reads the answer from stdin:
//! a number selects, `d` refuses access, an empty line or `n` dismisses.

use super::{PromptOutcome, Prompter};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

/// Interactive chooser on the terminal.
#[derive(Debug, Default)]
pub struct ConsolePrompter;

impl ConsolePrompter {
    /// Create a console prompter.
    pub fn new() -> Self {
        Self
    }
}

/// Interpret one answer line against `count` choices.
pub fn parse_answer(line: &str, count: usize) -> PromptOutcome {
    match line.trim() {
        "" | "n" | "N" => PromptOutcome::Cancelled,
        "d" | "D" => PromptOutcome::Denied,
        other => match other.parse::<usize>() {
            Ok(n) if (1..=count).contains(&n) => PromptOutcome::Selected(n - 1),
            _ => PromptOutcome::Cancelled,
        },
    }
}

#[async_trait]
impl Prompter for ConsolePrompter {
    async fn choose(&self, title: &str, choices: &[String]) -> PromptOutcome {
        eprintln!("{title}:");
        for (i, choice) in choices.iter().enumerate() {
            eprintln!("  {}) {}", i + 1, choice);
        }
        eprint!("Choice [1-{}, d = deny, Enter = cancel]: ", choices.len());

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(_) => parse_answer(&line, choices.len()),
            Err(e) => {
                warn!("Failed to read prompt answer: {}", e);
                PromptOutcome::Cancelled
            }
        }
    }
}
