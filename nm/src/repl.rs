//! Interactive REPL

use colored::Colorize;
use eyre::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::session::Session;
use crate::turn::TurnObserver;

/// Interactive chat over a session
pub struct ReplSession {
    session: Session,
}

enum SlashResult {
    Continue,
    Quit,
}

impl ReplSession {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Run until /quit or Ctrl+D
    pub async fn run(&mut self, initial: Option<String>) -> Result<()> {
        println!(
            "{} session {} — /quit to exit, /status and /tasks to inspect",
            "nuum".bold(),
            self.session.session_id().dimmed()
        );

        if let Some(task) = initial {
            println!("{} {}", ">".bright_green(), task);
            self.process(&task).await?;
        }

        let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("readline init failed: {e}"))?;

        loop {
            match rl.readline(&format!("{} ", ">".bright_green())) {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(input);

                    if input.starts_with('/') {
                        match self.handle_slash(input) {
                            SlashResult::Continue => continue,
                            SlashResult::Quit => break,
                        }
                    }
                    self.process(input).await?;
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(e) => return Err(eyre::eyre!("readline error: {e}")),
            }
        }

        println!("Goodbye.");
        Ok(())
    }

    async fn process(&mut self, input: &str) -> Result<()> {
        let mut observer = TurnObserver {
            on_thinking: Some(Box::new(|| {
                println!("{}", "…thinking".dimmed());
            })),
            on_assistant_text: Some(Box::new(|text| {
                println!("{text}");
            })),
            on_tool_result: Some(Box::new(|name, outcome| {
                let mark = if outcome.is_error { "✗".red() } else { "✓".green() };
                println!("{} {} {}", mark, name.cyan(), summarize(&outcome.output).dimmed());
            })),
            ..TurnObserver::default()
        };

        match self.session.run_prompt(input, &mut observer).await {
            Ok(result) => {
                println!(
                    "{}",
                    format!(
                        "[{} | {} turns | {} in / {} out]",
                        result.stop_reason,
                        result.num_turns,
                        result.usage.prompt_tokens,
                        result.usage.completion_tokens
                    )
                    .dimmed()
                );
            }
            Err(e) => println!("{} {e}", "error:".red()),
        }
        Ok(())
    }

    fn handle_slash(&mut self, input: &str) -> SlashResult {
        match input {
            "/quit" | "/exit" | "/q" => SlashResult::Quit,
            "/status" => {
                match self.session.store().present().get() {
                    Ok(snapshot) => print!("{}", snapshot.render()),
                    Err(e) => println!("{} {e}", "error:".red()),
                }
                SlashResult::Continue
            }
            "/tasks" => {
                match self.session.scheduler().list(None) {
                    Ok(tasks) if tasks.is_empty() => println!("No background tasks."),
                    Ok(tasks) => {
                        for task in tasks {
                            println!("{} [{}] {}: {}", task.id, task.status, task.kind, task.description);
                        }
                    }
                    Err(e) => println!("{} {e}", "error:".red()),
                }
                SlashResult::Continue
            }
            other => {
                println!("Unknown command: {other}");
                SlashResult::Continue
            }
        }
    }
}

fn summarize(output: &str) -> String {
    let line = output.lines().next().unwrap_or_default();
    if line.chars().count() > 80 {
        let cut: String = line.chars().take(77).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}
