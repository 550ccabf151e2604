//! `threadweave chat`: interactive REPL.
//!
//! Each line is one conversation call. The transcript returned by a call
//! seeds the next one, so the model sees the running conversation.

use tw_domain::config::Config;
use tw_domain::tool::Message;
use tw_engine::{RunOptions, StopReason};

use crate::bootstrap::{self, Runtime};
use crate::cli::run::streaming_hooks;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(config: &Config, mut model: Option<String>) -> anyhow::Result<()> {
    let mut runtime = bootstrap::build_runtime(config, model.clone())?;
    let mut history: Vec<Message> = Vec::new();

    let history_path = dirs::home_dir()
        .unwrap_or_default()
        .join(".threadweave")
        .join("chat_history.txt");
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut rl = rustyline::DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    // Banner on stderr keeps stdout clean.
    eprintln!("Threadweave interactive chat");
    eprintln!(
        "Provider: {}  |  Type /help for commands, Ctrl+D to exit",
        runtime.provider_id
    );
    eprintln!();

    loop {
        match rl.readline("you> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line).ok();

                if trimmed.starts_with('/') {
                    match parse_slash_command(trimmed) {
                        SlashCommand::Exit => break,
                        SlashCommand::Model(Some(name)) => {
                            model = Some(name.clone());
                            match bootstrap::build_runtime(config, model.clone()) {
                                Ok(rebuilt) => {
                                    runtime = rebuilt;
                                    eprintln!("Model set to: {name}");
                                }
                                Err(e) => eprintln!("\x1B[31merror: {e}\x1B[0m"),
                            }
                        }
                        SlashCommand::Model(None) => {
                            eprintln!("Current model: {}", model.as_deref().unwrap_or("(default)"));
                            eprintln!("Usage: /model <name>");
                        }
                        SlashCommand::Reset => {
                            history.clear();
                            eprintln!("Conversation history cleared.");
                        }
                        SlashCommand::Clear => eprint!("\x1B[2J\x1B[1;1H"),
                        SlashCommand::Tools => {
                            for def in runtime.orchestrator.tools().definitions() {
                                eprintln!("  {:<16} {}", def.name, def.description);
                            }
                        }
                        SlashCommand::Goals => show_goals(&runtime).await,
                        SlashCommand::Help => print_help(),
                        SlashCommand::Unknown(other) => {
                            eprintln!("Unknown command: {other}  (type /help for a list)");
                        }
                    }
                    continue;
                }

                match send_message(&runtime, &history, trimmed).await {
                    Ok(messages) => history = messages,
                    Err(e) => eprintln!("\x1B[31merror: {e}\x1B[0m"),
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or /exit to quit)");
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        }
    }

    rl.save_history(&history_path).ok();
    eprintln!("Goodbye!");
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slash commands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, PartialEq, Eq)]
enum SlashCommand {
    Exit,
    Model(Option<String>),
    Reset,
    Clear,
    Tools,
    Goals,
    Help,
    Unknown(String),
}

fn parse_slash_command(input: &str) -> SlashCommand {
    let mut parts = input.splitn(2, ' ');
    let cmd = parts.next().unwrap_or_default();
    let arg = parts
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned);

    match cmd {
        "/exit" | "/quit" => SlashCommand::Exit,
        "/model" => SlashCommand::Model(arg),
        "/reset" => SlashCommand::Reset,
        "/clear" => SlashCommand::Clear,
        "/tools" => SlashCommand::Tools,
        "/goals" => SlashCommand::Goals,
        "/help" => SlashCommand::Help,
        other => SlashCommand::Unknown(other.to_owned()),
    }
}

fn print_help() {
    eprintln!("Commands:");
    eprintln!("  /model <name>    Switch the model");
    eprintln!("  /reset           Forget the conversation so far");
    eprintln!("  /tools           List the tools offered to the model");
    eprintln!("  /goals           Show active goals");
    eprintln!("  /clear           Clear the screen");
    eprintln!("  /exit, /quit     Exit the chat");
    eprintln!("  /help            Show this help");
}

async fn show_goals(runtime: &Runtime) {
    match runtime.collaborators.goals.list_active().await {
        Ok(goals) if goals.is_empty() => eprintln!("No active goals."),
        Ok(goals) => {
            for goal in goals {
                eprintln!(
                    "  [p{}] {} ({:.0}%)",
                    goal.priority,
                    goal.description,
                    goal.progress * 100.0
                );
            }
        }
        Err(e) => eprintln!("\x1B[31merror: {e}\x1B[0m"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message sending
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one call seeded with `history`; returns the updated transcript.
async fn send_message(
    runtime: &Runtime,
    history: &[Message],
    user_message: &str,
) -> anyhow::Result<Vec<Message>> {
    let opts = RunOptions {
        hooks: streaming_hooks(),
        history: history.to_vec(),
        ..Default::default()
    };
    let output = runtime.orchestrator.run(user_message, opts).await?;

    // Trailing newline + blank separator after the response.
    println!();
    println!();
    if output.stop == StopReason::RoundLimit {
        eprintln!("(stopped after {} rounds)", output.rounds);
    }
    Ok(output.messages)
}
