//! `threadweave run`: one-shot execution.
//!
//! Sends a single message, streams the response to stdout and exits.
//! Tool activity goes to stderr so stdout stays pipeable.

use std::io::Write;

use tw_domain::config::Config;
use tw_engine::{RunHooks, RunOptions, StopReason};

use crate::bootstrap;

pub async fn run(
    config: &Config,
    message: String,
    model: Option<String>,
    json_output: bool,
    max_rounds: Option<u32>,
) -> anyhow::Result<()> {
    let runtime = bootstrap::build_runtime(config, model)?;

    let hooks = if json_output {
        RunHooks::new()
    } else {
        streaming_hooks()
    };
    let opts = RunOptions {
        hooks,
        max_rounds,
        ..Default::default()
    };

    let output = runtime.orchestrator.run(&message, opts).await?;

    if json_output {
        let json = serde_json::to_string_pretty(&output)
            .map_err(|e| anyhow::anyhow!("serializing run output: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    // Trailing newline after streamed tokens.
    println!();
    if output.stop == StopReason::RoundLimit {
        eprintln!(
            "\x1b[33mstopped after {} rounds with tool calls still pending\x1b[0m",
            output.rounds
        );
    }
    Ok(())
}

/// Hooks that stream text to stdout and tool activity to stderr.
pub(crate) fn streaming_hooks() -> RunHooks {
    RunHooks::new()
        .on_fragment(|text| {
            print!("{text}");
            std::io::stdout().flush().ok();
        })
        .on_tool_call(|call| {
            eprintln!("\x1b[2m[tool: {}]\x1b[0m", call.tool_name);
        })
        .on_tool_result(|result| {
            if result.is_error() {
                eprintln!("\x1b[2m[tool {} failed: {}]\x1b[0m", result.tool_name, result.content());
            }
        })
}
