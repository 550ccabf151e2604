use clap::Parser;
use tracing_subscriber::EnvFilter;

use tw_cli::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            message,
            model,
            json,
            max_rounds,
        } => {
            init_cli_tracing();
            let (config, _) = tw_cli::cli::load_config()?;
            tw_cli::cli::run::run(&config, message, model, json, max_rounds).await
        }
        Command::Chat { model } => {
            init_cli_tracing();
            let (config, _) = tw_cli::cli::load_config()?;
            tw_cli::cli::chat::chat(&config, model).await
        }
        Command::Config(ConfigCommand::Validate) => {
            let (config, config_path) = tw_cli::cli::load_config()?;
            if !tw_cli::cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _) = tw_cli::cli::load_config()?;
            tw_cli::cli::config::show(&config)
        }
        Command::Tools => {
            init_cli_tracing();
            let (config, _) = tw_cli::cli::load_config()?;
            tw_cli::cli::tools::list(&config)
        }
    }
}

/// Compact stderr-only tracing. Defaults to `warn` so diagnostics do not
/// pollute stdout; `RUST_LOG=tw_engine=debug` shows round phases and
/// `RUST_LOG=info` the structured `tw_event` records.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
