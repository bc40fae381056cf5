//! vibecheque: Discord tone bot with anonymous clarification requests.

mod commands;
mod config;
mod direct;
mod gateway;
mod moods;
mod routes;
mod server;
mod server_settings;
mod state_file;
mod tone;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "vibecheque", version, about = "Discord tone bot with anonymous clarifications")]
struct Cli {
    /// Config file (default: ~/.vibecheque/config.toml).
    #[arg(long, global = true, env = "VIBECHEQUE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect to Discord and serve (default).
    Serve,
    /// Validate config and report what is missing.
    Doctor,
    /// Print the analyzed tone of a piece of text.
    Analyze { text: String },
    /// One-shot direct message to a Discord user.
    Send { user_id: String, message: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is normal; variables may come from the environment.
    let dotenv = dotenvy::dotenv();
    init_tracing()?;
    install_panic_hook();
    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "loaded .env");
    }

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Serve);

    match command {
        Command::Serve => server::serve(cli.config).await,
        Command::Doctor => server::doctor(cli.config).await,
        Command::Analyze { text } => {
            let tone = server::analyze_once(cli.config, &text).await?;
            println!("{tone}");
            Ok(())
        }
        Command::Send { user_id, message } => {
            server::send_one_shot(cli.config, &user_id, &message).await
        }
    }
}

const DEFAULT_LOG_FILTER: &str =
    "info,vibe_app=debug,vibe_channels=debug,vibe_clarify=debug,vibe_llm=debug,tower_http=info";

/// `VIBECHEQUE_LOG_FORMAT` picks json (default), pretty, or compact output.
fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let format = std::env::var("VIBECHEQUE_LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match format.to_ascii_lowercase().as_str() {
        "json" => builder
            .with_span_events(FmtSpan::CLOSE)
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .init(),
        "pretty" => builder.with_span_events(FmtSpan::CLOSE).pretty().init(),
        "compact" => builder.compact().init(),
        other => anyhow::bail!("VIBECHEQUE_LOG_FORMAT={other:?}; expected json, pretty or compact"),
    }
    Ok(())
}

/// Log panics through tracing before the default hook prints them.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_default();
        tracing::error!(location = ?info.location(), %payload, "panic");
        default_hook(info);
    }));
}
