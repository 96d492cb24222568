// crates/muninn-server/src/main.rs
// Muninn - per-project coding-context memory for AI agents

mod cli;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cli::{Cli, Commands};

fn max_level(raw: &str) -> Level {
    match raw {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => {
            eprintln!("[muninn] Unknown MUNINN_LOG_LEVEL={other:?}, using info");
            Level::INFO
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env from ~/.muninn/.env only (never from CWD; a malicious repo
    // could override the write token or primary URL)
    if let Some(home) = muninn::config::home_dir()
        && let Err(e) = dotenvy::from_path(home.join(".env"))
    {
        tracing::debug!("Failed to load global .env file: {}", e);
    }

    let level = max_level(
        &std::env::var("MUNINN_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
    );
    // Newline-delimited JSON records on stderr; stdout is the payload
    // channel for tool output.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .json()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Tool { name, args }) => cli::run_tool(name, args).await,
        Some(Commands::Check { files }) => cli::run_check(files).await,
        Some(Commands::Score { max_files }) => cli::run_score(max_files).await,
        Some(Commands::Work) => cli::run_work().await,
        Some(Commands::Status) | None => cli::run_status().await,
    };

    if let Err(e) = result {
        eprintln!("[muninn] {e}");
        std::process::exit(e.exit_code());
    }
}
