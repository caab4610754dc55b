use std::io::IsTerminal;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nexim", about = "Instant-messaging gateway and sequencing engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default)
    Serve,

    /// Load the configuration, validate it, and print the resolved snapshot
    CheckConfig,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::CheckConfig) => check_config(),
        Some(Commands::Serve) | None => nexim_server::run_server().await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn check_config() -> anyhow::Result<()> {
    let handle = nexim_server::config::ConfigHandle::create()?;
    let snapshot = handle.load();
    println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
    Ok(())
}
