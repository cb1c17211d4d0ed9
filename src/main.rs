use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use mediawatcher_lib::config::AppConfig;
use mediawatcher_lib::logging::init_tracing;

#[derive(Parser)]
#[command(name = "mediawatcher")]
#[command(about = "Watches download directories and files media into a library", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "mediawatcher.yaml")]
    config: PathBuf,

    /// Log level when RUST_LOG is unset (overrides the config file)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    init_tracing(cli.log_level.as_deref().unwrap_or(&config.log_level));

    mediawatcher_lib::run(config)
        .await
        .context("mediawatcher stopped with an error")
}
