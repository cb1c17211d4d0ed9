use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mediawatcher_lib::config::AppConfig;
use mediawatcher_lib::history::TransferHistory;
use mediawatcher_lib::identify::identify;
use mediawatcher_lib::input_validation::validate_path_argument;
use mediawatcher_lib::logging::{init_tracing, LogCategory};
use mediawatcher_lib::pipeline::{Pipeline, SyncSummary};
use mediawatcher_lib::transfer::OverwriteDecision;

#[derive(Parser)]
#[command(name = "ingest-cli")]
#[command(about = "Media ingestion CLI", long_about = None)]
struct Cli {
    #[arg(short, long, global = true, default_value = "mediawatcher.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full sync of every watched directory once
    Sync {
        /// Only sync this file or directory (must be inside a watched directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Print the planned destinations without touching any file
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Print the identifier extracted from a file or directory name
    Identify { name: String },
    /// Inspect or edit the transfer history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List every ledger entry
    List,
    /// Remove one entry so the path is ingested again
    Forget { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Identify { name } => {
            let (code, subtitle) = identify(&name);
            match code {
                Some(code) => println!("🔎 {code} (subtitle: {subtitle})"),
                None => println!("❓ no identifier in {name:?} (subtitle: {subtitle})"),
            }
            Ok(())
        }
        Command::History { action } => {
            let config = load_config(&cli.config)?;
            history(&config, action)
        }
        Command::Sync { path, dry_run } => {
            let config = load_config(&cli.config)?;
            init_tracing(&config.log_level);
            sync(&config, path, dry_run).await
        }
    }
}

fn load_config(path: &PathBuf) -> anyhow::Result<AppConfig> {
    AppConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
}

fn history(config: &AppConfig, action: HistoryAction) -> anyhow::Result<()> {
    let mut history = TransferHistory::open(&config.history_path)?;
    match action {
        HistoryAction::List => {
            if history.is_empty() {
                println!("📭 History is empty");
                return Ok(());
            }
            println!("{:<4} {:<12} {:<12} {:<26} PATH", "", "CODE", "MODE", "WHEN");
            println!("{}", "-".repeat(80));
            for entry in history.entries() {
                println!(
                    "{:<4} {:<12} {:<12} {:<26} {}",
                    if entry.success { "✅" } else { "❌" },
                    entry.meta.code().unwrap_or("-"),
                    entry.mode,
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.source_path.display()
                );
                if !entry.success {
                    println!("     └ {}", entry.message);
                }
            }
        }
        HistoryAction::Forget { path } => {
            if history.forget(&path)? {
                println!("🗑️  Forgot {}", path.display());
            } else {
                anyhow::bail!("No history entry for {}", path.display());
            }
        }
    }
    Ok(())
}

async fn sync(config: &AppConfig, only: Option<PathBuf>, dry_run: bool) -> anyhow::Result<()> {
    let mut pipeline = Pipeline::from_config(config)?;

    let targets = match &only {
        Some(path) => {
            validate_path_argument(&path.to_string_lossy())?;
            let owner = pipeline
                .owner_of(path)
                .ok_or_else(|| anyhow::anyhow!("{} is not inside a watched directory", path.display()))?;
            vec![(owner, Some(path.clone()))]
        }
        None => pipeline.dirs().iter().map(|d| (d.clone(), None)).collect(),
    };

    // A disc folder is ingested as one release in directory mode.
    if let [(owner, Some(path))] = targets.as_slice() {
        if path.join("BDMV").is_dir() && !dry_run {
            println!("💿 Ingesting release directory {}", path.display());
            return match pipeline.handle_release_dir(path, owner).await {
                Ok(result) => {
                    println!("✅ {} file(s) -> {:?}", result.file_count, result.target_path);
                    pipeline.flush_notifications(true).await;
                    Ok(())
                }
                Err(e) => anyhow::bail!("❌ {e}"),
            };
        }
    }

    let mut events = Vec::new();
    for (dir, path) in &targets {
        events.extend(pipeline.sync_events(dir, path.as_deref()));
    }

    if dry_run {
        println!("🔍 Dry-run mode - {} candidate file(s)", events.len());
        println!();
        for event in &events {
            match pipeline.dry_run(event).await {
                Ok((meta, plan)) => {
                    let (icon, note) = match &plan.decision {
                        OverwriteDecision::Create => ("➕", "NEW".to_string()),
                        OverwriteDecision::Replace => ("🔄", "REPLACE".to_string()),
                        OverwriteDecision::Reject { code, .. } => ("⛔", code.clone()),
                    };
                    println!(
                        "   {icon} {} [{}] -> {} ({note})",
                        event.path.display(),
                        meta.code().unwrap_or("-"),
                        plan.destination.display()
                    );
                }
                Err(e) => println!("   ⏭️  {}: {e}", event.path.display()),
            }
        }
        return Ok(());
    }

    println!("🚀 Starting full sync of {} file(s)...", events.len());
    let pb = ProgressBar::new(events.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut summary = SyncSummary::default();
    for event in &events {
        pb.set_message(
            event
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        let outcome = pipeline.handle_event(event).await;
        summary.record(&outcome);
        pb.inc(1);
    }
    pipeline.flush_notifications(true).await;
    pb.finish_with_message("done");

    let journal = pipeline.journal();
    println!();
    println!("📊 Results:");
    println!("   Transferred: {}", summary.transferred);
    println!("   Skipped:     {}", summary.skipped);
    println!("   Filtered:    {}", journal.count(LogCategory::Filtered));
    println!("   Failed:      {}", summary.failed);
    for entry in journal
        .get_logs(None)
        .iter()
        .filter(|e| e.category == LogCategory::Failed)
    {
        eprintln!("   ⚠️  {}", entry.message);
    }

    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
