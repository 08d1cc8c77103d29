//! Daemon binary for habitual.

use clap::{Parser, Subcommand};
use habitual::config::HabitConfig;
use habitual::diagnostics::init_tracing;
use habitual::habit_dirs;
use habitual::runtime::HabitRuntime;
use std::path::{Path, PathBuf};
use tracing::info;

/// Habitual: daily habit check-ins over Telegram.
#[derive(Parser)]
#[command(name = "habitual", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and ingress until interrupted.
    Run,

    /// Validate the configuration and print the effective schedule.
    Check,

    /// Write the default configuration to the config path.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn load_config(path: &Path) -> anyhow::Result<HabitConfig> {
    let mut config = if path.exists() {
        HabitConfig::from_file(path)?
    } else {
        HabitConfig::default()
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let path = cli.config.unwrap_or_else(HabitConfig::default_config_path);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&path).await,
        Command::Check => {
            let config = load_config(&path)?;
            for entry in config.schedule.table()?.entries() {
                println!(
                    "{}  {:<12} {:?}  {}",
                    entry.time, entry.area, entry.kind, entry.question
                );
            }
            println!("config OK ({})", path.display());
            Ok(())
        }
        Command::InitConfig { force } => {
            if path.exists() && !force {
                anyhow::bail!("{} exists; pass --force to overwrite", path.display());
            }
            HabitConfig::default().save_to_file(&path)?;
            println!("wrote {}", path.display());
            Ok(())
        }
    }
}

async fn run(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let logs_dir = habit_dirs::logs_dir_in(&config.store.resolved_data_dir());
    let _log_guard = init_tracing(&config.logging, &logs_dir);
    info!("habitual starting with config {}", path.display());

    let runtime = HabitRuntime::start(config)
        .await
        .map_err(|e| anyhow::anyhow!("startup failed: {e}"))?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    runtime.shutdown().await;
    info!("habitual shut down cleanly");
    Ok(())
}
