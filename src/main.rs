use clap::Parser;
use hashhive::{HiveCore, ServerConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hashhive")]
#[command(about = "HashHive - distributed password-cracking orchestration core")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Generate default configuration file
    #[arg(long)]
    generate_config: Option<PathBuf>,

    /// Database path (overrides config)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(path) = cli.generate_config {
        let config = ServerConfig::default();
        config.save_to_file(&path)?;
        println!("Default configuration written to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(path) = cli.config {
        ServerConfig::from_file(&path)?
    } else {
        ServerConfig::default()
    };

    if let Some(db_path) = cli.database {
        config.database_path = db_path;
    }

    hashhive::logging::init_logging(&cli.log_level, config.logging.format.clone());

    tracing::info!("HashHive starting");
    tracing::info!("Database: {}", config.database_path.display());

    let core = HiveCore::new(config).await?;
    core.run().await?;

    tracing::info!("HashHive shutdown complete");

    Ok(())
}
