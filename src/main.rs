use anyhow::Result;
use clap::{Parser, Subcommand};
use modelgate::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "modelgate")]
#[command(about = "A subscription-aware, model-routing gateway for LLM chat completions", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ModelGate gateway server
    Serve,

    /// Run one research pass (scrape, rank, persist) and exit
    Research {
        /// Re-evaluate every model instead of only new ones
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.unwrap_or_else(|| {
        let default_path = Config::default_path();
        if default_path.exists() {
            default_path
        } else {
            PathBuf::from("config/default.yaml")
        }
    });

    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        eprintln!("Config file not found: {}", config_path.display());
        eprintln!("Please create a config file or use --config to specify one.");
        eprintln!("See config/default.yaml for an example.");
        std::process::exit(1);
    };

    // Initialize logging
    init_logging(&config.logging.level, &config.logging.format)?;

    tracing::info!("ModelGate starting...");
    tracing::info!("Config loaded from: {}", config_path.display());

    match cli.command {
        Some(Commands::Serve) | None => {
            modelgate::run(config).await?;
        }
        Some(Commands::Research { force }) => {
            let rankings = Arc::new(modelgate::routing::RankingsStore::load(
                &config.routing.rankings_path,
            )?);
            let research = modelgate::research::ResearchSystem::new(rankings);
            if force {
                research.force_refresh().await?;
            } else {
                research.run_research().await?;
            }
        }
    }

    Ok(())
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
        _ => {
            // Default to pretty
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
