use anyhow::Result;
use clap::{Parser, Subcommand};
use esseries::ParserConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "esseries")]
#[command(about = "Turn Elasticsearch aggregation responses into named series")]
#[command(version)]
struct Cli {
    /// Parser config file (TOML)
    #[arg(short, long, global = true, env = "ESSERIES_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse a search response against its query definitions
    Parse {
        /// JSON array of query definitions
        #[arg(short, long)]
        queries: PathBuf,

        /// Multi-search response, or an object keyed by refId with --keyed
        #[arg(short, long)]
        response: PathBuf,

        /// Response file maps refId to a single search response
        #[arg(long)]
        keyed: bool,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Show the series labels each query would produce
    Labels {
        /// JSON array of query definitions
        #[arg(short, long)]
        queries: PathBuf,
    },

    /// Write the default config to a file
    InitConfig {
        /// Destination path
        #[arg(short, long, default_value = "esseries.toml")]
        output: PathBuf,
    },
}

fn init_tracing(config: &ParserConfig) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone()),
    );
    let registry = tracing_subscriber::registry().with(filter);
    // Logs go to stderr so stdout stays valid JSON
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ParserConfig::load(path)?,
        None => ParserConfig::default(),
    };
    init_tracing(&config);

    match cli.command {
        Commands::Parse {
            queries,
            response,
            keyed,
            pretty,
        } => {
            tracing::info!("Parsing {} against {}", response.display(), queries.display());
            commands::run_parse(config, &queries, &response, keyed, pretty).await?;
        }
        Commands::Labels { queries } => {
            commands::run_labels(&config, &queries)?;
        }
        Commands::InitConfig { output } => {
            commands::run_init_config(&config, &output)?;
            tracing::info!("Wrote config to {}", output.display());
        }
    }

    Ok(())
}
