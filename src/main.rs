use anyhow::Result;
use chefboost::config::Config;
use chefboost::retrieval::Strategy;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "chefboost")]
#[command(about = "Cooking assistant retrieval and streaming server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve /stream, /retrieve and /health over HTTP
    Serve,
    /// Run one recipe retrieval and print the results as JSON
    Search {
        #[arg(short, long)]
        query: String,
        #[arg(long, value_enum, default_value_t = Strategy::SelfQuery)]
        strategy: Strategy,
        #[arg(short = 'n', long)]
        top_k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.runtime.log_level))
        .with_ansi(false)
        .init();

    info!(
        "Configuration loaded: llm={}, db={}/{}/{}",
        config.system.llm_model,
        config.system.database_url,
        config.system.database_ns,
        config.system.database_db
    );

    let state = chefboost::build_state(config).await?;

    match cli.command {
        Commands::Serve => chefboost::http::start_http_server(state).await,
        Commands::Search {
            query,
            strategy,
            top_k,
        } => {
            let top_k = top_k.unwrap_or(state.config.retrieval.top_k);
            let results = state.recipes.retrieve(&query, strategy, top_k).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
    }
}
