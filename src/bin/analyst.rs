use clap::{Parser, Subcommand};
use stock_analyst_orchestrator::{
    build_supervisor,
    config::{LlmProvider, Settings},
    llm::build_language_model,
    retrieval::{ingest_directory, open_index},
    supervisor::RoutingPolicy,
    tools::{build_market_data, StaticMarketData, ToolRegistry},
    Query,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "analyst", about = "Stock analysis from the command line")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest a document directory and save the index snapshot
    Ingest {
        /// Defaults to DOCUMENT_DIRECTORY
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Raw retrieval against the saved index
    Query {
        #[arg(long)]
        ticker: String,

        #[arg(long)]
        text: String,

        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Run one full analysis
    Analyze {
        #[arg(long)]
        ticker: String,

        #[arg(long)]
        question: String,

        /// Route by question intent instead of asking every specialist
        #[arg(long)]
        narrow: bool,

        /// Static market data and the heuristic model, no network
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let mut settings = Settings::from_env()?;

    match args.command {
        Command::Ingest { dir } => {
            if let Some(dir) = dir {
                settings.document_directory = dir;
            }
            let index = open_index(&settings).await?;
            let report = ingest_directory(&settings, &index).await?;

            println!(
                "{} documents ({} changed, {} unchanged, {} removed), {} chunks written",
                report.documents,
                report.documents_changed,
                report.documents_unchanged,
                report.documents_removed,
                report.chunks_written
            );
            for (ticker, chunks) in &report.chunks_by_ticker {
                println!("  {:<8} {} chunks", ticker, chunks);
            }
        }

        Command::Query { ticker, text, k } => {
            let query = Query::new(&ticker, &text)?;
            let index = open_index(&settings).await?;
            let hits = index
                .query(&query.ticker, &query.question, k.unwrap_or(settings.retrieval_k))
                .await?;

            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} @{}",
                    rank + 1,
                    hit.similarity,
                    hit.chunk.source_document,
                    hit.chunk.offset
                );
                println!("   {}", hit.chunk.text.replace('\n', " "));
            }
        }

        Command::Analyze {
            ticker,
            question,
            narrow,
            offline,
        } => {
            if narrow {
                settings.routing_policy = RoutingPolicy::Intent;
            }
            if offline {
                settings.llm_provider = LlmProvider::Mock;
            }

            let query = Query::new(&ticker, &question)?;
            let index = open_index(&settings).await?;
            ingest_directory(&settings, &index).await?;

            let tools = if offline {
                ToolRegistry::new(Arc::new(StaticMarketData::demo()))
            } else {
                ToolRegistry::new(build_market_data(&settings)?)
            };
            let model = build_language_model(&settings)?;
            info!(model = model.name(), market_data = tools.source_name(), offline, "Running analysis");

            let supervisor = build_supervisor(&settings, index, tools, model);
            let rec = supervisor.analyze(&query).await?;

            println!("{}", rec.analysis);
            println!();
            println!(
                "Recommendation: {} (score {:.2})",
                rec.recommendation.label(settings.recommendation_locale),
                rec.aggregate_score
            );
            if let Some(price) = rec.target_price {
                println!("Target price: {:.2}", price);
            }
        }
    }

    Ok(())
}
