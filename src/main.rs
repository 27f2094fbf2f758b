mod config;
mod error;
mod filter;
mod mcp;
mod metrics;
mod model;
mod otel;
mod prompt;
mod provider;
mod search;
mod storage;
mod tools;

use chrono::{Datelike, Duration, Local};
use clap::{Parser, Subcommand};
use config::{Config, hours_to_duration};
use dotenv::dotenv;
use error::FlightSearchError;
use filter::FlightFilter;
use mcp::McpServer;
use otel::LogOutput;
use provider::SerpApiProvider;
use rig::agent::Agent;
use rig::completion::Prompt;
use rig::providers::openai;
use rig::providers::openai::completion::CompletionModel;
use search::SearchClient;
use std::sync::Arc;
use storage::FlightSearchStorage;
use tools::{FilterFlightsTool, SearchFlightsTool};
use tracing::{info, instrument, warn};

#[derive(Parser, Debug)]
#[command(name = "flight-assistant", version)]
#[command(about = "Natural-language flight search tools with a temporary result cache")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the flight tools and prompt over stdio (Model Context Protocol)
    Mcp,
    /// Ask the assistant a single question
    Ask {
        /// Question for the assistant; a sample trip is used when omitted
        query: Vec<String>,
    },
    /// Delete cached search results older than the maximum age
    Cleanup {
        /// Override the configured maximum age, in hours (0 removes everything)
        #[arg(long)]
        older_than_hours: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenv().ok();
    let cli = Cli::parse();

    let output = match cli.command {
        Command::Mcp => LogOutput::Protocol,
        _ => LogOutput::Console,
    };
    // OTEL graceful shutdown on success or error exit
    let _otel_guard = otel::init_otel(output)?;

    match cli.command {
        Command::Mcp => {
            let (search, filter) = build_tools(&cli.config)?;
            McpServer::new(search, filter).run().await?;
        }
        Command::Ask { query } => {
            let (search, filter) = build_tools(&cli.config)?;
            let agent = openai::Client::from_env()
                .agent(&cli.config.model)
                .preamble(prompt::ASSISTANT_PROMPT)
                .tool(search)
                .tool(filter)
                .build();
            let query = if query.is_empty() {
                format!(
                    "Find me the cheapest non-stop flights from Austin to Barcelona on {}.",
                    now_plus_30d()
                )
            } else {
                query.join(" ")
            };
            let response = ask(&agent, &query).await?;
            println!("Agent response:\n{}", response);
        }
        Command::Cleanup { older_than_hours } => {
            let storage = FlightSearchStorage::new(cli.config.storage_dir())?;
            let max_age = cleanup_age(&cli.config, older_than_hours)?;
            let removed = storage.cleanup(max_age)?;
            metrics::inc_cache_entries_removed(removed);
            println!(
                "Removed {} cached search(es) from {}",
                removed,
                storage.dir().display()
            );
        }
    }
    Ok(())
}

/// Validates configuration and wires the store, provider and tools together.
fn build_tools(
    config: &Config,
) -> Result<(SearchFlightsTool<SerpApiProvider>, FilterFlightsTool), anyhow::Error> {
    config.validate()?;
    let storage = Arc::new(FlightSearchStorage::new(config.storage_dir())?);
    info!("Caching search results in {}", storage.dir().display());
    let max_age = config.max_age()?;
    match storage.cleanup(max_age) {
        Ok(removed) => metrics::inc_cache_entries_removed(removed),
        Err(e) => warn!("Startup cleanup failed: {}", e),
    }

    let provider = SerpApiProvider::from_config(config)?;
    let client = SearchClient::new(
        provider,
        storage.clone(),
        config.currency.to_ascii_uppercase(),
        max_age,
    );
    Ok((
        SearchFlightsTool::new(Arc::new(client)),
        FilterFlightsTool::new(Arc::new(FlightFilter::new(storage))),
    ))
}

/// Age limit for the `cleanup` command: the override when given, else the configured age.
fn cleanup_age(
    config: &Config,
    older_than_hours: Option<u64>,
) -> Result<chrono::Duration, FlightSearchError> {
    match older_than_hours {
        Some(hours) => hours_to_duration(hours, "older_than_hours"),
        None => config.max_age(),
    }
}

#[instrument(skip(agent))]
async fn ask(agent: &Agent<CompletionModel>, query: &str) -> Result<String, anyhow::Error> {
    info!("Asking flight assistant: {}", query);
    let response = agent.prompt(query).await?;
    info!("Received flight assistant response");
    Ok(response)
}

fn now_plus_30d() -> String {
    let today = Local::now().date_naive();
    let future_date = today + Duration::days(30);
    // Use a human friendly "Month Day Year" for date in prompt
    let month = future_date.format("%B").to_string();
    let day = future_date.day();
    let year = future_date.year();
    let suffix = day_suffix(day);
    format!("{} {}{} {}", month, day, suffix, year)
}

fn day_suffix(day: u32) -> &'static str {
    match day {
        11..=13 => "th",
        _ => match day % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    }
}
