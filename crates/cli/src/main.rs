use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use concierge_agents::ConciergeAgent;
use concierge_core::weather::DEFAULT_FORECAST_DAYS;
use concierge_core::{
    summarize, BookingContext, ChatMessage, ConciergeAsk, ConciergeChatRequest, Preferences,
};
use concierge_observability::{init_tracing, AppMetrics};
use concierge_providers::{ProviderConfig, Providers};
use concierge_storage::Store;
use serde_json::{Map, Value};

#[derive(Debug, Parser)]
#[command(name = "concierge")]
#[command(about = "Stay Concierge CLI")]
struct Cli {
    #[arg(long, env = "CONCIERGE_DATABASE_URL")]
    database_url: Option<String>,

    /// Skip every network provider; search answers come from offline templates.
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build an itinerary for a stay.
    Plan {
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long)]
        booking_id: Option<i64>,
        /// Preferences as JSON, e.g. '{"dietary":"vegan","interests":["art"]}'.
        #[arg(long)]
        prefs: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Interactive chat with the concierge.
    Chat {
        /// Context object as JSON, e.g. '{"active_booking":{"location":"Oslo"}}'.
        #[arg(long)]
        context: Option<String>,
    },
    History {
        #[arg(long)]
        booking_id: i64,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Forecast summary for a place.
    Weather { location: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("concierge_cli");
    let cli = Cli::parse();

    let agent = build_agent(cli.database_url.as_deref(), cli.offline).await?;

    match cli.command {
        Command::Plan {
            location,
            start,
            end,
            booking_id,
            prefs,
            notes,
        } => {
            let prefs = prefs
                .as_deref()
                .map(serde_json::from_str::<Preferences>)
                .transpose()
                .context("invalid --prefs JSON")?;
            let booking = BookingContext {
                booking_id,
                location,
                lat: None,
                lon: None,
                start_date: start,
                end_date: end,
                party_type: None,
                guests: None,
            };

            let response = agent
                .plan(ConciergeAsk {
                    booking,
                    prefs,
                    free_text: notes,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Chat { context } => {
            let context = match context.as_deref() {
                Some(raw) => serde_json::from_str::<Map<String, Value>>(raw)
                    .context("invalid --context JSON object")?,
                None => Map::new(),
            };
            run_chat(agent, context).await?;
        }
        Command::History { booking_id, limit } => {
            let history = agent.history(Some(booking_id), limit).await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        Command::Weather { location } => {
            let weather = &agent.providers().weather;
            let Some((lat, lon)) = weather.geocode(&location).await else {
                anyhow::bail!("could not geocode {location}");
            };
            let payload = weather.daily_forecast(lat, lon).await;
            let summary = summarize(payload.as_ref(), DEFAULT_FORECAST_DAYS);
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

async fn run_chat(agent: ConciergeAgent<Store>, context: Map<String, Value>) -> Result<()> {
    let mut messages: Vec<ChatMessage> = Vec::new();

    println!("Stay Concierge chat mode. type 'exit' to quit.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }

        if message.is_empty() {
            continue;
        }

        messages.push(ChatMessage::user(message));
        let response = agent
            .chat(ConciergeChatRequest {
                messages: messages.clone(),
                context: context.clone(),
            })
            .await;
        messages.push(ChatMessage::assistant(response.reply.clone()));

        println!("\n{}\n", response.reply);
    }

    Ok(())
}

async fn build_agent(database_url: Option<&str>, offline: bool) -> Result<ConciergeAgent<Store>> {
    let metrics = AppMetrics::shared();

    let providers = if offline {
        Providers::offline(true)
    } else {
        Providers::from_config(ProviderConfig::from_env())?
    };

    let store = match database_url {
        Some(database_url) => Store::sqlite(database_url)
            .await
            .with_context(|| format!("failed opening database {database_url}"))?,
        None => Store::memory(),
    };

    Ok(ConciergeAgent::new(providers, Arc::new(store), metrics))
}
