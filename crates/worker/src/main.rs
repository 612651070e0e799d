use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finadvisor_core::domain::profile::UserProfile;
use finadvisor_core::news::source::load_sources;
use finadvisor_core::news::NewsAggregator;
use finadvisor_core::pipeline::orchestrator::Orchestrator;

#[derive(Debug, Parser)]
#[command(name = "finadvisor_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Answer one question through the research -> advice pipeline.
    Chat {
        #[arg(long)]
        query: String,
    },
    /// Run the wealth pipeline for a profile stored as JSON.
    Wealth {
        #[arg(long)]
        profile: std::path::PathBuf,
    },
    /// Aggregate the news feed only.
    News {
        /// Defaults to NEWS_FEED_LIMIT.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = finadvisor_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let result = run(args.command, &settings).await;
    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %err, "worker run failed");
    }
    result
}

async fn run(command: Command, settings: &finadvisor_core::config::Settings) -> anyhow::Result<()> {
    match command {
        Command::Chat { query } => {
            let orchestrator = Orchestrator::from_settings(settings)?;
            let res = orchestrator.run_chat(&query).await?;
            print_json(&res)
        }
        Command::Wealth { profile } => {
            let text = std::fs::read_to_string(&profile)
                .with_context(|| format!("failed to read profile {}", profile.display()))?;
            let profile: UserProfile = serde_json::from_str(&text)
                .with_context(|| format!("{} is not a valid user profile", profile.display()))?;

            let orchestrator = Orchestrator::from_settings(settings)?;
            let res = orchestrator.run_wealth(profile).await?;
            print_json(&res)
        }
        Command::News { limit } => {
            let limit = limit.unwrap_or(settings.news_feed_limit);
            anyhow::ensure!(limit >= 1, "--limit must be >= 1");

            let sources = load_sources(settings)?;
            let feed = NewsAggregator::from_env()?
                .fetch_feed(&sources, limit)
                .await;
            tracing::info!(articles = feed.len(), "news feed fetched");
            print_json(&feed)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to serialize result")?;
    println!("{out}");
    Ok(())
}

fn init_sentry(settings: &finadvisor_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
