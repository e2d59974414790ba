mod auth;
mod body;
mod config;
mod diff;
mod error;
mod feed;
mod gcal;
mod location;
mod schedule;
mod sync;
mod window;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::gcal::{CalendarBackend, GcalClient};
use crate::location::LocationScraper;

#[derive(Parser)]
#[command(name = "feedcal")]
#[command(about = "Sync organization RSS event feeds into Google Calendar")]
struct Cli {
    /// Config file (defaults to ~/.config/feedcal/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate with Google Calendar
    Auth,
    /// Reconcile every configured org feed into its calendar
    Sync,
    /// List the calendars matching each org feed
    Calendars,
    /// Delete all feed-created events from every matching calendar
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Auth => cmd_auth(&cfg).await,
        Commands::Sync => cmd_sync(&cfg).await,
        Commands::Calendars => cmd_calendars(&cfg).await,
        Commands::Clean => cmd_clean(&cfg).await,
    }
}

async fn cmd_auth(cfg: &Config) -> Result<()> {
    let http = reqwest::Client::new();
    auth::authenticate(&http, &cfg.google).await
}

async fn build_backend(cfg: &Config, http: &reqwest::Client) -> Result<GcalClient> {
    let access_token = auth::ensure_access_token(http, &cfg.google).await?;
    Ok(GcalClient::new(http.clone(), access_token))
}

async fn cmd_sync(cfg: &Config) -> Result<()> {
    let tz = cfg.tz()?;
    let http = reqwest::Client::new();
    let backend = build_backend(cfg, &http).await?;
    let locations = LocationScraper::new(http.clone());

    println!("Retrieving list of Google Calendars");
    let calendars = backend.list_calendars().await?;

    println!(
        "Processing RSS events for org ids: {}",
        cfg.orgs
            .iter()
            .map(|o| o.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    // One feed source at a time; a failed org never stops the others.
    for &org in &cfg.orgs {
        let result = async {
            let feed = feed::fetch_feed(&http, &cfg.feed_base_url, org, tz).await?;
            println!("Found {} feed entries", feed.entries.len());
            sync::sync_feed(
                &backend,
                &locations,
                &calendars,
                &feed,
                tz,
                &cfg.calendar_owner,
            )
            .await
        }
        .await;

        match result {
            Ok(stats) => println!(
                "Org {}: {} created, {} updated, {} unchanged, {} invalid, {} failed ops",
                org, stats.created, stats.updated, stats.unchanged, stats.invalid, stats.failed
            ),
            Err(e) => eprintln!("ERROR: org {} failed: {:#}", org, e),
        }
    }

    println!("Done processing all feeds");
    Ok(())
}

async fn cmd_calendars(cfg: &Config) -> Result<()> {
    let tz = cfg.tz()?;
    let http = reqwest::Client::new();
    let backend = build_backend(cfg, &http).await?;

    let calendars = backend.list_calendars().await?;

    for &org in &cfg.orgs {
        match feed::fetch_feed(&http, &cfg.feed_base_url, org, tz).await {
            Ok(feed) => match calendars.iter().find(|c| c.summary == feed.summary) {
                Some(calendar) => {
                    println!("Org {}: \"{}\" -> {}", org, calendar.summary, calendar.id)
                }
                None => println!("Org {}: no calendar named \"{}\"", org, feed.summary),
            },
            Err(e) => eprintln!("ERROR: org {} feed failed: {:#}", org, e),
        }
    }

    Ok(())
}

async fn cmd_clean(cfg: &Config) -> Result<()> {
    let tz = cfg.tz()?;
    let http = reqwest::Client::new();
    let backend = build_backend(cfg, &http).await?;

    println!("Retrieving list of Google Calendars");
    let calendars = backend.list_calendars().await?;

    for &org in &cfg.orgs {
        let result = async {
            let feed = feed::fetch_feed(&http, &cfg.feed_base_url, org, tz).await?;
            sync::clean_feed(&backend, &calendars, &feed.summary).await
        }
        .await;

        match result {
            Ok(deleted) => println!("Org {}: deleted {} events", org, deleted),
            Err(e) => eprintln!("ERROR: org {} failed: {:#}", org, e),
        }
    }

    Ok(())
}
