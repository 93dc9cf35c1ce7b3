use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eris::config::Config;
use eris::fetcher::Fetcher;
use eris::{opml, render};

/// Aggregate the feeds listed in an OPML file into a single HTML page on stdout
#[derive(Debug, Parser)]
#[command(name = "eris", version, about)]
struct Cli {
    /// OPML file listing the feeds to read
    opml: PathBuf,

    /// TOML file overriding the client and output settings
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging; stdout carries the page
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eris=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Could not load config {}", path.display()))?,
        None => Config::default(),
    };

    let urls = opml::load(&cli.opml)
        .await
        .with_context(|| format!("Could not read feeds from {}", cli.opml.display()))?;
    info!("Loaded {} feeds from {}", urls.len(), cli.opml.display());

    let fetcher = Fetcher::new(&config).context("Could not create HTTP client")?;
    let harvest = fetcher.harvest(urls, config.max_entries).await?;

    let page = render::render(&harvest.entries).context("Error executing HTML template")?;
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(page.as_bytes())
        .and_then(|()| stdout.flush())
        .context("Could not write page")?;

    Ok(())
}
