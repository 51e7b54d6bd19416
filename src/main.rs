use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::info;

use review_harvester::core::config::load_harvest_config;
use review_harvester::runner::{run_browser_site, run_rest_site};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Site {
    /// Offset/limit REST listing
    Apmall,
    /// Browser-driven storefront listing
    Naver,
}

/// Harvest product reviews into per-product JSON snapshots.
#[derive(Debug, Parser)]
#[command(name = "review-harvester", version, about)]
struct Cli {
    /// Which site's targets to crawl
    #[arg(long, value_enum, default_value_t = Site::Apmall)]
    site: Site,

    /// Target CSV (platform + address columns)
    #[arg(long, env = "HARVEST_INPUT_FILE")]
    input: Option<PathBuf>,

    /// Root of the snapshot tree
    #[arg(long, env = "HARVEST_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// JSON config file
    #[arg(long, env = "REVIEW_HARVESTER_CONFIG")]
    config: Option<PathBuf>,

    /// Run the browser without a window
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,chromiumoxide=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let mut cfg = load_harvest_config(cli.config.as_deref());
    if let Some(p) = cli.input {
        cfg.input_file = p;
    }
    if let Some(p) = cli.data_dir {
        cfg.data_dir = p;
    }
    if cli.headless {
        cfg.browser.headless = true;
    }

    info!("Starting review harvest ({:?})", cli.site);
    match cli.site {
        Site::Apmall => run_rest_site(&cfg).await?,
        Site::Naver => run_browser_site(&cfg).await?,
    };
    Ok(())
}
