//! Per-site run loops: load targets, crawl each product in turn, summarize.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::core::config::HarvestConfig;
use crate::features::block_detector::KeywordBlockDetector;
use crate::features::progress::{format_hms, group_thousands};
use crate::scraping::browser_manager::launch_browser;
use crate::scraping::cdp_driver::CdpListingDriver;
use crate::scraping::stealth::inject_stealth;
use crate::storage::snapshot::{run_stamp, SnapshotStore};
use crate::tools::browser_crawl::{crawl_product, Terminal};
use crate::tools::rest_crawl::{fetch_reviews, HttpReviewApi, ReviewApi};
use crate::tools::targets::{load_targets, path_product_id, query_product_id, PlatformFilter, Target};

pub const REST_SITE: &str = "apmall";
pub const BROWSER_SITE: &str = "naver";

/// Totals for one run across all products.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub products_total: usize,
    pub products_completed: usize,
    pub new_reviews: usize,
    pub elapsed: Duration,
    pub output_dir: PathBuf,
}

impl RunSummary {
    pub fn log(&self) {
        let rule = "=".repeat(60);
        info!("{}", rule);
        info!("🎉 Run finished");
        info!("  📦 Products completed: {}/{}", self.products_completed, self.products_total);
        info!("  📝 New reviews: {}", group_thousands(self.new_reviews as u64));
        info!("  ⏱️  Elapsed: {}", format_hms(self.elapsed));
        info!("  📁 Output: {}", self.output_dir.display());
        info!("{}", rule);
    }
}

/// Target-file problems end the run quietly with nothing to do.
fn targets_or_empty(
    path: &Path,
    filter: &PlatformFilter,
    extract_id: fn(&str) -> Option<String>,
) -> Vec<Target> {
    match load_targets(path, filter, extract_id) {
        Ok(t) => t,
        Err(e) => {
            error!("❌ Could not read targets: {}", e);
            Vec::new()
        }
    }
}

/// Offset/limit crawl of every REST-platform target.
pub async fn run_rest_site(cfg: &HarvestConfig) -> Result<RunSummary> {
    let started = Instant::now();
    let rest = &cfg.rest;
    let filter = PlatformFilter::Exact(rest.platform_exact.clone());
    let targets = targets_or_empty(&cfg.input_file, &filter, query_product_id);
    info!("Found {} {} targets", targets.len(), rest.platform_exact);

    let store = SnapshotStore::new(&cfg.data_dir, REST_SITE, &run_stamp(), &rest.sort_field, &rest.id_fields);
    let mut summary = RunSummary {
        products_total: targets.len(),
        output_dir: store.run_dir().to_path_buf(),
        ..Default::default()
    };
    if targets.is_empty() {
        warn!("No targets to crawl");
        return Ok(summary);
    }

    let api = HttpReviewApi::new(rest.clone())?;
    let page_delay = rest.page_delay.to_request_delay();
    let product_delay = rest.product_delay.to_request_delay();

    for (i, target) in targets.iter().enumerate() {
        let Some(product_id) = target.product_id.as_deref() else {
            warn!("Could not extract {} from {}", rest.product_param, target.url);
            continue;
        };

        let fetch = fetch_reviews(&api as &dyn ReviewApi, product_id, &target.url, rest.page_size, page_delay).await;
        if fetch.aborted.is_none() {
            summary.products_completed += 1;
        }
        summary.new_reviews += fetch.reviews.len();

        if fetch.reviews.is_empty() {
            info!("No reviews to save for product {}", product_id);
        } else {
            let path = store.snapshot_path(product_id);
            match store.write_snapshot(&path, &fetch.reviews).await {
                Ok(()) => info!("💾 Saved {} reviews to {}", fetch.reviews.len(), path.display()),
                Err(e) => error!("❌ Save failed for {}: {}", product_id, e),
            }
        }

        if i + 1 < targets.len() {
            let waited = product_delay.pause().await;
            info!("Paused {:.1}s before next product", waited.as_secs_f64());
        }
    }

    summary.elapsed = started.elapsed();
    summary.log();
    Ok(summary)
}

/// Browser-driven crawl of every storefront target, one product at a time.
pub async fn run_browser_site(cfg: &HarvestConfig) -> Result<RunSummary> {
    let started = Instant::now();
    let browser_cfg = &cfg.browser;
    let filter = PlatformFilter::pattern(&browser_cfg.platform_pattern)?;
    let targets = targets_or_empty(&cfg.input_file, &filter, path_product_id);

    let store = SnapshotStore::new(
        &cfg.data_dir,
        BROWSER_SITE,
        &run_stamp(),
        &browser_cfg.sort_field,
        &browser_cfg.id_fields,
    );
    let mut summary = RunSummary {
        products_total: targets.len(),
        output_dir: store.run_dir().to_path_buf(),
        ..Default::default()
    };
    if targets.is_empty() {
        warn!("❌ No targets to crawl");
        return Ok(summary);
    }
    info!("📊 {} products to crawl; existing snapshots are resumed", targets.len());

    let (mut browser, handler) = launch_browser(browser_cfg, cfg.chrome_executable.as_deref()).await?;
    let page = browser.new_page("about:blank").await?;
    inject_stealth(&page).await?;
    let (mut driver, mut inbox) = CdpListingDriver::attach(page, browser_cfg).await?;
    let detector = KeywordBlockDetector::new(&browser_cfg.block_phrases, &browser_cfg.error_title_phrases);
    let product_delay = Duration::from_millis(browser_cfg.product_delay_ms);

    for (i, target) in targets.iter().enumerate() {
        let product_id = target.product_id.clone().unwrap_or_else(|| "unknown".to_string());
        info!("{}", "=".repeat(60));
        info!("🛒 Product [{}/{}]: {}", i + 1, targets.len(), target.url);

        match crawl_product(&mut driver, &mut inbox, browser_cfg, &detector, &store, &product_id, &target.url).await {
            Ok(report) => {
                summary.new_reviews += report.new_reviews;
                if report.terminal == Terminal::Complete {
                    summary.products_completed += 1;
                }
            }
            Err(e) => error!("❌ Product {} failed: {}", product_id, e),
        }

        if i + 1 < targets.len() {
            info!("⏳ Waiting {}s before next product", product_delay.as_secs());
            tokio::time::sleep(product_delay).await;
        }
    }

    driver.close().await;
    if let Err(e) = browser.close().await {
        warn!("Browser close error (non-fatal): {}", e);
    }
    handler.abort();

    summary.elapsed = started.elapsed();
    summary.log();
    Ok(summary)
}
