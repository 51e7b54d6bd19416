use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::features::antibot::RequestDelay;

// ---------------------------------------------------------------------------
// HarvestConfig: file-based config loader (review-harvester.json) with env-var fallback
// ---------------------------------------------------------------------------

pub const ENV_CONFIG_PATH: &str = "REVIEW_HARVESTER_CONFIG";
pub const ENV_INPUT_FILE: &str = "HARVEST_INPUT_FILE";
pub const ENV_DATA_DIR: &str = "HARVEST_DATA_DIR";
pub const ENV_HEADLESS: &str = "HARVEST_HEADLESS";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";

/// Inclusive millisecond range a randomized delay is drawn from.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn fixed(ms: u64) -> Self {
        Self::new(ms, ms)
    }

    pub fn to_request_delay(self) -> RequestDelay {
        let (min_ms, max_ms) = if self.min_ms > self.max_ms {
            (self.max_ms, self.min_ms)
        } else {
            (self.min_ms, self.max_ms)
        };
        RequestDelay::new(min_ms, max_ms)
    }
}

/// Offset/limit REST surface.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RestConfig {
    pub api_url: String,
    /// Sent on every request; `Referer` is set per product on top of these.
    pub headers: BTreeMap<String, String>,
    pub page_size: u32,
    pub timeout_secs: u64,
    /// Retries after the first attempt on retryable statuses / transport errors.
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub retry_statuses: Vec<u16>,
    pub page_delay: DelayRange,
    pub product_delay: DelayRange,
    /// Rows whose platform cell equals this value are REST targets.
    pub platform_exact: String,
    pub product_param: String,
    pub sort_field: String,
    pub id_fields: Vec<String>,
}

impl Default for RestConfig {
    fn default() -> Self {
        let headers = [
            ("Accept", "application/json, text/plain, */*"),
            ("Accept-Language", "ko"),
            ("Origin", "https://www.amoremall.com"),
            ("Sec-Fetch-Dest", "empty"),
            ("Sec-Fetch-Mode", "cors"),
            ("Sec-Fetch-Site", "same-site"),
            ("X-G1ECP-Channel", "PCWeb"),
            ("sec-ch-ua", r#""Chromium";v="142", "Google Chrome";v="142", "Not_A Brand";v="99""#),
            ("sec-ch-ua-mobile", "?0"),
            ("sec-ch-ua-platform", "\"macOS\""),
            (
                "User-Agent",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36",
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            api_url: "https://api-gw.amoremall.com/commune/v2/M01/apcp/reviews".to_string(),
            headers,
            page_size: 10,
            timeout_secs: 10,
            max_retries: 3,
            retry_base_ms: 1000,
            retry_statuses: vec![429, 500, 502, 503, 504],
            page_delay: DelayRange::new(1000, 3000),
            product_delay: DelayRange::new(5000, 10000),
            platform_exact: "AP몰".to_string(),
            product_param: "onlineProdSn".to_string(),
            sort_field: "prodReviewRegistDt".to_string(),
            id_fields: vec!["prodReviewSn".to_string(), "id".to_string()],
        }
    }
}

/// Selectors and visible texts the browser driver probes for.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct UiSelectors {
    pub review_tab: String,
    pub review_tab_text: String,
    pub sort_recent_text: String,
    pub pager: String,
    pub pager_page_attr: String,
    pub next_group_text: String,
}

impl Default for UiSelectors {
    fn default() -> Self {
        Self {
            review_tab: "a[data-name='REVIEW']".to_string(),
            review_tab_text: "리뷰".to_string(),
            sort_recent_text: "최신순".to_string(),
            pager: "a[data-shp-area='revlist.pgn']".to_string(),
            pager_page_attr: "data-shp-contents-id".to_string(),
            next_group_text: "다음".to_string(),
        }
    }
}

/// Storefront surface driven through a real browser.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct BrowserCrawlConfig {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_data_dir: PathBuf,
    pub page_delay: DelayRange,
    pub product_delay_ms: u64,
    pub save_batch_size: usize,
    pub review_api_pattern: String,
    /// Any response URL containing this counts as "the click got an answer".
    pub expect_response_fragment: String,
    pub review_anchor: String,
    pub page_size: u32,
    pub group_size: u32,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub pagination_retry_max: u32,
    pub max_consecutive_failures: u32,
    pub max_cooldowns: u32,
    pub cooldown_step_secs: u64,
    pub block_check_interval: u32,
    pub max_pages: u32,
    pub navigation_timeout_secs: u64,
    pub click_response_timeout_ms: u64,
    pub group_click_timeout_ms: u64,
    pub settle_ms: u64,
    pub platform_pattern: String,
    pub sort_field: String,
    pub id_fields: Vec<String>,
    pub pinned_label: String,
    pub block_phrases: Vec<String>,
    pub error_title_phrases: Vec<String>,
    pub selectors: UiSelectors,
}

impl Default for BrowserCrawlConfig {
    fn default() -> Self {
        Self {
            headless: false,
            viewport_width: 1600,
            viewport_height: 900,
            user_data_dir: PathBuf::from("browser_profile"),
            page_delay: DelayRange::new(800, 1500),
            product_delay_ms: 5000,
            save_batch_size: 100,
            review_api_pattern: "/contents/reviews/query-pages".to_string(),
            expect_response_fragment: "reviews".to_string(),
            review_anchor: "#REVIEW".to_string(),
            page_size: 20,
            group_size: 10,
            max_retries: 5,
            retry_delay_secs: 10,
            pagination_retry_max: 3,
            max_consecutive_failures: 5,
            max_cooldowns: 3,
            cooldown_step_secs: 30,
            block_check_interval: 100,
            max_pages: 99_999,
            navigation_timeout_secs: 30,
            click_response_timeout_ms: 10_000,
            group_click_timeout_ms: 5_000,
            settle_ms: 3_000,
            platform_pattern: "네이버|스마트스토어".to_string(),
            sort_field: "createDate".to_string(),
            id_fields: vec!["id".to_string()],
            pinned_label: "BEST".to_string(),
            block_phrases: [
                "접근이 차단",
                "비정상적인 접근",
                "자동화된 접근",
                "captcha",
                "blocked",
                "denied",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            error_title_phrases: vec!["에러".to_string(), "error".to_string()],
            selectors: UiSelectors::default(),
        }
    }
}

impl BrowserCrawlConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Escalating cooldown: step × n for the n-th cooldown (30s, 60s, 90s by default).
    pub fn cooldown_for(&self, nth: u32) -> Duration {
        Duration::from_secs(self.cooldown_step_secs * u64::from(nth))
    }
}

/// Top-level config loaded from `review-harvester.json`.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct HarvestConfig {
    pub input_file: PathBuf,
    pub data_dir: PathBuf,
    pub chrome_executable: Option<String>,
    pub rest: RestConfig,
    pub browser: BrowserCrawlConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            input_file: PathBuf::from("data/input/targets.csv"),
            data_dir: PathBuf::from("data/raw"),
            chrome_executable: None,
            rest: RestConfig::default(),
            browser: BrowserCrawlConfig::default(),
        }
    }
}

impl HarvestConfig {
    /// Apply `HARVEST_*` / `CHROME_EXECUTABLE` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(p) = non_empty_env(ENV_INPUT_FILE) {
            self.input_file = PathBuf::from(p);
        }
        if let Some(p) = non_empty_env(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(p);
        }
        if let Some(p) = non_empty_env(ENV_CHROME_EXECUTABLE) {
            self.chrome_executable = Some(p);
        }
        if let Some(v) = non_empty_env(ENV_HEADLESS) {
            self.browser.headless = matches!(
                v.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        self
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Load `review-harvester.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `explicit` (the `--config` flag)
/// 2. `REVIEW_HARVESTER_CONFIG` env var path
/// 3. `./review-harvester.json`
/// 4. `../review-harvester.json`
/// 5. `~/.review-harvester/config.json`
///
/// Missing file → `HarvestConfig::default()`.
/// Parse error → log a warning, return `HarvestConfig::default()`.
/// Environment overrides are applied on top in every case.
pub fn load_harvest_config(explicit: Option<&Path>) -> HarvestConfig {
    let mut candidates: Vec<PathBuf> = vec![
        PathBuf::from("review-harvester.json"),
        PathBuf::from("../review-harvester.json"),
    ];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".review-harvester").join("config.json"));
    }
    if let Some(env_path) = non_empty_env(ENV_CONFIG_PATH) {
        candidates.insert(0, PathBuf::from(env_path));
    }
    if let Some(p) = explicit {
        candidates.insert(0, p.to_path_buf());
    }

    for path in &candidates {
        let Ok(contents) = std::fs::read_to_string(path) else {
            continue;
        };
        return match serde_json::from_str::<HarvestConfig>(&contents) {
            Ok(cfg) => {
                tracing::info!("config loaded from {}", path.display());
                cfg.with_env_overrides()
            }
            Err(e) => {
                tracing::warn!(
                    "config parse error at {}: {}; using defaults",
                    path.display(),
                    e
                );
                HarvestConfig::default().with_env_overrides()
            }
        };
    }

    HarvestConfig::default().with_env_overrides()
}
