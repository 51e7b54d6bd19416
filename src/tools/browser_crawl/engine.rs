//! Pagination state machine for one product's review listing.
//!
//! The engine never calls the listing API itself. It clicks pager controls
//! through a [`ListingDriver`] and consumes whatever listing responses the
//! driver's network listener forwards into the inbox channel.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::driver::{DriverError, ListingDriver, PagerTarget, ProbeOutcome};
use super::session::{CrawlSession, ItemVerdict};
use crate::core::config::BrowserCrawlConfig;
use crate::core::error::HarvestResult;
use crate::core::types::{InterceptedResponse, ListingPage};
use crate::features::antibot::{cooldown, RequestDelay};
use crate::features::block_detector::BlockPredicate;
use crate::features::progress::ProgressTracker;
use crate::storage::snapshot::SnapshotStore;

/// How a product crawl ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Complete,
    Stalled,
    Blocked,
    MaxRetriesExceeded,
}

impl std::fmt::Display for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Terminal::Complete => "complete",
            Terminal::Stalled => "stalled",
            Terminal::Blocked => "blocked",
            Terminal::MaxRetriesExceeded => "max retries exceeded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub product_id: String,
    pub terminal: Terminal,
    pub new_reviews: usize,
    pub skipped: u64,
    /// Last page the listing was on.
    pub pages: u32,
    pub cooldowns: Vec<Duration>,
    /// Size of every batch written, in order; the last one may be the final flush.
    pub flushes: Vec<usize>,
    pub errors: usize,
    pub warnings: usize,
    pub output: PathBuf,
}

enum AttemptOutcome {
    Finished(Terminal),
    BlockedAtEntry,
    /// Fast-skip landed somewhere unexpected; go again from page 1.
    RestartWithoutSkip,
}

enum Recovery {
    Resumed,
    BudgetExhausted,
    StillBlocked,
}

/// Identifiable items of one listing response and how many were already known.
#[derive(Debug, Clone, Copy, Default)]
struct ResponseTally {
    accepted: usize,
    known: usize,
}

pub struct PaginationEngine<'a> {
    driver: &'a mut dyn ListingDriver,
    inbox: &'a mut mpsc::UnboundedReceiver<InterceptedResponse>,
    cfg: &'a BrowserCrawlConfig,
    detector: &'a dyn BlockPredicate,
    store: &'a SnapshotStore,
    snapshot_path: PathBuf,
    target_url: String,
    session: CrawlSession,
    tracker: ProgressTracker,
    page_delay: RequestDelay,
    cooldowns_used: u32,
    cooldowns: Vec<Duration>,
    flushes: Vec<usize>,
    last_tally: Option<ResponseTally>,
}

/// Crawl one product end to end: seed from the newest prior snapshot, copy
/// it into this run's file, then paginate until a terminal state.
pub async fn crawl_product(
    driver: &mut dyn ListingDriver,
    inbox: &mut mpsc::UnboundedReceiver<InterceptedResponse>,
    cfg: &BrowserCrawlConfig,
    detector: &dyn BlockPredicate,
    store: &SnapshotStore,
    product_id: &str,
    url: &str,
) -> HarvestResult<CrawlReport> {
    // Leftovers from the previous product must not leak into this session.
    while inbox.try_recv().is_ok() {}

    let (existing_ids, existing_reviews) = store.load_existing(product_id).await?;
    let snapshot_path = store.snapshot_path(product_id);
    if !existing_reviews.is_empty() {
        store.write_snapshot(&snapshot_path, &existing_reviews).await?;
        info!("📋 Loaded {} existing reviews", existing_reviews.len());
    }

    let session = CrawlSession::new(product_id, existing_ids, cfg.page_size);
    if session.skip_to_page > 0 {
        info!("⏩ Will fast-skip to around page {}", session.skip_to_page);
    }
    info!("💾 Output: {}", snapshot_path.display());

    let target_url = if url.contains(&cfg.review_anchor) {
        url.to_string()
    } else {
        format!("{}{}", url, cfg.review_anchor)
    };

    let engine = PaginationEngine {
        driver,
        inbox,
        cfg,
        detector,
        store,
        snapshot_path,
        target_url,
        session,
        tracker: ProgressTracker::new(),
        page_delay: cfg.page_delay.to_request_delay(),
        cooldowns_used: 0,
        cooldowns: Vec::new(),
        flushes: Vec::new(),
        last_tally: None,
    };
    Ok(engine.run().await)
}

impl<'a> PaginationEngine<'a> {
    async fn run(mut self) -> CrawlReport {
        let mut retries = 0u32;
        let mut last_failure_was_block = false;

        let terminal = loop {
            if retries >= self.cfg.max_retries {
                break if last_failure_was_block {
                    Terminal::Blocked
                } else {
                    Terminal::MaxRetriesExceeded
                };
            }

            match self.attempt().await {
                Ok(AttemptOutcome::Finished(t)) => break t,
                Ok(AttemptOutcome::RestartWithoutSkip) => continue,
                Ok(AttemptOutcome::BlockedAtEntry) => {
                    retries += 1;
                    last_failure_was_block = true;
                }
                Err(e) => {
                    retries += 1;
                    last_failure_was_block = false;
                    self.tracker.add_error(format!(
                        "{} (attempt {}/{})",
                        e, retries, self.cfg.max_retries
                    ));
                    warn!("❌ {}; retry {}/{}", e, retries, self.cfg.max_retries);
                    tokio::time::sleep(self.cfg.retry_delay()).await;
                }
            }
        };

        self.flush().await;
        self.drain_inbox().await;
        self.flush().await;

        match terminal {
            Terminal::Complete => info!("✅ Product {} complete", self.session.product_id),
            other => warn!("⚠️  Product {} ended: {}", self.session.product_id, other),
        }
        info!("{}", self.tracker.summary_string(self.session.collected.len()));

        CrawlReport {
            product_id: self.session.product_id.clone(),
            terminal,
            new_reviews: self.session.collected.len(),
            skipped: self.tracker.skipped_reviews,
            pages: self.session.current_page,
            cooldowns: self.cooldowns,
            flushes: self.flushes,
            errors: self.tracker.error_count(),
            warnings: self.tracker.warning_count(),
            output: self.snapshot_path,
        }
    }

    /// Init → ActivateReviewTab → SortByRecency → FastSkip → PageLoop.
    async fn attempt(&mut self) -> Result<AttemptOutcome, DriverError> {
        info!("🌐 Loading {}", self.target_url);
        self.load_page().await?;

        if let Some(reason) = self.blocked_reason().await {
            if !self.handle_block(&reason).await? {
                return Ok(AttemptOutcome::BlockedAtEntry);
            }
        }

        self.prepare_listing().await;

        let resume = self.session.skip_to_page.max(self.session.current_page);
        if self.session.fast_skip_enabled && resume > self.cfg.group_size {
            self.last_tally = None;
            let reached = self.fast_skip(resume).await;
            if reached > 1 && !self.landing_matches_history() {
                warn!("⚠️  Fast-skip landing page shares no known reviews; restarting from page 1");
                self.tracker
                    .add_warning(format!("fast-skip to page {} not trusted", reached));
                self.session.fast_skip_enabled = false;
                self.session.current_page = 1;
                return Ok(AttemptOutcome::RestartWithoutSkip);
            }
            self.session.current_page = reached;
        } else {
            self.session.current_page = 1;
        }

        self.page_loop().await.map(AttemptOutcome::Finished)
    }

    async fn page_loop(&mut self) -> Result<Terminal, DriverError> {
        info!("📄 Collecting reviews from page {}", self.session.current_page);
        let mut consecutive_failures = 0u32;
        let mut last_block_check = 0u32;

        loop {
            if self.session.current_page >= self.cfg.max_pages {
                return Ok(Terminal::Complete);
            }

            if self.advance().await {
                self.session.current_page += 1;
                consecutive_failures = 0;
                self.page_delay.pause().await;
            } else {
                consecutive_failures += 1;

                if consecutive_failures >= self.cfg.max_consecutive_failures {
                    self.flush().await;
                    if self.reached_last_page() {
                        return Ok(Terminal::Complete);
                    }
                    let reason = format!(
                        "{} consecutive pagination failures (cooldown {}/{})",
                        consecutive_failures,
                        self.cooldowns_used + 1,
                        self.cfg.max_cooldowns
                    );
                    match self.cooldown_and_recover(&reason).await? {
                        Recovery::Resumed => {
                            consecutive_failures = 0;
                            continue;
                        }
                        Recovery::BudgetExhausted => return Ok(Terminal::Stalled),
                        Recovery::StillBlocked => return Ok(Terminal::Blocked),
                    }
                }

                if self.reached_last_page() {
                    return Ok(Terminal::Complete);
                }
            }

            let page = self.session.current_page;
            let interval = self.cfg.block_check_interval;
            if interval > 0 && page % interval == 0 && page != last_block_check {
                last_block_check = page;
                if let Some(reason) = self.blocked_reason().await {
                    match self.cooldown_and_recover(&format!("block detected: {}", reason)).await? {
                        Recovery::Resumed => consecutive_failures = 0,
                        Recovery::BudgetExhausted | Recovery::StillBlocked => {
                            return Ok(Terminal::Blocked)
                        }
                    }
                }
            }
        }
    }

    fn reached_last_page(&self) -> bool {
        let total = self.tracker.total_pages;
        let reached = total > 0 && self.session.current_page >= total;
        if reached {
            info!("✅ Last page reached ({}/{})", self.session.current_page, total);
        }
        reached
    }

    async fn load_page(&mut self) -> Result<(), DriverError> {
        self.driver.open(&self.target_url).await?;
        tokio::time::sleep(self.cfg.settle()).await;
        self.drain_inbox().await;
        Ok(())
    }

    async fn prepare_listing(&mut self) {
        match self.driver.activate_review_tab().await {
            ProbeOutcome::Succeeded => debug!("review tab active"),
            ProbeOutcome::NotFound => self.tracker.add_warning("review tab not found"),
            ProbeOutcome::Failed(e) => self
                .tracker
                .add_warning(format!("review tab click failed: {}", e)),
        }
        self.drain_inbox().await;

        match self.driver.sort_by_recency().await {
            ProbeOutcome::Succeeded => debug!("sorted newest-first"),
            ProbeOutcome::NotFound => self.tracker.add_warning("recency sort control not found"),
            ProbeOutcome::Failed(e) => self
                .tracker
                .add_warning(format!("recency sort failed: {}", e)),
        }
        self.drain_inbox().await;
    }

    /// Fail-open: an unreadable page counts as not blocked.
    async fn blocked_reason(&mut self) -> Option<String> {
        match self.driver.snapshot().await {
            Ok(snap) => {
                let verdict = self.detector.check(&snap.content, &snap.title);
                if verdict.blocked {
                    verdict.reason.or_else(|| Some("unknown".to_string()))
                } else {
                    None
                }
            }
            Err(e) => {
                debug!("block check skipped: {}", e);
                None
            }
        }
    }

    /// Save, wait, reload and look again. `false` when the block persists.
    async fn handle_block(&mut self, reason: &str) -> Result<bool, DriverError> {
        self.tracker.add_error(format!("🚫 block detected: {}", reason));
        warn!(
            "🚫 Block detected: {}; retrying in {}s",
            reason,
            self.cfg.retry_delay_secs
        );
        self.flush().await;

        tokio::time::sleep(self.cfg.retry_delay()).await;
        self.load_page().await?;

        if self.blocked_reason().await.is_some() {
            warn!("❌ Still blocked; backing off longer");
            tokio::time::sleep(self.cfg.retry_delay() * 3).await;
            return Ok(false);
        }
        Ok(true)
    }

    /// Spend one cooldown from the product's budget, then reload and walk
    /// back to the current page.
    async fn cooldown_and_recover(&mut self, reason: &str) -> Result<Recovery, DriverError> {
        if self.cooldowns_used >= self.cfg.max_cooldowns {
            self.tracker.add_error(format!(
                "cooldown budget exhausted at page {}",
                self.session.current_page
            ));
            return Ok(Recovery::BudgetExhausted);
        }
        self.cooldowns_used += 1;
        let wait = self.cfg.cooldown_for(self.cooldowns_used);
        self.cooldowns.push(wait);
        cooldown(wait, reason).await;

        self.load_page().await?;
        if let Some(block) = self.blocked_reason().await {
            if !self.handle_block(&block).await? {
                return Ok(Recovery::StillBlocked);
            }
        }
        self.prepare_listing().await;

        let page = self.session.current_page;
        if page > self.cfg.group_size {
            info!("🔄 Returning to page {}", page);
            self.session.current_page = self.fast_skip(page).await;
        }
        Ok(Recovery::Resumed)
    }

    /// Click "next group" until the block containing `target` is shown.
    /// Returns the first page of the block actually reached.
    async fn fast_skip(&mut self, target: u32) -> u32 {
        let group = self.cfg.group_size.max(1);
        let groups = target.saturating_sub(1) / group;
        if groups == 0 {
            return 1;
        }
        info!("⏩ Fast-skip: {} next-group clicks", groups);

        let timeout = Duration::from_millis(self.cfg.group_click_timeout_ms);
        let breather = RequestDelay::new(1000, 2000);
        let mut done = 0u32;
        for i in 0..groups {
            if let Err(e) = self.driver.scroll_to_pager(0).await {
                debug!("scroll failed: {}", e);
            }
            let outcome = self.driver.click_pager(PagerTarget::NextGroup, timeout).await;
            self.drain_inbox().await;
            match outcome {
                ProbeOutcome::Succeeded => {
                    done += 1;
                    if (i + 1) % 5 == 0 || i + 1 == groups {
                        info!("⏩ Skip progress: {}/{} (around page {})", done, groups, done * group + 1);
                    }
                }
                other => {
                    warn!("⚠️  Fast-skip stopped after {} groups: {:?}", done, other);
                    break;
                }
            }
            if (i + 1) % 10 == 0 {
                breather.pause().await;
            }
        }

        let reached = done * group + 1;
        info!("✅ Fast-skip reached around page {}", reached);
        reached
    }

    /// The landing page is trusted unless it carried identifiable items and
    /// none of them were already known.
    fn landing_matches_history(&self) -> bool {
        match self.last_tally {
            Some(t) => t.accepted + t.known == 0 || t.known > 0,
            None => true,
        }
    }

    /// Move to the next page, trying each pager strategy per round.
    async fn advance(&mut self) -> bool {
        let current = self.session.current_page;
        let next = current + 1;
        let timeout = Duration::from_millis(self.cfg.click_response_timeout_ms);
        let rounds = self.cfg.pagination_retry_max.max(1);
        let mut failures: Vec<String> = Vec::new();

        for round in 0..rounds {
            if let Err(e) = self.driver.scroll_to_pager(0).await {
                debug!("scroll failed: {}", e);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;

            for target in [
                PagerTarget::PageNumber(next),
                PagerTarget::NextGroup,
                PagerTarget::ScanAll(next),
            ] {
                let outcome = self.driver.click_pager(target, timeout).await;
                self.drain_inbox().await;
                match outcome {
                    ProbeOutcome::Succeeded => return true,
                    ProbeOutcome::NotFound => {}
                    ProbeOutcome::Failed(e) => {
                        if matches!(target, PagerTarget::PageNumber(_)) {
                            self.tracker.add_warning(format!(
                                "page {}: button click failed ({})",
                                current,
                                round + 1
                            ));
                        }
                        failures.push(format!("{:?}: {}", target, e));
                    }
                }
            }

            if round + 1 < rounds {
                info!("🔄 Pagination retry ({}/{})", round + 2, rounds);
                tokio::time::sleep(Duration::from_secs(2)).await;
                if let Err(e) = self.driver.scroll_to_pager(500).await {
                    debug!("scroll failed: {}", e);
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }

        debug!(
            "no way to page {} ({} click failures: {:?})",
            next,
            failures.len(),
            failures
        );
        false
    }

    async fn drain_inbox(&mut self) {
        while let Ok(resp) = self.inbox.try_recv() {
            self.handle_response(resp).await;
        }
    }

    async fn handle_response(&mut self, resp: InterceptedResponse) {
        if !resp.url.contains(&self.cfg.review_api_pattern) {
            return;
        }
        if resp.status != 200 {
            self.tracker
                .add_warning(format!("API returned status {}", resp.status));
            return;
        }
        let Some(page) = ListingPage::parse(&resp.body) else {
            debug!("ignoring unparseable listing body ({} bytes)", resp.body.len());
            return;
        };

        if self.session.init_totals(&page) {
            self.tracker.start(page.total_pages, page.total_elements);
            info!(
                "📋 Total reviews: {} ({} pages)",
                page.total_elements, page.total_pages
            );
        }

        let page_no = page.page;
        let mut tally = ResponseTally::default();
        for item in page.contents {
            match self
                .session
                .ingest(item, &self.cfg.id_fields, &self.cfg.pinned_label)
            {
                ItemVerdict::Accepted => {
                    tally.accepted += 1;
                    if self.session.unsaved.len() >= self.cfg.save_batch_size.max(1) {
                        self.flush().await;
                    }
                }
                ItemVerdict::Duplicate => {
                    tally.known += 1;
                    self.tracker.skipped_reviews += 1;
                }
                ItemVerdict::Pinned | ItemVerdict::MissingId => {}
            }
        }
        self.last_tally = Some(tally);

        if tally.accepted > 0 {
            let collected = self.session.collected.len();
            self.tracker.update(page_no, collected);
            info!("{}", self.tracker.progress_string(collected));
        }
    }

    /// Write the buffer out. On failure the buffer is kept for the next try.
    async fn flush(&mut self) {
        if self.session.unsaved.is_empty() {
            return;
        }
        match self
            .store
            .flush_batch(&self.snapshot_path, &self.session.unsaved)
            .await
        {
            Ok(total) => {
                let n = self.session.unsaved.len();
                self.session.unsaved.clear();
                self.flushes.push(n);
                info!("💾 Batch saved: {} reviews ({} in file)", n, total);
            }
            Err(e) => {
                error!("❌ Save failed: {}", e);
                self.tracker.add_error(format!("save failed: {}", e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DelayRange;
    use crate::core::types::ReviewRecord;
    use crate::features::block_detector::KeywordBlockDetector;
    use crate::tools::browser_crawl::driver::PageSnapshot;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::path::Path;

    const API: &str = "https://shop.example/i/v1/contents/reviews/query-pages";

    fn review(i: usize) -> ReviewRecord {
        json!({
            "id": format!("r{}", i),
            "createDate": format!("2024-01-01T00:{:02}:{:02}", 59 - (i / 60) % 60, 59 - i % 60),
            "labels": [],
        })
    }

    fn listing(total: usize, per_page: usize) -> Vec<Vec<ReviewRecord>> {
        (0..total)
            .map(review)
            .collect::<Vec<_>>()
            .chunks(per_page)
            .map(|c| c.to_vec())
            .collect()
    }

    /// In-memory storefront: every successful action pushes the page it
    /// would render into the engine's inbox.
    struct FakeDriver {
        tx: mpsc::UnboundedSender<InterceptedResponse>,
        pages: Vec<Vec<ReviewRecord>>,
        shown: u32,
        opens: u32,
        failing_opens: u32,
        /// Pager clicks find nothing until this many opens happened.
        pager_dead_until_open: u32,
        /// Page-1 responses report totals from this open on.
        totals_from_open: u32,
        blocked: bool,
        /// The block page appears once this page was rendered and stays.
        block_from_page: Option<u32>,
        block_latched: bool,
        /// This one open (1-based) times out.
        failing_open_at: Option<u32>,
        /// Pager dead once this page is shown, until this many opens happened.
        stall: Option<(u32, u32)>,
        landing_override: Option<Vec<ReviewRecord>>,
        clicks: Vec<PagerTarget>,
        /// `clicks.len()` at each successful open.
        opened_at_click: Vec<usize>,
    }

    impl FakeDriver {
        fn new(tx: mpsc::UnboundedSender<InterceptedResponse>, pages: Vec<Vec<ReviewRecord>>) -> Self {
            Self {
                tx,
                pages,
                shown: 1,
                opens: 0,
                failing_opens: 0,
                pager_dead_until_open: 0,
                totals_from_open: 1,
                blocked: false,
                block_from_page: None,
                block_latched: false,
                failing_open_at: None,
                stall: None,
                landing_override: None,
                clicks: Vec::new(),
                opened_at_click: Vec::new(),
            }
        }

        fn total_elements(&self) -> usize {
            self.pages.iter().map(Vec::len).sum()
        }

        fn render(&mut self, page: u32, contents: Vec<ReviewRecord>) {
            self.shown = page;
            if self.block_from_page.is_some_and(|b| page >= b) {
                self.block_latched = true;
            }
            let with_totals = self.opens >= self.totals_from_open;
            let body = json!({
                "totalElements": if with_totals { self.total_elements() } else { 0 },
                "totalPages": if with_totals { self.pages.len() } else { 0 },
                "page": page,
                "contents": contents,
            });
            let _ = self.tx.send(InterceptedResponse {
                url: format!("{}?page={}", API, page),
                status: 200,
                body: body.to_string(),
            });
        }

        fn render_page(&mut self, page: u32) {
            let contents = self.pages[page as usize - 1].clone();
            self.render(page, contents);
        }

        fn group_start(&self) -> u32 {
            (self.shown - 1) / 10 * 10 + 1
        }

        fn pager_alive(&self) -> bool {
            let stalled = self
                .stall
                .is_some_and(|(page, until_open)| self.shown >= page && self.opens < until_open);
            self.opens >= self.pager_dead_until_open && !stalled
        }
    }

    #[async_trait]
    impl ListingDriver for FakeDriver {
        async fn open(&mut self, _url: &str) -> Result<(), DriverError> {
            self.opens += 1;
            if self.opens <= self.failing_opens || self.failing_open_at == Some(self.opens) {
                return Err(DriverError::Timeout("navigation".into()));
            }
            self.opened_at_click.push(self.clicks.len());
            self.render_page(1);
            Ok(())
        }

        async fn snapshot(&mut self) -> Result<PageSnapshot, DriverError> {
            let content = if self.blocked || self.block_latched { "Please solve the captcha" } else { "<div>reviews</div>" };
            Ok(PageSnapshot { content: content.into(), title: "Store".into() })
        }

        async fn activate_review_tab(&mut self) -> ProbeOutcome {
            ProbeOutcome::Succeeded
        }

        async fn sort_by_recency(&mut self) -> ProbeOutcome {
            self.render_page(1);
            ProbeOutcome::Succeeded
        }

        async fn scroll_to_pager(&mut self, _offset: u32) -> Result<(), DriverError> {
            Ok(())
        }

        async fn click_pager(&mut self, target: PagerTarget, _timeout: Duration) -> ProbeOutcome {
            self.clicks.push(target);
            if !self.pager_alive() {
                return ProbeOutcome::NotFound;
            }
            let last = self.pages.len() as u32;
            match target {
                PagerTarget::PageNumber(n) => {
                    let start = self.group_start();
                    if n <= last && n >= start && n < start + 10 {
                        self.render_page(n);
                        ProbeOutcome::Succeeded
                    } else {
                        ProbeOutcome::NotFound
                    }
                }
                PagerTarget::NextGroup => {
                    let n = self.group_start() + 10;
                    if n > last {
                        return ProbeOutcome::NotFound;
                    }
                    match self.landing_override.take() {
                        Some(contents) => self.render(n, contents),
                        None => self.render_page(n),
                    }
                    ProbeOutcome::Succeeded
                }
                PagerTarget::ScanAll(_) => ProbeOutcome::NotFound,
            }
        }
    }

    fn config() -> BrowserCrawlConfig {
        BrowserCrawlConfig {
            page_delay: DelayRange::fixed(0),
            ..BrowserCrawlConfig::default()
        }
    }

    fn store(dir: &Path, stamp: &str) -> SnapshotStore {
        SnapshotStore::new(dir, "naver", stamp, "createDate", &["id".to_string()])
    }

    async fn run(driver: &mut FakeDriver, rx: &mut mpsc::UnboundedReceiver<InterceptedResponse>, cfg: &BrowserCrawlConfig, store: &SnapshotStore) -> CrawlReport {
        let detector = KeywordBlockDetector::new(&cfg.block_phrases, &cfg.error_title_phrases);
        crawl_product(driver, rx, cfg, &detector, store, "555", "https://shop.example/products/555")
            .await
            .unwrap()
    }

    async fn saved(report: &CrawlReport) -> Vec<ReviewRecord> {
        serde_json::from_str(&tokio::fs::read_to_string(&report.output).await.unwrap()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_collects_every_page() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = FakeDriver::new(tx, listing(65, 20));
        let report = run(&mut driver, &mut rx, &config(), &store(dir.path(), "2025-01-01_00-00-00")).await;

        assert_eq!(report.terminal, Terminal::Complete);
        assert_eq!(report.new_reviews, 65);
        assert_eq!(report.pages, 4);
        assert!(report.cooldowns.is_empty());
        assert_eq!(driver.opens, 1);

        let out = saved(&report).await;
        assert_eq!(out.len(), 65);
        let ids: HashSet<&str> = out.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids.len(), 65);
        assert!(out.windows(2).all(|w| w[0]["createDate"].as_str() >= w[1]["createDate"].as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn pinned_and_known_reviews_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let previous = store(dir.path(), "2025-01-01_00-00-00");
        previous
            .write_snapshot(&previous.snapshot_path("555"), &[review(0), review(1)])
            .await
            .unwrap();

        let mut pages = listing(40, 20);
        pages[0].insert(0, json!({"id": "best-1", "labels": ["BEST"], "createDate": "2030-01-01"}));
        pages[1].insert(0, json!({"id": "best-1", "labels": ["BEST"], "createDate": "2030-01-01"}));
        pages[1].push(json!({"labels": []}));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = FakeDriver::new(tx, pages);
        let report = run(&mut driver, &mut rx, &config(), &store(dir.path(), "2025-02-01_00-00-00")).await;

        assert_eq!(report.terminal, Terminal::Complete);
        assert_eq!(report.new_reviews, 38);
        // r0/r1 on both page-1 renders, plus the 18 new page-1 items seen again after sorting.
        assert_eq!(report.skipped, 2 * 2 + 18);

        let out = saved(&report).await;
        assert_eq!(out.len(), 40);
        assert!(out.iter().all(|r| r["id"] != "best-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn five_failures_without_totals_trigger_one_thirty_second_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = FakeDriver::new(tx, listing(60, 20));
        driver.pager_dead_until_open = 2;
        driver.totals_from_open = 2;

        let started = tokio::time::Instant::now();
        let report = run(&mut driver, &mut rx, &config(), &store(dir.path(), "2025-01-01_00-00-00")).await;

        assert_eq!(report.cooldowns, vec![Duration::from_secs(30)]);
        assert_eq!(report.terminal, Terminal::Complete);
        assert_eq!(report.new_reviews, 60);
        assert_eq!(driver.opens, 2);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_cooldowns_end_stalled() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = FakeDriver::new(tx, listing(60, 20));
        driver.pager_dead_until_open = u32::MAX;
        driver.totals_from_open = u32::MAX;

        let report = run(&mut driver, &mut rx, &config(), &store(dir.path(), "2025-01-01_00-00-00")).await;

        assert_eq!(report.terminal, Terminal::Stalled);
        assert_eq!(
            report.cooldowns,
            vec![Duration::from_secs(30), Duration::from_secs(60), Duration::from_secs(90)]
        );
        // Page 1 was still collected and saved.
        assert_eq!(report.new_reviews, 20);
        assert_eq!(saved(&report).await.len(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_block_ends_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = FakeDriver::new(tx, listing(20, 20));
        driver.blocked = true;

        let report = run(&mut driver, &mut rx, &config(), &store(dir.path(), "2025-01-01_00-00-00")).await;

        assert_eq!(report.terminal, Terminal::Blocked);
        // Each attempt opens once and reloads once inside block handling.
        assert_eq!(driver.opens, 10);
        assert!(driver.clicks.is_empty());
        assert!(report.errors >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_failures_exhaust_outer_retries() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = FakeDriver::new(tx, listing(20, 20));
        driver.failing_opens = u32::MAX;

        let report = run(&mut driver, &mut rx, &config(), &store(dir.path(), "2025-01-01_00-00-00")).await;

        assert_eq!(report.terminal, Terminal::MaxRetriesExceeded);
        assert_eq!(driver.opens, 5);
        assert_eq!(report.errors, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_navigation_failure_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = FakeDriver::new(tx, listing(30, 20));
        driver.failing_opens = 1;

        let report = run(&mut driver, &mut rx, &config(), &store(dir.path(), "2025-01-01_00-00-00")).await;

        assert_eq!(report.terminal, Terminal::Complete);
        assert_eq!(report.new_reviews, 30);
        assert_eq!(driver.opens, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn batches_flush_at_threshold_and_at_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = FakeDriver::new(tx, listing(250, 20));

        let report = run(&mut driver, &mut rx, &config(), &store(dir.path(), "2025-01-01_00-00-00")).await;

        assert_eq!(report.terminal, Terminal::Complete);
        assert_eq!(report.flushes, vec![100, 100, 50]);
        assert_eq!(saved(&report).await.len(), 250);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_fast_skips_to_the_estimated_group() {
        let dir = tempfile::tempdir().unwrap();
        let previous = store(dir.path(), "2025-01-01_00-00-00");
        let existing: Vec<ReviewRecord> = (0..240).map(review).collect();
        previous
            .write_snapshot(&previous.snapshot_path("555"), &existing)
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = FakeDriver::new(tx, listing(300, 20));
        let report = run(&mut driver, &mut rx, &config(), &store(dir.path(), "2025-02-01_00-00-00")).await;

        assert_eq!(report.terminal, Terminal::Complete);
        assert_eq!(report.new_reviews, 60);
        assert_eq!(driver.clicks[0], PagerTarget::NextGroup);
        assert_eq!(driver.clicks[1], PagerTarget::PageNumber(12));
        assert!(!driver.clicks.contains(&PagerTarget::PageNumber(2)));
        assert_eq!(saved(&report).await.len(), 300);
    }

    #[tokio::test(start_paused = true)]
    async fn misaligned_fast_skip_restarts_from_page_one() {
        let dir = tempfile::tempdir().unwrap();
        let previous = store(dir.path(), "2025-01-01_00-00-00");
        let existing: Vec<ReviewRecord> = (0..240).map(review).collect();
        previous
            .write_snapshot(&previous.snapshot_path("555"), &existing)
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = FakeDriver::new(tx, listing(300, 20));
        driver.landing_override = Some((1000..1020).map(review).collect());

        let report = run(&mut driver, &mut rx, &config(), &store(dir.path(), "2025-02-01_00-00-00")).await;

        assert_eq!(report.terminal, Terminal::Complete);
        assert_eq!(driver.opens, 2);
        assert_eq!(driver.clicks[0], PagerTarget::NextGroup);
        assert!(driver.clicks.contains(&PagerTarget::PageNumber(2)));
        // 60 genuinely new listing reviews plus the 20 seen on the odd landing page.
        assert_eq!(report.new_reviews, 80);
        assert_eq!(report.warnings, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_block_check_ends_blocked_with_data_saved() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = FakeDriver::new(tx, listing(105 * 20, 20));
        driver.block_from_page = Some(100);

        let report = run(&mut driver, &mut rx, &config(), &store(dir.path(), "2025-01-01_00-00-00")).await;

        assert_eq!(report.terminal, Terminal::Blocked);
        assert_eq!(report.pages, 100);
        assert_eq!(report.new_reviews, 2000);
        // One cooldown spent, then the reload was still blocked.
        assert_eq!(report.cooldowns, vec![Duration::from_secs(30)]);
        assert!(!driver.clicks.contains(&PagerTarget::PageNumber(101)));

        let out = saved(&report).await;
        assert_eq!(out.len(), 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn reload_failure_mid_crawl_resumes_by_fast_skip() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = FakeDriver::new(tx, listing(30 * 20, 20));
        // Stuck on page 25 until the retry's reload; the cooldown reload times out.
        driver.stall = Some((25, 3));
        driver.failing_open_at = Some(2);

        let report = run(&mut driver, &mut rx, &config(), &store(dir.path(), "2025-01-01_00-00-00")).await;

        assert_eq!(report.terminal, Terminal::Complete);
        assert_eq!(report.cooldowns, vec![Duration::from_secs(30)]);
        assert_eq!(report.errors, 1);
        assert_eq!(driver.opens, 3);
        assert_eq!(report.new_reviews, 600);

        // The retry walks back in group jumps and carries on past page 25.
        let retry = &driver.clicks[driver.opened_at_click[1]..];
        assert_eq!(
            &retry[..3],
            &[PagerTarget::NextGroup, PagerTarget::NextGroup, PagerTarget::PageNumber(22)]
        );
        assert!(!retry.contains(&PagerTarget::PageNumber(2)));
        assert!(!retry.contains(&PagerTarget::PageNumber(12)));

        let out = saved(&report).await;
        let ids: HashSet<&str> = out.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(out.len(), 600);
        assert_eq!(ids.len(), 600);
    }
}
