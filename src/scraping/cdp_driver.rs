//! [`ListingDriver`] over a live chromiumoxide page.
//!
//! Listing responses are observed passively: a background task follows the
//! CDP `Network` domain, fetches the body of every response whose URL holds
//! the review-listing fragment once it finished loading, and forwards it to
//! the pagination engine. A watch counter ticks after each forwarded body so
//! clicks can wait for "a listing response arrived".

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventLoadingFinished, EventResponseReceived, GetResponseBodyParams,
    RequestId,
};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::config::{BrowserCrawlConfig, UiSelectors};
use crate::core::error::{HarvestError, HarvestResult};
use crate::core::types::InterceptedResponse;
use crate::tools::browser_crawl::driver::{
    DriverError, ListingDriver, PageSnapshot, PagerTarget, ProbeOutcome,
};

pub struct CdpListingDriver {
    page: Page,
    selectors: UiSelectors,
    navigation_timeout: Duration,
    settle: Duration,
    sort_timeout: Duration,
    arrivals: watch::Receiver<u64>,
    listener: JoinHandle<()>,
}

impl CdpListingDriver {
    /// Enable network events on `page` and start the listener task.
    ///
    /// Returns the driver plus the receiving end of the listing-response
    /// channel, which the pagination engine owns.
    pub async fn attach(
        page: Page,
        cfg: &BrowserCrawlConfig,
    ) -> HarvestResult<(Self, mpsc::UnboundedReceiver<InterceptedResponse>)> {
        page.execute(EnableParams::default())
            .await
            .map_err(|e| HarvestError::Browser(format!("enable Network domain: {}", e)))?;

        let responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| HarvestError::Browser(format!("subscribe to responses: {}", e)))?;
        let finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(|e| HarvestError::Browser(format!("subscribe to loading events: {}", e)))?;
        let failed = page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(|e| HarvestError::Browser(format!("subscribe to loading failures: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = watch::channel(0u64);
        let listener = tokio::spawn(listen(
            page.clone(),
            responses,
            finished,
            failed,
            cfg.expect_response_fragment.clone(),
            cfg.review_api_pattern.clone(),
            tx,
            tick_tx,
        ));

        Ok((
            Self {
                page,
                selectors: cfg.selectors.clone(),
                navigation_timeout: Duration::from_secs(cfg.navigation_timeout_secs),
                settle: cfg.settle(),
                sort_timeout: Duration::from_millis(cfg.group_click_timeout_ms),
                arrivals: tick_rx,
                listener,
            },
            rx,
        ))
    }

    pub async fn close(self) {
        self.listener.abort();
        if let Err(e) = self.page.close().await {
            debug!("page close: {}", e);
        }
    }

    fn ensure_connected(&self) -> Result<(), DriverError> {
        if self.listener.is_finished() {
            return Err(DriverError::Disconnected);
        }
        Ok(())
    }

    async fn eval_string(&self, js: String) -> Result<String, DriverError> {
        let value = self
            .page
            .evaluate(js)
            .await
            .map_err(|e| DriverError::Automation(e.to_string()))?;
        value
            .into_value::<String>()
            .map_err(|e| DriverError::Automation(e.to_string()))
    }

    /// Run a click script (returns `clicked` / `not_found`) and wait up to
    /// `timeout` for a listing response to be forwarded.
    async fn click_and_wait(&mut self, js: String, timeout: Duration) -> ProbeOutcome {
        let _ = self.arrivals.borrow_and_update();
        match self.eval_string(js).await {
            Ok(s) if s == "clicked" => {}
            Ok(_) => return ProbeOutcome::NotFound,
            Err(e) => return ProbeOutcome::Failed(e.to_string()),
        }
        match tokio::time::timeout(timeout, self.arrivals.changed()).await {
            Ok(Ok(())) => ProbeOutcome::Succeeded,
            Ok(Err(_)) => ProbeOutcome::Failed("response listener stopped".to_string()),
            Err(_) => ProbeOutcome::Failed(format!(
                "no listing response within {}ms",
                timeout.as_millis()
            )),
        }
    }
}

#[async_trait]
impl ListingDriver for CdpListingDriver {
    async fn open(&mut self, url: &str) -> Result<(), DriverError> {
        self.ensure_connected()?;
        match tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(DriverError::Automation(format!("goto {}: {}", url, e))),
            Err(_) => Err(DriverError::Timeout(format!(
                "navigation to {} exceeded {}s",
                url,
                self.navigation_timeout.as_secs()
            ))),
        }
    }

    async fn snapshot(&mut self) -> Result<PageSnapshot, DriverError> {
        self.ensure_connected()?;
        let content = self
            .page
            .content()
            .await
            .map_err(|e| DriverError::Automation(e.to_string()))?;
        let title = self
            .page
            .get_title()
            .await
            .map_err(|e| DriverError::Automation(e.to_string()))?
            .unwrap_or_default();
        Ok(PageSnapshot { content, title })
    }

    async fn activate_review_tab(&mut self) -> ProbeOutcome {
        let js = review_tab_script(&self.selectors);
        match self.eval_string(js).await {
            Ok(s) if s == "active" => ProbeOutcome::Succeeded,
            Ok(s) if s == "clicked" => {
                tokio::time::sleep(self.settle).await;
                ProbeOutcome::Succeeded
            }
            Ok(_) => ProbeOutcome::NotFound,
            Err(e) => ProbeOutcome::Failed(e.to_string()),
        }
    }

    async fn sort_by_recency(&mut self) -> ProbeOutcome {
        if let Err(e) = self.eval_string("(() => { window.scrollBy(0, 500); return 'ok'; })()".to_string()).await {
            debug!("scroll before sort failed: {}", e);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        let js = text_click_script("a", &self.selectors.sort_recent_text, false);
        let outcome = self.click_and_wait(js, self.sort_timeout).await;
        if outcome != ProbeOutcome::NotFound {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        outcome
    }

    async fn scroll_to_pager(&mut self, offset_from_bottom: u32) -> Result<(), DriverError> {
        let js = format!(
            "(() => {{ window.scrollTo(0, document.body.scrollHeight - {}); return 'ok'; }})()",
            offset_from_bottom
        );
        self.eval_string(js).await.map(|_| ())
    }

    async fn click_pager(&mut self, target: PagerTarget, timeout: Duration) -> ProbeOutcome {
        let js = match target {
            PagerTarget::PageNumber(n) => page_number_script(&self.selectors, n),
            PagerTarget::NextGroup => next_group_script(&self.selectors),
            PagerTarget::ScanAll(n) => scan_pager_script(&self.selectors, n),
        };
        let outcome = self.click_and_wait(js, timeout).await;
        if outcome.is_success() {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        outcome
    }
}

/// Listing responses whose headers arrived but whose body is not loaded yet.
/// Entries leave on `loadingFinished` or `loadingFailed`.
struct PendingBodies<K> {
    fragments: Vec<String>,
    entries: HashMap<K, (String, u16)>,
}

impl<K: Hash + Eq> PendingBodies<K> {
    fn new(fragments: &[String]) -> Self {
        Self {
            fragments: fragments.iter().filter(|f| !f.is_empty()).cloned().collect(),
            entries: HashMap::new(),
        }
    }

    fn observe(&mut self, id: K, url: &str, status: u16) -> bool {
        if !self.fragments.iter().any(|f| url.contains(f.as_str())) {
            return false;
        }
        self.entries.insert(id, (url.to_string(), status));
        true
    }

    fn forget(&mut self, id: &K) -> Option<(String, u16)> {
        self.entries.remove(id)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

async fn listen(
    page: Page,
    mut responses: impl futures::Stream<Item = Arc<EventResponseReceived>> + Unpin + Send,
    mut finished: impl futures::Stream<Item = Arc<EventLoadingFinished>> + Unpin + Send,
    mut failed: impl futures::Stream<Item = Arc<EventLoadingFailed>> + Unpin + Send,
    expect_fragment: String,
    api_pattern: String,
    tx: mpsc::UnboundedSender<InterceptedResponse>,
    ticks: watch::Sender<u64>,
) {
    let mut pending: PendingBodies<RequestId> = PendingBodies::new(&[api_pattern, expect_fragment]);
    loop {
        tokio::select! {
            Some(ev) = responses.next() => {
                let status = u16::try_from(ev.response.status).unwrap_or(0);
                pending.observe(ev.request_id.clone(), &ev.response.url, status);
            }
            Some(ev) = failed.next() => {
                if let Some((url, _)) = pending.forget(&ev.request_id) {
                    debug!("listing request failed: {} ({}); {} still pending", url, ev.error_text, pending.len());
                }
            }
            Some(ev) = finished.next() => {
                let Some((url, status)) = pending.forget(&ev.request_id) else {
                    continue;
                };
                match page.execute(GetResponseBodyParams::new(ev.request_id.clone())).await {
                    Ok(resp) => {
                        let body = if resp.result.base64_encoded {
                            match base64::engine::general_purpose::STANDARD.decode(&resp.result.body) {
                                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                                Err(e) => {
                                    debug!("undecodable body for {}: {}", url, e);
                                    continue;
                                }
                            }
                        } else {
                            resp.result.body.clone()
                        };
                        if tx.send(InterceptedResponse { url, status, body }).is_err() {
                            break;
                        }
                        ticks.send_modify(|n| *n += 1);
                    }
                    Err(e) => debug!("body unavailable for {}: {}", url, e),
                }
            }
            else => break,
        }
    }
    warn!("network listener stopped");
}

// ── Page scripts ─────────────────────────────────────────────────────────────
//
// Each script returns a short status string: `clicked`, `active` or `not_found`.

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

const VISIBLE_FN: &str =
    "const visible = (el) => { const r = el.getBoundingClientRect(); return r.width > 0 && r.height > 0; };";

fn review_tab_script(sel: &UiSelectors) -> String {
    format!(
        r#"(() => {{
        {visible}
        const tab = document.querySelector({tab});
        if (tab && visible(tab)) {{
            const active = tab.getAttribute('aria-current') === 'true'
                || tab.getAttribute('aria-selected') === 'true';
            if (active) return 'active';
            tab.click();
            return 'clicked';
        }}
        const alt = Array.from(document.querySelectorAll('a'))
            .find(a => (a.textContent || '').includes({text}) && visible(a));
        if (alt) {{ alt.click(); return 'clicked'; }}
        return 'not_found';
    }})()"#,
        visible = VISIBLE_FN,
        tab = js_str(&sel.review_tab),
        text = js_str(&sel.review_tab_text),
    )
}

fn text_click_script(selector: &str, text: &str, exact: bool) -> String {
    format!(
        r#"(() => {{
        {visible}
        const want = {text};
        const el = Array.from(document.querySelectorAll({selector})).find(a => {{
            const t = (a.textContent || '').trim();
            return ({exact} ? t === want : t.includes(want))
                && a.getAttribute('aria-hidden') !== 'true'
                && visible(a);
        }});
        if (!el) return 'not_found';
        el.click();
        return 'clicked';
    }})()"#,
        visible = VISIBLE_FN,
        selector = js_str(selector),
        text = js_str(text),
        exact = exact,
    )
}

fn page_number_script(sel: &UiSelectors, page: u32) -> String {
    let selector = format!("{}[{}='{}']", sel.pager, sel.pager_page_attr, page);
    format!(
        r#"(() => {{
        {visible}
        const el = document.querySelector({selector});
        if (!el || !visible(el)) return 'not_found';
        el.click();
        return 'clicked';
    }})()"#,
        visible = VISIBLE_FN,
        selector = js_str(&selector),
    )
}

fn next_group_script(sel: &UiSelectors) -> String {
    // Pager-scoped first, then any visible anchor with the same text.
    format!(
        r#"(() => {{
        const scoped = {scoped};
        if (scoped === 'clicked') return scoped;
        return {any};
    }})()"#,
        scoped = text_click_script(&sel.pager, &sel.next_group_text, false),
        any = text_click_script("a", &sel.next_group_text, false),
    )
}

fn scan_pager_script(sel: &UiSelectors, page: u32) -> String {
    format!(
        r#"(() => {{
        const next = {next};
        const attr = {attr};
        const page = {page};
        for (const a of Array.from(document.querySelectorAll({pager}))) {{
            const text = (a.textContent || '').trim();
            const enabledNext = text === next && a.getAttribute('aria-hidden') !== 'true';
            if (enabledNext || a.getAttribute(attr) === page) {{
                a.click();
                return 'clicked';
            }}
        }}
        return 'not_found';
    }})()"#,
        next = js_str(&sel.next_group_text),
        attr = js_str(&sel.pager_page_attr),
        page = js_str(&page.to_string()),
        pager = js_str(&sel.pager),
    )
}
