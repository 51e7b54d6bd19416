//! The seam between the pagination engine and whatever drives the page.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failures that abandon the current crawl attempt.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("automation failed: {0}")]
    Automation(String),
    #[error("browser disconnected")]
    Disconnected,
}

/// Rendered document as seen by the block detector.
#[derive(Debug, Clone, Default)]
pub struct PageSnapshot {
    pub content: String,
    pub title: String,
}

/// Result of a single UI probe. Missing controls are not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Control found and acted on; for clicks, a listing response followed.
    Succeeded,
    NotFound,
    Failed(String),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Succeeded)
    }
}

/// Which pager control to click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerTarget {
    /// The numbered button for this page.
    PageNumber(u32),
    /// "Next group" button that jumps to the first page of the next block.
    NextGroup,
    /// Scan every pager anchor for either the numbered button or an
    /// enabled next-group control.
    ScanAll(u32),
}

#[async_trait]
pub trait ListingDriver: Send {
    /// Navigate to `url` and wait for the document to load.
    async fn open(&mut self, url: &str) -> Result<(), DriverError>;

    async fn snapshot(&mut self) -> Result<PageSnapshot, DriverError>;

    /// Select the reviews tab unless it is already active.
    async fn activate_review_tab(&mut self) -> ProbeOutcome;

    /// Switch the listing to newest-first.
    async fn sort_by_recency(&mut self) -> ProbeOutcome;

    /// Scroll so the pager is rendered, `offset_from_bottom` pixels above the end.
    async fn scroll_to_pager(&mut self, offset_from_bottom: u32) -> Result<(), DriverError>;

    /// Click a pager control and wait up to `timeout` for a listing response.
    async fn click_pager(&mut self, target: PagerTarget, timeout: Duration) -> ProbeOutcome;
}
