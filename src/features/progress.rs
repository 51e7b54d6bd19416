//! Per-product crawl statistics and their human-readable rendering.
//!
//! Pure bookkeeping: nothing in the crawl depends on these numbers beyond
//! operator visibility and the final report.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Local;
use tokio::time::Instant;

/// Oldest entries are dropped beyond this many per list; totals keep counting.
pub const MAX_KEPT_MESSAGES: usize = 200;

#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    start_time: Option<Instant>,
    pub total_pages: u32,
    pub total_reviews: u64,
    pub current_page: u32,
    pub pages_per_second: f64,
    pub reviews_per_second: f64,
    /// Reviews seen again that were already persisted or collected.
    pub skipped_reviews: u64,
    errors: VecDeque<String>,
    warnings: VecDeque<String>,
    error_count: usize,
    warning_count: usize,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the baseline once the listing reports its size.
    pub fn start(&mut self, total_pages: u32, total_reviews: u64) {
        self.start_time = Some(Instant::now());
        self.total_pages = total_pages;
        self.total_reviews = total_reviews;
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn update(&mut self, current_page: u32, collected_reviews: usize) {
        self.current_page = current_page;
        let elapsed = match self.start_time {
            Some(t) => t.elapsed().as_secs_f64(),
            None => 1.0,
        };
        if elapsed > 0.0 {
            self.pages_per_second = f64::from(current_page) / elapsed;
            self.reviews_per_second = collected_reviews as f64 / elapsed;
        } else {
            self.pages_per_second = 0.0;
            self.reviews_per_second = 0.0;
        }
    }

    pub fn add_error(&mut self, msg: impl AsRef<str>) {
        self.error_count += 1;
        push_bounded(&mut self.errors, stamp(msg.as_ref()));
    }

    pub fn add_warning(&mut self, msg: impl AsRef<str>) {
        self.warning_count += 1;
        push_bounded(&mut self.warnings, stamp(msg.as_ref()));
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(String::as_str)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.warnings.iter().map(String::as_str)
    }

    /// One-line status: percentage, page cursor, review count, speed, elapsed, ETA.
    pub fn progress_string(&self, collected_reviews: usize) -> String {
        let elapsed_str = format_hms(self.elapsed());

        let (progress_pct, eta_str) = if self.total_pages > 0 {
            let pct = f64::from(self.current_page) / f64::from(self.total_pages) * 100.0;
            let remaining = self.total_pages.saturating_sub(self.current_page);
            let eta = if self.pages_per_second > 0.0 {
                Duration::from_secs_f64(f64::from(remaining) / self.pages_per_second)
            } else {
                Duration::ZERO
            };
            (pct, format_hms(eta))
        } else {
            (0.0, "calculating...".to_string())
        };

        let skip_str = if self.skipped_reviews > 0 {
            format!(" (Skip: {})", self.skipped_reviews)
        } else {
            String::new()
        };

        format!(
            "[{:5.1}%] Page {}/{} | Reviews: {}{} | Speed: {:.1}p/s | Elapsed: {} | ETA: {}",
            progress_pct,
            group_thousands(u64::from(self.current_page)),
            group_thousands(u64::from(self.total_pages)),
            group_thousands(collected_reviews as u64),
            skip_str,
            self.pages_per_second,
            elapsed_str,
            eta_str
        )
    }

    /// Multi-line end-of-product summary. Shows the last five errors.
    pub fn summary_string(&self, collected_reviews: usize) -> String {
        let rule = "=".repeat(60);
        let mut lines = vec![
            String::new(),
            rule.clone(),
            "📊 Crawl summary".to_string(),
            rule.clone(),
            format!("  ✅ Pages: {}", group_thousands(u64::from(self.current_page))),
            format!("  ✅ New reviews: {}", group_thousands(collected_reviews as u64)),
        ];

        if self.skipped_reviews > 0 {
            lines.push(format!(
                "  ⏭️  Skipped reviews: {} (already collected)",
                group_thousands(self.skipped_reviews)
            ));
        }

        lines.push(format!("  ⏱️  Elapsed: {}", format_hms(self.elapsed())));
        lines.push(format!(
            "  🚀 Average speed: {:.2} pages/s",
            self.pages_per_second
        ));

        if self.error_count > 0 {
            lines.push(format!("  ❌ Errors: {}", self.error_count));
            let skip = self.errors.len().saturating_sub(5);
            for err in self.errors().skip(skip) {
                lines.push(format!("     - {}", err));
            }
        }

        if self.warning_count > 0 {
            lines.push(format!("  ⚠️  Warnings: {}", self.warning_count));
            if let Some(last) = self.warnings().last() {
                lines.push(format!("     - last: {}", last));
            }
        }

        lines.push(rule);
        lines.join("\n")
    }
}

fn stamp(msg: &str) -> String {
    format!("[{}] {}", Local::now().format("%H:%M:%S"), msg)
}

fn push_bounded(list: &mut VecDeque<String>, entry: String) {
    if list.len() >= MAX_KEPT_MESSAGES {
        list.pop_front();
    }
    list.push_back(entry);
}

/// `HH:MM:SS`, hours not wrapped at 24.
pub fn format_hms(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// `1234567` → `1,234,567`
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
