//! Per-product crawl state. Built fresh for every product and owned by the
//! pagination engine for the duration of that product's crawl.

use std::collections::HashSet;

use crate::core::types::{has_label, review_id, ListingPage, ReviewRecord};

/// What happened to one listing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemVerdict {
    Accepted,
    /// Already persisted or collected earlier in this run.
    Duplicate,
    /// Carries the pinned/promoted label; never written out.
    Pinned,
    MissingId,
}

#[derive(Debug)]
pub struct CrawlSession {
    pub product_id: String,
    /// Grows monotonically for the whole product crawl.
    pub saved_ids: HashSet<String>,
    pub collected: Vec<ReviewRecord>,
    pub unsaved: Vec<ReviewRecord>,
    /// 1-based page currently shown by the listing.
    pub current_page: u32,
    /// Resume estimate from the prior snapshot, `existing / page_size`.
    pub skip_to_page: u32,
    /// Cleared when a fast-skip landing page turns out not to line up.
    pub fast_skip_enabled: bool,
    totals_initialized: bool,
}

impl CrawlSession {
    pub fn new(product_id: impl Into<String>, existing_ids: HashSet<String>, page_size: u32) -> Self {
        let skip_to_page = if page_size == 0 {
            0
        } else {
            u32::try_from(existing_ids.len() / page_size as usize).unwrap_or(u32::MAX)
        };
        Self {
            product_id: product_id.into(),
            saved_ids: existing_ids,
            collected: Vec::new(),
            unsaved: Vec::new(),
            current_page: 1,
            skip_to_page,
            fast_skip_enabled: true,
            totals_initialized: false,
        }
    }

    /// True exactly once: for the first page-1 response reporting a
    /// non-empty listing.
    pub fn init_totals(&mut self, page: &ListingPage) -> bool {
        if self.totals_initialized || page.page != 1 || page.total_elements == 0 {
            return false;
        }
        self.totals_initialized = true;
        true
    }

    pub fn ingest(&mut self, item: ReviewRecord, id_fields: &[String], pinned_label: &str) -> ItemVerdict {
        let Some(id) = review_id(&item, id_fields) else {
            return ItemVerdict::MissingId;
        };
        if self.saved_ids.contains(&id) {
            return ItemVerdict::Duplicate;
        }
        if !pinned_label.is_empty() && has_label(&item, pinned_label) {
            return ItemVerdict::Pinned;
        }
        self.saved_ids.insert(id);
        self.collected.push(item.clone());
        self.unsaved.push(item);
        ItemVerdict::Accepted
    }
}
