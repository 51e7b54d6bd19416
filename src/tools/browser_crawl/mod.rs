//! Browser-driven listing crawl: session state, the driver seam and the
//! pagination engine that ties them together.

pub mod driver;
pub mod engine;
pub mod session;

pub use driver::{DriverError, ListingDriver, PageSnapshot, PagerTarget, ProbeOutcome};
pub use engine::{crawl_product, CrawlReport, PaginationEngine, Terminal};
pub use session::{CrawlSession, ItemVerdict};
