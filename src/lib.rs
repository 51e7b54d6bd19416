pub mod core;
pub mod features;
pub mod scraping;
pub mod storage;
pub mod tools;

// --- Primary core exports ---
pub use core::types;
pub use core::types::*;
pub use core::{HarvestConfig, HarvestError, HarvestResult};

// --- Short module paths ---
pub use features::{antibot, block_detector, progress};
pub use tools::{browser_crawl, rest_crawl, runner, targets};
