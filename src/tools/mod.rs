pub mod browser_crawl;
pub mod rest_crawl;
pub mod runner;
pub mod targets;
