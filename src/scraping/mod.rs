pub mod browser_manager;
pub mod cdp_driver;
pub mod stealth;
