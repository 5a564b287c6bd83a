pub mod browser_manager;
pub mod extractor;
pub mod interaction;
pub mod stealth;
pub mod strategy;
