pub mod core;
pub mod features;
pub mod http;
pub mod nlp;
pub mod scraping;
pub mod tools;

// --- Primary core exports ---
pub use core::config::ScoutConfig;
pub use core::error::{FetchError, QueryError};
pub use core::types;
pub use core::types::*;
pub use core::AppState;

pub use features::{antibot, captcha};
pub use tools::search::{ListingSearch, Orchestrator};
pub use tools::{batch_search, search};
