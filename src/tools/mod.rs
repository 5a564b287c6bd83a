pub mod batch_search;
pub mod search;
