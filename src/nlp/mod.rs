pub mod query_builder;
pub mod relevance;
