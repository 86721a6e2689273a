pub mod api;
pub mod averages;
pub mod cache;
pub mod config;
pub mod data_sources;
pub mod decimal;
pub mod error;
pub mod helpers;
pub mod ingestion;
pub mod retry;
pub mod store;
