pub mod admission;
pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod format;
pub mod ingest;
pub mod rollup;
pub mod store;

pub use error::{GatewayError, Result};
