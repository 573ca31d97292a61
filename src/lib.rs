pub mod config;
pub mod error;
pub mod indexer;
pub mod models;
pub mod proxy;
pub mod rag;
pub mod routes;

pub use error::{RagError, Result};
