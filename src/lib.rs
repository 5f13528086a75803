pub mod api;
pub mod app;
pub mod config;
pub mod election;
pub mod error;
pub mod ingestion;
pub mod interfaces;
pub mod observability;
pub mod price_infra;
pub mod propagation;
pub mod store;
pub mod types;
pub mod utils;

pub use app::RelayNode;
pub use error::{Error, Result};
