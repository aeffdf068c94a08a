//! Shared data model, repository contracts, errors and configuration for the
//! recurring-obligation scheduling engine.

pub mod config;
pub mod error;
pub mod model;
pub mod repository;

pub use config::Config;
pub use error::*;
pub use model::*;
pub use repository::*;
