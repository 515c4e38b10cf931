//! # VendHub Core
//! Configuration, errors and domain types shared by every VendHub crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::VendHubConfig;
pub use error::{Result, VendHubError};
pub use types::{Actor, Role};
