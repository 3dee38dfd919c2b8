//! Sarathi core: chat domain types, answer stream events, errors and
//! configuration shared by every crate in the workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::SarathiConfig;
pub use error::{Result, SarathiError};
pub use types::*;
