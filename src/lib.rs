pub mod chain;
pub mod config;
pub mod error;
pub mod lightning;
pub mod logging;
pub mod swap;

pub use error::{Error, ErrorCategory, Result};
