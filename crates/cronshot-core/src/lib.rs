//! `cronshot-core`: configuration and error types shared by every cronshot crate.

pub mod config;
pub mod error;

pub use config::CronshotConfig;
pub use error::{CronshotError, Result};
