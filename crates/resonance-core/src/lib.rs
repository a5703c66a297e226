//! Resonance Core - record model, configuration, and error handling

pub mod config;
pub mod error;
pub mod record;

pub use config::*;
pub use error::{Error, Result};
pub use record::*;
