//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the delivery daemon crates:
//! - Configuration loading and validation
//! - Logging and tracing initialisation
//! - Event bus for credential, session and delivery events

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
