//! # Google Drive Provider
//!
//! Implements `StorageProvider` trait for Google Drive API v3.
//!
//! ## Overview
//!
//! This module provides:
//! - Folder listing filtered by MIME prefix, oldest first
//! - Parent reads and add/remove parent updates, which is how a file moves
//!   between folders
//! - Streaming media downloads
//! - Rate limiting and exponential backoff

pub mod connector;
pub mod error;
pub mod types;

pub use connector::{GoogleDriveConnector, DRIVE_API_BASE};
pub use error::{GoogleDriveError, Result};
