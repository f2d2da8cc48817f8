//! # ldap-object-core
//!
//! Core types shared by the LDAP object reconciliation crates.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy for directory reads, writes and attribute encoding
//! - [`config`] - Directory connection configuration with validation

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::DirectoryConfig;
pub use error::{Error, Result};
