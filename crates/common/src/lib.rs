//! Common types and utilities for the G6 platform
//!
//! This crate provides shared types used across all G6 crates.
//!
//! # Modules
//!
//! - [`error`] - Common error types
//! - [`types`] - Shared domain types (option chains, health reports, market status)

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
