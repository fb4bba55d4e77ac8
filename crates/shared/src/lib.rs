//! Shared types, errors, and configuration for Cadence.
//!
//! This crate provides common types used across all other crates:
//! - Money types with decimal precision
//! - Typed IDs for type-safe entity references
//! - Application-wide error types
//! - Configuration management

pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, BillingConfig, DatabaseConfig, LogFormat, LoggingConfig};
pub use error::{AppError, AppResult};
