//! Error types for the Atrium plugin host core.
//!
//! All errors implement `std::error::Error` and carry enough context to be
//! logged or surfaced to an embedding application.

use thiserror::Error;

/// Result type alias using [`CoreError`] as the error type.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Event bus errors
    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    /// Internal errors that shouldn't normally occur
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while loading or validating the host configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Errors raised by the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// Waiting for an event timed out
    #[error("Timeout waiting for event '{event}' after {timeout_ms}ms")]
    Timeout { event: String, timeout_ms: u64 },

    /// The bus was torn down while a waiter was pending
    #[error("Event bus closed while waiting for '{event}'")]
    Closed { event: String },
}
