//! Unified application error.
//!
//! Every layer (ledger, alert engine, dispense flow, repositories, config)
//! fails through this one taxonomy so callers can match on the failure kind
//! instead of string contents.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Insufficient stock (have {have}, requested {requested})")]
    InsufficientStock { have: i64, requested: i64 },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Config error: {message}")]
    Config { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Notification error: {message}")]
    Notify { message: String },
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse { message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn notify(message: impl Into<String>) -> Self {
        Self::Notify { message: message.into() }
    }
}
