//! Error types for fs-scan-importer
//!
//! This module defines the error hierarchy for an import run:
//! - SQLite storage errors
//! - Configuration and CLI errors
//! - Worker thread errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Errors should be actionable - include context about what to do
//! - Malformed log lines are not errors; they are counted and skipped

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for an import run
#[derive(Error, Debug)]
pub enum ImportError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors while reading the scan log
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Interrupted by signal
    #[error("Import interrupted by signal")]
    Interrupted,
}

impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Database(DbError::Sqlite(err))
    }
}

impl ImportError {
    /// Status string recorded in `import_info` when a run stops on this error
    pub fn status(&self) -> &'static str {
        match self {
            ImportError::Interrupted => "interrupted",
            _ => "failed",
        }
    }
}

/// Database errors
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to create database file
    #[error("Failed to create database at '{path}': {reason}")]
    CreateFailed { path: PathBuf, reason: String },

    /// Refusing to import on top of an existing database
    #[error("Database '{path}' already exists - pass --replace to overwrite it")]
    AlreadyExists { path: PathBuf },

    /// Schema or hierarchy invariant violated
    #[error("Database schema error: {0}")]
    Schema(String),
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid lines-per-batch
    #[error("Invalid batch line count {size}: must be between {min} and {max}")]
    InvalidBatchLines { size: usize, min: usize, max: usize },

    /// Invalid directories-per-flush
    #[error("Invalid batch size {size}: must be between {min} and {max}")]
    InvalidBatchSize { size: usize, min: usize, max: usize },

    /// Invalid queue factor
    #[error("Invalid queue factor {factor}: must be between 1 and {max}")]
    InvalidQueueFactor { factor: usize, max: usize },

    /// Input log does not exist
    #[error("Input file '{path}' not found")]
    InputNotFound { path: PathBuf },

    /// Output path error
    #[error("Invalid output path '{path}': {reason}")]
    InvalidOutputPath { path: PathBuf, reason: String },

    /// Unknown --format value
    #[error("Unknown format '{format}' (available: {available})")]
    UnknownFormat { format: String, available: String },

    /// No parser recognizes the input file name
    #[error("Cannot detect log format of '{path}' - pass --format explicitly")]
    UndetectedFormat { path: PathBuf },

    /// Filesystem name neither given nor derivable from the file name
    #[error("Cannot determine filesystem name from '{path}' - pass --filesystem explicitly")]
    MissingFilesystem { path: PathBuf },

    /// Malformed --scan-date
    #[error("Invalid scan date '{value}': expected YYYY-MM-DD")]
    InvalidScanDate { value: String },
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked while processing a batch
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// Thread could not be spawned
    #[error("Failed to spawn {role} thread: {reason}")]
    SpawnFailed { role: String, reason: String },

    /// Reader thread panicked
    #[error("Reader thread panicked")]
    ReaderPanicked,

    /// All workers died
    #[error("All workers have terminated unexpectedly")]
    AllWorkersDead,
}

/// Result type alias for ImportError
pub type Result<T> = std::result::Result<T, ImportError>;

/// Result type alias for DbError
pub type DbResult<T> = std::result::Result<T, DbError>;
