use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CreatflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),

    #[error("Orchestration error: {0}")]
    Orchestrator(#[from] crate::orchestrator::OrchestratorError),

    #[error("AI provider error: {0}")]
    Ai(#[from] crate::ai::AiError),

    #[error("Monitoring error: {0}")]
    Monitor(#[from] crate::monitor::MonitorError),

    #[error("Worker error: {0}")]
    Worker(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid task override '{task}': {reason}")]
    InvalidTaskOverride { task: String, reason: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete file '{path}': {source}")]
    DeleteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path '{0}' is outside the upload directory")]
    OutsideRoot(PathBuf),

    #[error("Storage path '{0}' escapes the upload directory")]
    Traversal(String),
}

pub type Result<T> = std::result::Result<T, CreatflowError>;
