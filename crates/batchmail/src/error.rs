use std::path::PathBuf;
use thiserror::Error;

use crate::mail::MailError;
use crate::oauth::OAuthError;
use crate::recipients::CsvError;
use crate::secrets::SecretError;
use crate::template::TemplateError;
use crate::workflow::WorkflowError;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("OAuth error: {0}")]
    OAuth(#[from] OAuthError),

    #[error("Recipient list error: {0}")]
    Recipients(#[from] CsvError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
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

    #[error("Failed to resolve '{name}': {source}")]
    Secret {
        name: String,
        #[source]
        source: SecretError,
    },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Unable to read DOCX file: {0}")]
    DocxProcessing(String),

    #[error("Text extraction failed: {0}")]
    TextExtraction(String),
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

    #[error("Failed to serialize store contents: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to encrypt store contents: {0}")]
    Encryption(#[source] SecretError),
}

pub type Result<T> = std::result::Result<T, BatchError>;
