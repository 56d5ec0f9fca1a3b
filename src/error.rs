use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Upstream connection failed: {0}")]
    UpstreamUnavailable(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),

    #[error("Invalid datasource URL '{url}': {reason}")]
    InvalidDatasource { url: String, reason: String },
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Payload of {0} bytes exceeds the 16MB packet limit")]
    PayloadTooLarge(usize),

    #[error("Incoming frame of {size} bytes exceeds configured maximum of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Unknown masking type: {0}")]
    UnknownMaskingType(String),

    #[error("Invalid column pattern for {column}: {reason}")]
    InvalidPattern { column: String, reason: String },

    #[error("Rule has an empty {0}")]
    EmptyField(&'static str),
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to start proxy: {0}")]
    StartFailed(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
