use thiserror::Error;

use crate::config::ConfigError;
use crate::tree::NodeId;

#[derive(Error, Debug)]
pub enum AnnotatorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },

    #[error("Stale node handle: {0:?}")]
    StaleNode(NodeId),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Required element missing: {0}")]
    MissingElement(String),

    #[error("Pass `{pass}` failed: {reason}")]
    PassFailed { pass: String, reason: String },

    #[error("Pass ordering error: {0}")]
    PassOrder(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl AnnotatorError {
    pub fn pass_failed(pass: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PassFailed {
            pass: pass.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnnotatorError>;
