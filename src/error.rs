//! Error types for rust-relschema

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while deriving a relational model set
#[derive(Error, Debug)]
pub enum RelSchemaError {
    #[error("Failed to read schema file: {path}")]
    SchemaFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse schema file: {path}")]
    SchemaParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid schema pattern: {pattern}")]
    SchemaPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// A required ApiSchema field is missing, null, or has the wrong JSON type.
    #[error("Invalid ApiSchema input: {message}")]
    SchemaInput { message: String },

    #[error("Invalid JSONPath '{path}': {message}")]
    InvalidJsonPath { path: String, message: String },

    /// Cross-resource consistency could not be established.
    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },

    #[error("{message}")]
    IdentifierCollision { message: String },

    #[error("Constraint derivation failed: {message}")]
    ConstraintDerivation { message: String },

    #[error("Failed to write manifest to {path}")]
    ManifestWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize manifest: {message}")]
    ManifestSerialize { message: String },
}

impl RelSchemaError {
    pub fn schema_input(message: impl Into<String>) -> Self {
        RelSchemaError::SchemaInput {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        RelSchemaError::InvariantViolation {
            message: message.into(),
        }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        RelSchemaError::ConstraintDerivation {
            message: message.into(),
        }
    }

    /// Message without the category prefix, for joining several failures into one.
    pub fn message(&self) -> String {
        match self {
            RelSchemaError::SchemaInput { message }
            | RelSchemaError::InvariantViolation { message }
            | RelSchemaError::IdentifierCollision { message }
            | RelSchemaError::ConstraintDerivation { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Result alias used throughout the derivation core
pub type Result<T> = std::result::Result<T, RelSchemaError>;
