//! Error handling for scope-pipeline
//!
//! This module defines the crate-level error type and a Result alias used by
//! configuration loading, ingestion and the demo binary. Stage outcomes inside
//! the runtime are reported through [`crate::pipeline::StageResult`] instead.

use crate::ingest::wire::WireError;
use crate::pipeline::PipelineError;
use thiserror::Error;

/// Main error type for scope-pipeline operations
#[derive(Error, Debug)]
pub enum ScopeError {
    /// Errors related to configuration loading/saving/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised by the pipeline runtime
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Errors decoding or encoding wire frames
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ScopeError>,
    },
}

impl ScopeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ScopeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<toml::de::Error> for ScopeError {
    fn from(err: toml::de::Error) -> Self {
        ScopeError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for ScopeError {
    fn from(err: toml::ser::Error) -> Self {
        ScopeError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ScopeError {
    fn from(err: serde_json::Error) -> Self {
        ScopeError::Serialization(err.to_string())
    }
}

/// Result type alias for scope-pipeline operations
pub type Result<T> = std::result::Result<T, ScopeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<ScopeError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScopeError::Config("queue capacity must be non-zero".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: queue capacity must be non-zero"
        );
    }

    #[test]
    fn test_error_with_context() {
        let err = ScopeError::Config("test".to_string());
        let with_ctx = err.with_context("Failed to load pipeline config");
        assert!(with_ctx.to_string().contains("Failed to load pipeline config"));
        assert!(with_ctx.to_string().contains("test"));
    }

    #[test]
    fn test_pipeline_error_converts() {
        let err: ScopeError = PipelineError::EmptyPipeline.into();
        assert!(matches!(err, ScopeError::Pipeline(_)));
    }

    #[test]
    fn test_io_result_context() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = res.context("reading config").unwrap_err();
        assert!(err.to_string().starts_with("reading config"));
    }
}
