//! Bridges to the external processing engines: the document conversion
//! command and the field-extraction HTTP API.

pub mod convert;
pub mod events;
pub mod extract;

pub use convert::{CommandConverter, ConversionOutput, ConvertOptions, DocumentConverter, OutputFormat};
pub use extract::ExtractionClient;

/// Errors from engine interactions.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("converter command not found: {0}")]
    NotFound(std::io::Error),

    #[error("conversion failed (exit code {exit_code:?}): {stderr}")]
    ConversionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("extraction request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("extraction API returned {status}: {body}")]
    ExtractionApi { status: u16, body: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine produced invalid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}
