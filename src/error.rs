use std::{path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("could not read the photo: {0}")]
    InputDecode(#[from] image::ImageError),
    #[error("recognition service unavailable: {0}")]
    Capability(#[from] CapabilityError),
    #[error("malformed recognition tokens: {0}")]
    Parse(#[from] ParseError),
}

impl ScanError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ScanError::InputDecode(_) => "Could not read the photo. Please upload a JPEG or PNG image.",
            ScanError::Capability(_) | ScanError::Parse(_) => {
                "The recognition service is unavailable. Please try again later."
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("OCR engine did not answer within {0:?}")]
    Timeout(Duration),
    #[error("OCR engine crashed: {0}")]
    Crashed(String),
    #[error("OCR engine returned a malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Failed(String),
    #[error("{0}")]
    Malformed(String),
    #[error("engine gave up after {0:?}")]
    Timeout(Duration),
}

impl From<EngineError> for CapabilityError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::Failed(msg) => CapabilityError::Crashed(msg),
            EngineError::Malformed(msg) => CapabilityError::Malformed(msg),
            EngineError::Timeout(after) => CapabilityError::Timeout(after),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("token {index} has a non-finite confidence")]
    InvalidConfidence { index: usize },
    #[error("token {index} has an invalid bounding box")]
    InvalidBounds { index: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no OCR engine was configured")]
    MissingEngine,
}
