use thiserror::Error;

use steerag_core::CoreError;
use steerag_store::StoreError;

/// Errors from the sampling and generation pipeline.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid length bounds: min {min} > max {max}")]
    InvalidLengthBounds { min: usize, max: usize },

    #[error("maximum path length {0} exceeds the ceiling of 40")]
    LengthCeiling(usize),

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error("classifier has not been trained")]
    ClassifierNotTrained,
}

pub type Result<T> = std::result::Result<T, EngineError>;
