use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Failed to load stock mapping from {path}: {reason}")]
    MappingLoad { path: String, reason: String },
}
