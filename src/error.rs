use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoryboardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Image generation failed due to safety filters. Please modify your prompt. ({0})")]
    SafetyFilter(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A single chunk failed while building a plan; the whole plan is discarded.
    #[error("Plan generation failed on chunk {index} of {total}: {source}")]
    ChunkFailed {
        index: usize,
        total: usize,
        #[source]
        source: Box<StoryboardError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image decode error: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, StoryboardError>;
