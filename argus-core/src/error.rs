use thiserror::Error;

pub type ArgusResult<T> = Result<T, ArgusError>;

#[derive(Error, Debug)]
pub enum ArgusError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Segment has unrecognized format: {0}")]
    SegmentFormat(String),

    #[error("Segment failed authenticated decryption: {path}")]
    SegmentCorrupt { path: String },

    #[error("Upload rejected with HTTP {status}")]
    UploadRejected { status: u16 },

    #[error("{0}")]
    Other(String),
}
