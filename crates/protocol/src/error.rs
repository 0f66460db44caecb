/// Errors produced while encoding or decoding wire frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame too large ({size} bytes, limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has an empty kind")]
    MissingKind,
}
