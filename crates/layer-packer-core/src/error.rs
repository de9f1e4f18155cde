use thiserror::Error;

use crate::model::Rect;

#[derive(Debug, Error)]
pub enum LayerPackerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("Rectangle {rect:?} lies outside the {width}x{height} layer")]
    OutOfBounds { rect: Rect, width: u32, height: u32 },
    #[error("Unable to load image [{key}]: {reason}")]
    ImageLoad { key: String, reason: String },
    #[error("Unsupported channel count {0} (expected 3 or 4)")]
    UnsupportedChannels(u8),
    #[error("[{call}] failed: {reason}")]
    Upload { call: &'static str, reason: String },
    #[error("Unknown texture array handle {0}")]
    UnknownArray(u32),
}

pub type Result<T> = std::result::Result<T, LayerPackerError>;
