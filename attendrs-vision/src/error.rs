use std::path::PathBuf;

use image::ImageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] ImageError),

    #[error("failed to encode image {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    #[error("image has no pixels")]
    EmptyImage,

    #[error("face {width}x{height} is smaller than the {min_side}px minimum")]
    TooSmall {
        width: u32,
        height: u32,
        min_side: u32,
    },

    #[error("prepared faces differ in layout: {0}")]
    LayoutMismatch(String),

    #[error("invalid similarity configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, VisionError>;
