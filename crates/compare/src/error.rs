//! Error types for image comparison

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompareError {
    #[error("{role} file {} does not exist", path.display())]
    MissingFile { role: &'static str, path: PathBuf },

    #[error(
        "Reference picture must be greater than image to find: reference {reference_width}x{reference_height}, image {image_width}x{image_height}"
    )]
    SizeMismatch {
        reference_width: u32,
        reference_height: u32,
        image_width: u32,
        image_height: u32,
    },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Diff mask encoding error: {0}")]
    Encoding(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompareError {
    pub(crate) fn missing_reference(path: impl Into<PathBuf>) -> Self {
        Self::MissingFile { role: "Reference", path: path.into() }
    }

    pub(crate) fn missing_image(path: impl Into<PathBuf>) -> Self {
        Self::MissingFile { role: "Image", path: path.into() }
    }

    /// Whether this error only means a raster is not there yet
    pub fn is_missing_file(&self) -> bool {
        matches!(self, Self::MissingFile { .. })
    }
}

pub type Result<T> = std::result::Result<T, CompareError>;
