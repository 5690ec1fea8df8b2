//! Persisted diff mask encoding
//!
//! A diff mask is stored as a self-describing JSON document. The `format`
//! field tells readers which payload follows:
//!
//! ```json
//! {"format":"pixels/v1","width":4,"height":2,"pixels":[[1,0],[3,1]]}
//! {"format":"overlay-png/v1","width":4,"height":2,"png":"iVBORw0KGgo..."}
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::comparator::render_overlay;
use crate::error::{CompareError, Result};
use crate::geometry::Pixel;

/// How the diff of a candidate is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskFormat {
    /// Explicit ordered list of (x, y) pairs
    #[default]
    Pixels,
    /// Rendered transparent PNG with red diff pixels
    Overlay,
}

impl std::fmt::Display for MaskFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaskFormat::Pixels => write!(f, "pixels"),
            MaskFormat::Overlay => write!(f, "overlay"),
        }
    }
}

/// Serialized diff result attached to a candidate snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format")]
pub enum DiffMask {
    #[serde(rename = "pixels/v1")]
    Pixels {
        width: u32,
        height: u32,
        pixels: Vec<[u32; 2]>,
    },

    #[serde(rename = "overlay-png/v1")]
    OverlayPng {
        width: u32,
        height: u32,
        /// Base64 encoded PNG
        png: String,
    },
}

impl DiffMask {
    /// A mask with no diff pixels
    pub fn empty(width: u32, height: u32) -> Self {
        DiffMask::Pixels { width, height, pixels: Vec::new() }
    }

    pub fn from_pixels(width: u32, height: u32, pixels: &[Pixel]) -> Self {
        DiffMask::Pixels {
            width,
            height,
            pixels: pixels.iter().map(|p| [p.x, p.y]).collect(),
        }
    }

    pub fn overlay(width: u32, height: u32, pixels: &[Pixel]) -> Result<Self> {
        let overlay = render_overlay(width, height, pixels);
        let mut buf = Cursor::new(Vec::new());
        overlay.write_to(&mut buf, ImageFormat::Png)?;

        Ok(DiffMask::OverlayPng {
            width,
            height,
            png: STANDARD.encode(buf.into_inner()),
        })
    }

    /// Encode `pixels` according to the configured storage policy
    pub fn encode(format: MaskFormat, width: u32, height: u32, pixels: &[Pixel]) -> Result<Self> {
        match format {
            MaskFormat::Pixels => Ok(Self::from_pixels(width, height, pixels)),
            MaskFormat::Overlay => Self::overlay(width, height, pixels),
        }
    }

    pub fn format(&self) -> MaskFormat {
        match self {
            DiffMask::Pixels { .. } => MaskFormat::Pixels,
            DiffMask::OverlayPng { .. } => MaskFormat::Overlay,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            DiffMask::Pixels { width, height, .. } | DiffMask::OverlayPng { width, height, .. } => {
                (*width, *height)
            }
        }
    }

    /// Diff pixels in row-major order for overlays, stored order for pixel lists
    pub fn pixels(&self) -> Result<Vec<Pixel>> {
        match self {
            DiffMask::Pixels { pixels, .. } => Ok(pixels.iter().map(|[x, y]| Pixel::new(*x, *y)).collect()),
            DiffMask::OverlayPng { png, .. } => {
                let bytes = STANDARD
                    .decode(png)
                    .map_err(|e| CompareError::Encoding(e.to_string()))?;
                let overlay = image::load_from_memory_with_format(&bytes, ImageFormat::Png)?.to_rgba8();

                Ok(overlay
                    .enumerate_pixels()
                    .filter(|(_, _, px)| px.0[3] > 0)
                    .map(|(x, y, _)| Pixel::new(x, y))
                    .collect())
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
