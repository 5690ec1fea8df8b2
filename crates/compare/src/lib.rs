//! Snapdiff image comparison
//!
//! Pure, stateless screenshot comparison used by the diff worker:
//! - `locate`: find a candidate inside a larger reference (normalized cross-correlation)
//! - `diff`: pixel-level diff with cropping and exclusion zones
//! - `render_overlay`: visualize diff pixels on a transparent raster
//! - `DiffMask`: versioned, self-describing encoding of a diff for persistence

pub mod comparator;
pub mod error;
pub mod geometry;
pub mod mask;

pub use comparator::{
    image_dimensions, load_grayscale, render_overlay, DiffResult, ImageComparator, DEFAULT_MATCH_THRESHOLD,
};
pub use error::{CompareError, Result};
pub use geometry::{ExclusionZoneSet, Pixel, Rectangle};
pub use mask::{DiffMask, MaskFormat};
