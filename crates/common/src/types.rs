//! Core types for snapdiff

use serde::{Deserialize, Serialize};
use snapdiff_compare::{DiffMask, Rectangle};
use std::path::PathBuf;

/// Identifies "the same logical screenshot" across test runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lineage {
    pub test_case_name: String,
    pub step_id: i64,
    pub environment_id: i64,
    pub version_id: i64,
    pub browser: String,
    pub display_name: String,
}

impl std::fmt::Display for Lineage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/step {}/env {}/version {}/{}/{}",
            self.test_case_name,
            self.step_id,
            self.environment_id,
            self.version_id,
            self.browser,
            self.display_name
        )
    }
}

/// Whether a snapshot is a baseline or is compared against one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotRole {
    Reference,
    Candidate,
}

impl std::fmt::Display for SnapshotRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotRole::Reference => write!(f, "reference"),
            SnapshotRole::Candidate => write!(f, "candidate"),
        }
    }
}

/// A captured or reference screenshot.
///
/// `reference_id` is a weak pointer to a strictly earlier snapshot of the
/// same lineage; `None` makes this snapshot a reference itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: i64,
    pub lineage: Lineage,
    pub image_path: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub reference_id: Option<i64>,
    pub diff_mask: Option<DiffMask>,
    pub too_many_diffs: bool,
    /// `false` means any stored diff is stale
    pub computed: bool,
    /// Empty when the last computation succeeded
    pub computing_error: String,
    pub diff_tolerance_percent: f64,
    pub created_at: i64,
}

impl Snapshot {
    pub fn is_reference(&self) -> bool {
        self.reference_id.is_none()
    }

    pub fn role(&self) -> SnapshotRole {
        if self.is_reference() {
            SnapshotRole::Reference
        } else {
            SnapshotRole::Candidate
        }
    }

    pub fn has_error(&self) -> bool {
        !self.computing_error.is_empty()
    }
}

/// A snapshot about to be stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSnapshot {
    pub lineage: Lineage,
    pub image_path: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub reference_id: Option<i64>,
    pub diff_tolerance_percent: f64,
    pub computed: bool,
}

impl NewSnapshot {
    pub fn new(lineage: Lineage) -> Self {
        Self {
            lineage,
            image_path: None,
            width: 0,
            height: 0,
            reference_id: None,
            diff_tolerance_percent: 0.0,
            computed: false,
        }
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        self.image_path = Some(path.into());
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_reference(mut self, reference_id: Option<i64>) -> Self {
        self.reference_id = reference_id;
        self
    }

    pub fn with_tolerance(mut self, percent: f64) -> Self {
        self.diff_tolerance_percent = percent;
        self
    }

    pub fn computed(mut self, computed: bool) -> Self {
        self.computed = computed;
        self
    }
}

/// A rectangle owned by exactly one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludeZone {
    pub id: i64,
    pub snapshot_id: i64,
    pub rect: Rectangle,
}

impl std::fmt::Display for ExcludeZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(x, y, width, height) = ({}, {}, {}, {})",
            self.rect.x, self.rect.y, self.rect.width, self.rect.height
        )
    }
}
