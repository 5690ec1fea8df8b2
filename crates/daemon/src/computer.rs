//! The diff compute step
//!
//! Loads a (reference, candidate) pair from the store, compares their rasters
//! and writes the outcome back onto the candidate.

use snapdiff_common::{Error, Result, Snapshot, SnapshotStore};
use snapdiff_compare::{CompareError, DiffMask, ExclusionZoneSet, ImageComparator, MaskFormat};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A pending (reference, candidate) comparison. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiffJob {
    pub reference_id: i64,
    pub candidate_id: i64,
}

impl DiffJob {
    pub fn new(reference_id: i64, candidate_id: i64) -> Self {
        Self {
            reference_id,
            candidate_id,
        }
    }
}

impl fmt::Display for DiffJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} against {}", self.candidate_id, self.reference_id)
    }
}

/// Outcome of comparing two rasters, before it is written back
enum Outcome {
    /// A raster is missing: nothing to compare yet
    Empty,
    Diff { mask: DiffMask, too_many_diffs: bool },
}

/// Runs the compute step. Blocking: call it from a blocking context.
pub struct DiffComputer {
    store: Arc<dyn SnapshotStore>,
    comparator: ImageComparator,
    mask_format: MaskFormat,
}

impl DiffComputer {
    pub fn new(store: Arc<dyn SnapshotStore>, comparator: ImageComparator, mask_format: MaskFormat) -> Self {
        Self {
            store,
            comparator,
            mask_format,
        }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Compute the diff of a job and persist it on the candidate.
    ///
    /// Whatever happens, the candidate ends up `computed`: comparison and
    /// store read failures are recorded in `computing_error`. Only a candidate
    /// that no longer exists or a failing final write is returned as an error.
    pub fn compute(&self, job: &DiffJob) -> Result<Snapshot> {
        let mut candidate = match self.store.require(job.candidate_id) {
            Ok(candidate) => candidate,
            Err(e @ Error::NotFound { .. }) => return Err(e),
            Err(e) => {
                warn!("Cannot load candidate of diff job {}: {}", job, e);
                self.record_failure(job, &e.to_string())?;
                return Err(e);
            }
        };

        candidate.reference_id = Some(job.reference_id);

        match self.outcome(job, &candidate) {
            Ok(Outcome::Empty) => {
                debug!("Nothing to compare for {}, recording an empty diff", job);
                candidate.diff_mask = Some(DiffMask::empty(candidate.width, candidate.height));
                candidate.too_many_diffs = false;
                candidate.computing_error.clear();
            }
            Ok(Outcome::Diff { mask, too_many_diffs }) => {
                debug!("Computed diff for {} (too many diffs: {})", job, too_many_diffs);
                candidate.diff_mask = Some(mask);
                candidate.too_many_diffs = too_many_diffs;
                candidate.computing_error.clear();
            }
            Err(e) => {
                warn!("Error computing diff for {}: {}", job, e);
                candidate.computing_error = e.to_string();
            }
        }

        candidate.computed = true;
        self.store.save(&candidate)?;
        Ok(candidate)
    }

    /// Mark a job as failed when the compute step itself could not finish
    pub fn record_failure(&self, job: &DiffJob, message: &str) -> Result<()> {
        self.store.mark_failed(job.candidate_id, message)
    }

    fn outcome(&self, job: &DiffJob, candidate: &Snapshot) -> Result<Outcome> {
        let Some(reference) = self.store.get(job.reference_id)? else {
            return Ok(Outcome::Empty);
        };
        let zones = self.store.exclusion_zone_set(reference.id, candidate.id)?;
        Ok(self.compare(&reference, candidate, &zones)?)
    }

    fn compare(
        &self,
        reference: &Snapshot,
        candidate: &Snapshot,
        zones: &ExclusionZoneSet,
    ) -> std::result::Result<Outcome, CompareError> {
        let (Some(reference_path), Some(candidate_path)) = (&reference.image_path, &candidate.image_path) else {
            return Ok(Outcome::Empty);
        };

        let result = match self.comparator.diff(reference_path, candidate_path, zones) {
            Ok(result) => result,
            Err(e) if e.is_missing_file() => return Ok(Outcome::Empty),
            Err(e) => return Err(e),
        };

        let mask = DiffMask::encode(self.mask_format, result.width, result.height, &result.pixels)?;

        Ok(Outcome::Diff {
            too_many_diffs: result.exceeds(candidate.diff_tolerance_percent),
            mask,
        })
    }
}
