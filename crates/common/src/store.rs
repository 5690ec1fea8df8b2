//! Storage boundary for snapshots and their exclusion zones

use crate::types::{ExcludeZone, Lineage, NewSnapshot, Snapshot};
use crate::{Error, Result};
use snapdiff_compare::{ExclusionZoneSet, Rectangle};

/// Durable read/write of snapshot metadata.
///
/// Implementations must be safe to share between the diff worker and any
/// number of request handlers.
pub trait SnapshotStore: Send + Sync {
    /// Store a new snapshot and return it with its assigned id
    fn insert(&self, snapshot: &NewSnapshot) -> Result<Snapshot>;

    fn get(&self, id: i64) -> Result<Option<Snapshot>>;

    /// Persist every mutable field of an existing snapshot
    fn save(&self, snapshot: &Snapshot) -> Result<()>;

    fn set_computed(&self, id: i64, computed: bool) -> Result<()>;

    /// Mark a snapshot computed with an error, without reading the stored row
    fn mark_failed(&self, id: i64, message: &str) -> Result<()>;

    /// Delete a snapshot and its exclusion zones. Returns false if it did not exist.
    fn delete(&self, id: i64) -> Result<bool>;

    fn exclude_zones(&self, snapshot_id: i64) -> Result<Vec<ExcludeZone>>;

    fn add_exclude_zone(&self, snapshot_id: i64, rect: Rectangle) -> Result<ExcludeZone>;

    /// All snapshots of a lineage, ascending id
    fn lineage_snapshots(&self, lineage: &Lineage) -> Result<Vec<Snapshot>>;

    /// Snapshots whose reference is `reference_id`, ascending id
    fn dependents(&self, reference_id: i64) -> Result<Vec<Snapshot>>;

    /// Most recent reference of a lineage, optionally restricted to ids below `below_id`
    fn latest_reference(&self, lineage: &Lineage, below_id: Option<i64>) -> Result<Option<Snapshot>>;

    /// Most recent reference among earlier versions of a lineage, newest version first
    fn latest_reference_in_previous_versions(&self, lineage: &Lineage) -> Result<Option<Snapshot>>;

    /// Snapshots still waiting for a diff, ascending id
    fn pending(&self) -> Result<Vec<Snapshot>>;

    /// Like `get`, but a missing snapshot is an error
    fn require(&self, id: i64) -> Result<Snapshot> {
        self.get(id)?.ok_or_else(|| Error::snapshot_not_found(id))
    }

    /// Copy every exclusion zone of `from` onto `to` as new zones
    fn copy_exclude_zones(&self, from: i64, to: i64) -> Result<Vec<ExcludeZone>> {
        self.exclude_zones(from)?
            .into_iter()
            .map(|zone| self.add_exclude_zone(to, zone.rect))
            .collect()
    }

    /// Union of the zones owned by `reference` and `candidate`
    fn exclusion_zone_set(&self, reference: i64, candidate: i64) -> Result<ExclusionZoneSet> {
        let reference = self.exclude_zones(reference)?;
        let candidate = self.exclude_zones(candidate)?;
        Ok(ExclusionZoneSet::union(
            reference.iter().map(|zone| &zone.rect),
            candidate.iter().map(|zone| &zone.rect),
        ))
    }
}
