//! Reference chain maintenance
//!
//! Decides which snapshot of a lineage is the reference and keeps the
//! `reference` pointers consistent when a reference is promoted, demoted or
//! deleted. Pointer changes are persisted before any recomputation is queued.

use crate::computer::DiffJob;
use crate::worker::DiffService;
use snapdiff_common::{
    Error, ExcludeZone, Lineage, NewSnapshot, Result, Snapshot, SnapshotRole, SnapshotStore,
};
use snapdiff_compare::Rectangle;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ReferenceChain {
    store: Arc<dyn SnapshotStore>,
    worker: Arc<DiffService>,
    search_previous_versions: bool,
}

impl ReferenceChain {
    pub fn new(store: Arc<dyn SnapshotStore>, worker: Arc<DiffService>) -> Self {
        Self {
            store,
            worker,
            search_previous_versions: true,
        }
    }

    pub fn with_previous_versions(mut self, enabled: bool) -> Self {
        self.search_previous_versions = enabled;
        self
    }

    /// Later snapshots of the anchor's lineage that point to it, up to the
    /// next reference of the lineage.
    pub fn snapshots_until_next_ref(&self, anchor: &Snapshot) -> Result<Vec<Snapshot>> {
        self.chain_after(&anchor.lineage, anchor.id, anchor.id)
    }

    /// Snapshots of `lineage` after `after_id` pointing to `reference_id`,
    /// stopping at the first reference
    fn chain_after(&self, lineage: &Lineage, after_id: i64, reference_id: i64) -> Result<Vec<Snapshot>> {
        Ok(self
            .store
            .lineage_snapshots(lineage)?
            .into_iter()
            .filter(|snapshot| snapshot.id > after_id)
            .take_while(|snapshot| !snapshot.is_reference())
            .filter(|snapshot| snapshot.reference_id == Some(reference_id))
            .collect())
    }

    /// Make a candidate the reference of its lineage
    pub async fn promote(&self, id: i64) -> Result<Snapshot> {
        let mut snapshot = self.store.require(id)?;
        let Some(previous) = snapshot.reference_id else {
            return Err(invalid_transition(&snapshot, SnapshotRole::Reference));
        };

        let downstream = self.chain_after(&snapshot.lineage, snapshot.id, previous)?;

        snapshot.reference_id = None;
        snapshot.diff_mask = None;
        snapshot.too_many_diffs = false;
        snapshot.computed = true;
        snapshot.computing_error.clear();
        self.store.save(&snapshot)?;

        let zones = self.store.copy_exclude_zones(previous, snapshot.id)?;
        info!(
            "Snapshot {} promoted to reference (was {}), {} exclude zones copied",
            snapshot.id,
            previous,
            zones.len()
        );

        self.repoint(downstream, snapshot.id).await?;
        Ok(snapshot)
    }

    /// Turn a reference back into a candidate of the previous reference.
    ///
    /// The first reference of a lineage has nothing to fall back to and is left alone.
    pub async fn demote(&self, id: i64) -> Result<Snapshot> {
        let mut snapshot = self.store.require(id)?;
        if !snapshot.is_reference() {
            return Err(invalid_transition(&snapshot, SnapshotRole::Candidate));
        }

        let Some(found) = self.store.latest_reference(&snapshot.lineage, Some(snapshot.id))? else {
            info!("Snapshot {} is the first reference of its lineage, not demoted", snapshot.id);
            return Ok(snapshot);
        };

        let downstream = self.snapshots_until_next_ref(&snapshot)?;

        snapshot.reference_id = Some(found.id);
        snapshot.computed = false;
        self.store.save(&snapshot)?;
        self.repoint(downstream, found.id).await?;

        let snapshot = self.worker.compute_now(DiffJob::new(found.id, snapshot.id)).await?;
        info!("Snapshot {} demoted, now compared to {}", snapshot.id, found.id);
        Ok(snapshot)
    }

    /// Repair the chain before a reference is deleted.
    ///
    /// The earliest dependent becomes the new reference and the other
    /// dependents are re-pointed to it. Returns the new reference, if any.
    pub async fn repair_on_delete(&self, id: i64) -> Result<Option<Snapshot>> {
        let deleted = self.store.require(id)?;
        if !deleted.is_reference() {
            return Err(Error::InvalidStateTransition {
                from: deleted.role().to_string(),
                to: "deleted reference".to_string(),
            });
        }

        let mut dependents = self.store.dependents(deleted.id)?.into_iter();
        let Some(mut reference) = dependents.next() else {
            return Ok(None);
        };

        reference.reference_id = None;
        reference.diff_mask = None;
        reference.too_many_diffs = false;
        reference.computed = true;
        reference.computing_error.clear();
        self.store.save(&reference)?;
        self.store.copy_exclude_zones(deleted.id, reference.id)?;
        info!(
            "Snapshot {} replaces deleted reference {}",
            reference.id, deleted.id
        );

        self.repoint(dependents.collect(), reference.id).await?;
        Ok(Some(reference))
    }

    /// Delete a snapshot, repairing the chain first if it is a reference
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let snapshot = self.store.require(id)?;
        if snapshot.is_reference() {
            self.repair_on_delete(id).await?;
        }
        self.store.delete(id)
    }

    /// Store a new capture against the current reference of its lineage.
    ///
    /// Without a reference the capture becomes the lineage's first reference.
    pub async fn ingest(&self, capture: NewSnapshot) -> Result<Snapshot> {
        let mut reference = self.store.latest_reference(&capture.lineage, None)?;
        if reference.is_none() && self.search_previous_versions {
            reference = self.store.latest_reference_in_previous_versions(&capture.lineage)?;
        }

        match reference {
            Some(reference) => {
                let snapshot = self.store.insert(
                    &capture.with_reference(Some(reference.id)).computed(false),
                )?;
                self.worker
                    .add_job(DiffJob::new(reference.id, snapshot.id), false)
                    .await?;
                debug!("Ingested snapshot {} against reference {}", snapshot.id, reference.id);
                Ok(snapshot)
            }
            None => {
                let snapshot = self.store.insert(&capture.with_reference(None).computed(true))?;
                info!("Ingested snapshot {} as first reference of {}", snapshot.id, snapshot.lineage);
                Ok(snapshot)
            }
        }
    }

    /// Recompute a candidate now and queue every snapshot sharing its reference.
    ///
    /// Returns false for a reference, which has nothing to recompute.
    pub async fn recompute(&self, id: i64) -> Result<bool> {
        let snapshot = self.store.require(id)?;
        let Some(reference_id) = snapshot.reference_id else {
            return Ok(false);
        };

        self.worker.compute_now(DiffJob::new(reference_id, snapshot.id)).await?;

        for other in self.store.dependents(reference_id)? {
            if other.id != snapshot.id {
                self.worker.add_job(DiffJob::new(reference_id, other.id), false).await?;
            }
        }
        Ok(true)
    }

    pub fn add_exclude_zone(&self, snapshot_id: i64, rect: Rectangle) -> Result<ExcludeZone> {
        let zone = self.store.add_exclude_zone(snapshot_id, rect)?;
        info!("Added exclude zone {} to snapshot {}", zone, snapshot_id);
        Ok(zone)
    }

    /// Point every snapshot to `reference_id`, persist, then queue its recomputation
    async fn repoint(&self, mut snapshots: Vec<Snapshot>, reference_id: i64) -> Result<()> {
        for snapshot in &mut snapshots {
            snapshot.reference_id = Some(reference_id);
            snapshot.computed = false;
            self.store.save(snapshot)?;
        }

        for snapshot in &snapshots {
            self.worker
                .add_job(DiffJob::new(reference_id, snapshot.id), false)
                .await?;
        }
        Ok(())
    }
}

fn invalid_transition(snapshot: &Snapshot, to: SnapshotRole) -> Error {
    Error::InvalidStateTransition {
        from: format!("{} {}", snapshot.role(), snapshot.id),
        to: to.to_string(),
    }
}
