//! Diff worker
//!
//! A single background task per process drains the job queue and runs the
//! compute step for each job on the blocking pool. `DiffService` owns the
//! current worker and recreates it on demand after a stop.

use crate::computer::{DiffComputer, DiffJob};
use parking_lot::Mutex;
use snapdiff_common::{Error, Result, Snapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A running diff worker
pub struct DiffWorker {
    id: Uuid,
    jobs: mpsc::UnboundedSender<DiffJob>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DiffWorker {
    /// Spawn the background loop on the current tokio runtime
    fn spawn(computer: Arc<DiffComputer>, poll_interval: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::WorkerUnavailable(format!("no tokio runtime: {}", e)))?;

        let id = Uuid::new_v4();
        let (jobs, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handle = runtime.spawn(run(id, receiver, cancel.clone(), computer, poll_interval));

        Ok(Self {
            id,
            jobs,
            cancel,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.jobs.is_closed()
    }

    /// Queue a job. Hands the job back if this worker no longer accepts jobs.
    fn enqueue(&self, job: DiffJob) -> std::result::Result<(), DiffJob> {
        self.jobs.send(job).map_err(|e| e.0)
    }

    /// Ask the loop to stop and wait until it has drained its queue and exited
    async fn shutdown(&self) {
        self.cancel.cancel();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Diff worker {} exited abnormally: {}", self.id, e);
            }
        }
    }
}

/// The worker loop: swap out everything queued, compute it, sleep, repeat
async fn run(
    id: Uuid,
    mut jobs: mpsc::UnboundedReceiver<DiffJob>,
    cancel: CancellationToken,
    computer: Arc<DiffComputer>,
    poll_interval: Duration,
) {
    info!("Diff worker {} started", id);

    loop {
        let batch = drain(&mut jobs);
        if !batch.is_empty() {
            debug!("Diff worker {} processing {} jobs", id, batch.len());
            for job in batch {
                run_job(&computer, job).await;
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    // Jobs sent before the channel closed are still ours
    jobs.close();
    for job in drain(&mut jobs) {
        run_job(&computer, job).await;
    }

    info!("Diff worker {} stopped", id);
}

fn drain(jobs: &mut mpsc::UnboundedReceiver<DiffJob>) -> Vec<DiffJob> {
    let mut batch = Vec::new();
    while let Ok(job) = jobs.try_recv() {
        batch.push(job);
    }
    batch
}

/// Run one job, isolating any failure to that job
async fn run_job(computer: &Arc<DiffComputer>, job: DiffJob) {
    match compute_blocking(computer.clone(), job).await {
        Ok(snapshot) => {
            if snapshot.has_error() {
                debug!("Diff job {} finished with error: {}", job, snapshot.computing_error);
            }
        }
        Err(e) => error!("Diff job {} failed: {}", job, e),
    }
}

async fn compute_blocking(computer: Arc<DiffComputer>, job: DiffJob) -> Result<Snapshot> {
    let worker = computer.clone();
    match tokio::task::spawn_blocking(move || worker.compute(&job)).await {
        Ok(result) => result,
        Err(e) => {
            let message = format!("diff computation aborted: {}", e);
            let recorder = computer.clone();
            let record = tokio::task::spawn_blocking(move || recorder.record_failure(&job, &message)).await;
            if let Ok(Err(record_err)) = record {
                warn!("Could not record failure of diff job {}: {}", job, record_err);
            }
            Err(Error::Internal(format!("diff job {} panicked: {}", job, e)))
        }
    }
}

/// Owner of the process-wide diff worker.
///
/// Exactly one worker is running at a time. After `stop`, the next
/// `get_or_create` starts a fresh worker with a new identity.
pub struct DiffService {
    computer: Arc<DiffComputer>,
    poll_interval: Duration,
    current: Mutex<Option<Arc<DiffWorker>>>,
}

impl DiffService {
    pub fn new(computer: Arc<DiffComputer>, poll_interval: Duration) -> Self {
        Self {
            computer,
            poll_interval,
            current: Mutex::new(None),
        }
    }

    /// Start the worker. No-op if one is already running.
    pub fn start(&self) -> Result<Arc<DiffWorker>> {
        self.get_or_create()
    }

    /// Stop the current worker, waiting until its loop has exited
    pub async fn stop(&self) {
        let worker = self.current.lock().take();
        if let Some(worker) = worker {
            info!("Stopping diff worker {}", worker.id());
            worker.shutdown().await;
        }
    }

    /// The running worker, created and started if there is none
    pub fn get_or_create(&self) -> Result<Arc<DiffWorker>> {
        let mut current = self.current.lock();
        if let Some(worker) = current.as_ref() {
            if worker.is_running() {
                return Ok(worker.clone());
            }
        }

        let worker = Arc::new(DiffWorker::spawn(self.computer.clone(), self.poll_interval)?);
        *current = Some(worker.clone());
        Ok(worker)
    }

    /// The running worker, if any
    pub fn current(&self) -> Option<Arc<DiffWorker>> {
        self.current.lock().clone().filter(|worker| worker.is_running())
    }

    pub fn is_running(&self) -> bool {
        self.current().is_some()
    }

    /// Submit a diff job.
    ///
    /// The candidate is marked as not computed before anything else. A
    /// synchronous job is computed before this returns; otherwise the job is
    /// queued and this returns immediately.
    pub async fn add_job(&self, job: DiffJob, synchronous: bool) -> Result<()> {
        self.computer.store().set_computed(job.candidate_id, false)?;

        if synchronous {
            self.compute_now(job).await?;
            return Ok(());
        }

        let worker = self.get_or_create()?;
        if let Err(job) = worker.enqueue(job) {
            // lost a race with stop(): hand the job to the next worker
            debug!("Diff worker {} closed, rerouting job {}", worker.id(), job);
            self.get_or_create()?
                .enqueue(job)
                .map_err(|job| Error::WorkerUnavailable(format!("cannot queue diff job {}", job)))?;
        }

        debug!("Queued diff job {}", job);
        Ok(())
    }

    /// Run the compute step now, bypassing the queue
    pub async fn compute_now(&self, job: DiffJob) -> Result<Snapshot> {
        compute_blocking(self.computer.clone(), job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapdiff_common::{Database, ExcludeZone, Lineage, NewSnapshot, SnapshotStore};
    use snapdiff_compare::{ImageComparator, MaskFormat, Rectangle};

    fn service() -> (Arc<Database>, DiffService) {
        let db = Arc::new(Database::open_memory().unwrap());
        let computer = Arc::new(DiffComputer::new(db.clone(), ImageComparator::new(), MaskFormat::Pixels));
        (db, DiffService::new(computer, Duration::from_millis(10)))
    }

    fn job(db: &Database) -> DiffJob {
        let lineage = Lineage {
            test_case_name: "search".to_string(),
            step_id: 1,
            environment_id: 1,
            version_id: 1,
            browser: "chrome".to_string(),
            display_name: "results".to_string(),
        };
        let reference = db.insert(&NewSnapshot::new(lineage.clone()).computed(true)).unwrap();
        let candidate = db
            .insert(&NewSnapshot::new(lineage).with_reference(Some(reference.id)))
            .unwrap();
        DiffJob::new(reference.id, candidate.id)
    }

    #[derive(Clone, Copy)]
    enum Fault {
        ZonesFail,
        CandidateUnreadable,
        PanicOnGet,
    }

    /// A database with one injected failure
    struct FaultyStore {
        db: Database,
        fault: Fault,
    }

    impl SnapshotStore for FaultyStore {
        fn insert(&self, snapshot: &NewSnapshot) -> Result<Snapshot> {
            self.db.insert(snapshot)
        }

        fn get(&self, id: i64) -> Result<Option<Snapshot>> {
            match self.fault {
                Fault::CandidateUnreadable => Err(Error::Internal(format!("row {} unreadable", id))),
                Fault::PanicOnGet => panic!("store crashed reading {}", id),
                Fault::ZonesFail => self.db.get(id),
            }
        }

        fn save(&self, snapshot: &Snapshot) -> Result<()> {
            self.db.save(snapshot)
        }

        fn set_computed(&self, id: i64, computed: bool) -> Result<()> {
            self.db.set_computed(id, computed)
        }

        fn mark_failed(&self, id: i64, message: &str) -> Result<()> {
            self.db.mark_failed(id, message)
        }

        fn delete(&self, id: i64) -> Result<bool> {
            self.db.delete(id)
        }

        fn exclude_zones(&self, snapshot_id: i64) -> Result<Vec<ExcludeZone>> {
            match self.fault {
                Fault::ZonesFail => Err(Error::Internal(format!("zones of {} unavailable", snapshot_id))),
                _ => self.db.exclude_zones(snapshot_id),
            }
        }

        fn add_exclude_zone(&self, snapshot_id: i64, rect: Rectangle) -> Result<ExcludeZone> {
            self.db.add_exclude_zone(snapshot_id, rect)
        }

        fn lineage_snapshots(&self, lineage: &Lineage) -> Result<Vec<Snapshot>> {
            self.db.lineage_snapshots(lineage)
        }

        fn dependents(&self, reference_id: i64) -> Result<Vec<Snapshot>> {
            self.db.dependents(reference_id)
        }

        fn latest_reference(&self, lineage: &Lineage, below_id: Option<i64>) -> Result<Option<Snapshot>> {
            self.db.latest_reference(lineage, below_id)
        }

        fn latest_reference_in_previous_versions(&self, lineage: &Lineage) -> Result<Option<Snapshot>> {
            self.db.latest_reference_in_previous_versions(lineage)
        }

        fn pending(&self) -> Result<Vec<Snapshot>> {
            self.db.pending()
        }
    }

    fn faulty_service(fault: Fault) -> (Arc<FaultyStore>, DiffService) {
        let store = Arc::new(FaultyStore {
            db: Database::open_memory().unwrap(),
            fault,
        });
        let computer = Arc::new(DiffComputer::new(store.clone(), ImageComparator::new(), MaskFormat::Pixels));
        (store, DiffService::new(computer, Duration::from_millis(10)))
    }

    #[test]
    fn test_no_runtime_is_unavailable() {
        let (_db, service) = service();
        assert!(matches!(service.get_or_create(), Err(Error::WorkerUnavailable(_))));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (_db, service) = service();
        assert!(!service.is_running());

        let first = service.start().unwrap();
        let second = service.start().unwrap();
        assert_eq!(first.id(), second.id());
        assert!(service.is_running());

        service.stop().await;
        assert!(!service.is_running());
        assert!(!first.is_running());
    }

    #[tokio::test]
    async fn test_stop_drains_queue() {
        let (db, service) = service();
        let jobs: Vec<DiffJob> = (0..5).map(|_| job(&db)).collect();

        for job in &jobs {
            service.add_job(*job, false).await.unwrap();
        }
        service.stop().await;

        for job in jobs {
            assert!(db.require(job.candidate_id).unwrap().computed);
        }
    }

    #[tokio::test]
    async fn test_compute_now_bypasses_queue() {
        let (db, service) = service();
        let job = job(&db);

        let snapshot = service.compute_now(job).await.unwrap();
        assert!(snapshot.computed);
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_store_read_failure_still_marks_computed() {
        let (store, service) = faulty_service(Fault::ZonesFail);
        let job = job(&store.db);

        service.add_job(job, false).await.unwrap();
        service.stop().await;

        let candidate = store.db.require(job.candidate_id).unwrap();
        assert!(candidate.computed);
        assert!(candidate.computing_error.contains("unavailable"));
        assert_eq!(candidate.reference_id, Some(job.reference_id));
    }

    #[tokio::test]
    async fn test_unreadable_candidate_is_marked_failed() {
        let (store, service) = faulty_service(Fault::CandidateUnreadable);
        let job = job(&store.db);

        assert!(service.compute_now(job).await.is_err());

        let candidate = store.db.require(job.candidate_id).unwrap();
        assert!(candidate.computed);
        assert!(candidate.computing_error.contains("unreadable"));
    }

    #[tokio::test]
    async fn test_panicking_job_is_recorded() {
        let (store, service) = faulty_service(Fault::PanicOnGet);
        let first = job(&store.db);
        let second = job(&store.db);

        assert!(matches!(service.compute_now(first).await, Err(Error::Internal(_))));
        let candidate = store.db.require(first.candidate_id).unwrap();
        assert!(candidate.computed);
        assert!(candidate.computing_error.starts_with("diff computation aborted"));

        // the loop survives a panicking job
        service.add_job(first, false).await.unwrap();
        service.add_job(second, false).await.unwrap();
        service.stop().await;
        assert!(store.db.require(second.candidate_id).unwrap().computed);
    }
}
