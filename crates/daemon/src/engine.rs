//! Composition root for the daemon

use crate::chain::ReferenceChain;
use crate::computer::{DiffComputer, DiffJob};
use crate::config::DaemonConfig;
use crate::worker::DiffService;
use snapdiff_common::{Database, Result, SnapshotStore};
use std::sync::Arc;
use tracing::info;

/// Store, diff service and reference chain wired together from one configuration
pub struct Engine {
    config: DaemonConfig,
    store: Arc<dyn SnapshotStore>,
    service: Arc<DiffService>,
    chain: ReferenceChain,
}

impl Engine {
    /// Build an engine over an existing store
    pub fn new(config: DaemonConfig, store: Arc<dyn SnapshotStore>) -> Self {
        let computer = Arc::new(DiffComputer::new(
            store.clone(),
            config.comparator(),
            config.diff.mask_format,
        ));
        let service = Arc::new(DiffService::new(computer, config.poll_interval()));
        let chain = ReferenceChain::new(store.clone(), service.clone())
            .with_previous_versions(config.ingest.search_previous_versions);

        Self {
            config,
            store,
            service,
            chain,
        }
    }

    /// Open the SQLite store under `config.store_path`
    pub fn open(config: DaemonConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.store_path)?;

        let db = Database::open(config.db_path())?;
        info!("Snapshot store at {:?}", config.store_path);
        Ok(Self::new(config, Arc::new(db)))
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub fn service(&self) -> &Arc<DiffService> {
        &self.service
    }

    pub fn chain(&self) -> &ReferenceChain {
        &self.chain
    }

    /// Queue every candidate left without a valid diff by a previous run.
    /// Jobs live only in memory, so they are rebuilt from the store.
    pub async fn resume_pending(&self) -> Result<usize> {
        let mut resumed = 0;
        for snapshot in self.store.pending()? {
            if let Some(reference_id) = snapshot.reference_id {
                self.service
                    .add_job(DiffJob::new(reference_id, snapshot.id), false)
                    .await?;
                resumed += 1;
            }
        }

        if resumed > 0 {
            info!("Resumed {} pending diff jobs", resumed);
        }
        Ok(resumed)
    }

    /// Stop the diff worker once its queue is drained
    pub async fn shutdown(&self) {
        self.service.stop().await;
    }
}
