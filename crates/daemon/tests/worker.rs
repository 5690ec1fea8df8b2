//! Diff worker lifecycle tests

mod common;

use common::{lineage, Fixture};
use snapdiff_common::SnapshotStore;
use snapdiff_daemon::DiffJob;
use std::time::Duration;

#[tokio::test]
async fn test_synchronous_job_is_computed_on_return() {
    let fx = Fixture::new();
    let lineage = lineage("header");
    let reference = fx.reference(&lineage, Some(fx.image("ref.png", &[])));
    let candidate = fx.candidate(&lineage, reference.id, Some(fx.image("cand.png", &[(5, 5), (6, 5)])));

    fx.engine
        .service()
        .add_job(DiffJob::new(reference.id, candidate.id), true)
        .await
        .unwrap();

    let snapshot = fx.get(candidate.id);
    assert!(snapshot.computed);
    assert!(snapshot.too_many_diffs);
    assert_eq!(snapshot.diff_mask.unwrap().pixels().unwrap().len(), 2);
}

#[tokio::test]
async fn test_async_job_marks_candidate_stale_first() {
    let fx = Fixture::with_config(|config| config.worker.poll_interval_ms = 60_000);
    let lineage = lineage("header");
    let reference = fx.reference(&lineage, Some(fx.image("ref.png", &[])));
    let candidate = fx.candidate(&lineage, reference.id, Some(fx.image("cand.png", &[])));
    let job = DiffJob::new(reference.id, candidate.id);

    fx.engine.service().compute_now(job).await.unwrap();
    assert!(fx.get(candidate.id).computed);

    // let the first poll run; the next one is a minute away
    fx.engine.service().start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    fx.engine.service().add_job(job, false).await.unwrap();
    assert!(!fx.get(candidate.id).computed);

    fx.engine.shutdown().await;
    assert!(fx.get(candidate.id).computed);
}

#[tokio::test]
async fn test_restart_yields_new_worker_without_job_loss() {
    let fx = Fixture::new();
    let service = fx.engine.service();
    let lineage = lineage("footer");
    let reference = fx.reference(&lineage, Some(fx.image("ref.png", &[])));

    let first = service.get_or_create().unwrap();
    service.stop().await;
    assert!(!first.is_running());

    let second = service.get_or_create().unwrap();
    assert_ne!(first.id(), second.id());

    let candidates: Vec<i64> = (0..4)
        .map(|i| {
            let image = fx.image(&format!("cand{}.png", i), &[(i, 0)]);
            fx.candidate(&lineage, reference.id, Some(image)).id
        })
        .collect();

    for &id in &candidates {
        service.add_job(DiffJob::new(reference.id, id), false).await.unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while candidates.iter().any(|&id| !fx.get(id).computed) {
        assert!(tokio::time::Instant::now() < deadline, "jobs were not processed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    service.stop().await;
    for id in candidates {
        let snapshot = fx.get(id);
        assert_eq!(snapshot.diff_mask.unwrap().pixels().unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_add_job_after_stop_starts_a_worker() {
    let fx = Fixture::new();
    let service = fx.engine.service();
    let lineage = lineage("footer");
    let reference = fx.reference(&lineage, Some(fx.image("ref.png", &[])));
    let candidate = fx.candidate(&lineage, reference.id, Some(fx.image("cand.png", &[])));

    let first = service.start().unwrap();
    service.stop().await;

    service
        .add_job(DiffJob::new(reference.id, candidate.id), false)
        .await
        .unwrap();
    let current = service.current().unwrap();
    assert_ne!(current.id(), first.id());

    service.stop().await;
    assert!(fx.get(candidate.id).computed);
}

#[tokio::test]
async fn test_failing_job_does_not_stop_the_worker() {
    let fx = Fixture::new();
    let lineage = lineage("body");
    let reference = fx.reference(&lineage, Some(fx.image("ref.png", &[])));

    let corrupt = fx.dir.path().join("corrupt.png");
    std::fs::write(&corrupt, b"\x89PNG garbage").unwrap();
    let broken = fx.candidate(&lineage, reference.id, Some(corrupt));
    let healthy = fx.candidate(&lineage, reference.id, Some(fx.image("ok.png", &[(1, 1)])));

    let ghost = fx.candidate(&lineage, reference.id, None);

    let service = fx.engine.service();
    service.add_job(DiffJob::new(reference.id, 9_999), false).await.unwrap_err();

    // deleted while queued: the worker logs it and moves on
    service.add_job(DiffJob::new(reference.id, ghost.id), false).await.unwrap();
    fx.db.delete(ghost.id).unwrap();

    service.add_job(DiffJob::new(reference.id, broken.id), false).await.unwrap();
    service.add_job(DiffJob::new(reference.id, healthy.id), false).await.unwrap();
    service.stop().await;

    let broken = fx.get(broken.id);
    assert!(broken.computed);
    assert!(!broken.computing_error.is_empty());

    let healthy = fx.get(healthy.id);
    assert!(healthy.computed);
    assert!(healthy.computing_error.is_empty());
    assert!(healthy.too_many_diffs);
}

#[tokio::test]
async fn test_successful_recompute_clears_error() {
    let fx = Fixture::new();
    let lineage = lineage("body");
    let reference = fx.reference(&lineage, Some(fx.image("ref.png", &[])));

    let path = fx.dir.path().join("late.png");
    std::fs::write(&path, b"not yet written").unwrap();
    let candidate = fx.candidate(&lineage, reference.id, Some(path));
    let job = DiffJob::new(reference.id, candidate.id);

    let failed = fx.engine.service().compute_now(job).await.unwrap();
    assert!(failed.has_error());

    fx.image("late.png", &[]);
    let fixed = fx.engine.service().compute_now(job).await.unwrap();
    assert!(!fixed.has_error());
    assert!(!fixed.too_many_diffs);
    assert_eq!(fx.db.require(candidate.id).unwrap(), fixed);
}
