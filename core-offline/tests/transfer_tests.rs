mod common;

use async_trait::async_trait;
use bridge_traits::ByteCache;
use common::{body, MemoryByteCache, Resource, ScriptedHttpClient};
use core_offline::transfer::staging_key;
use core_offline::{
    DownloadId, TransferEngine, TransferError, TransferJob, TransferObserver, TransferOutcome,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const URL: &str = "https://media.example.com/episode.mp4";

#[derive(Default)]
struct RecordingObserver {
    reports: Mutex<Vec<(u64, Option<u64>)>>,
}

impl RecordingObserver {
    fn reports(&self) -> Vec<(u64, Option<u64>)> {
        self.reports.lock().clone()
    }
}

#[async_trait]
impl TransferObserver for RecordingObserver {
    async fn chunk_staged(
        &self,
        bytes: u64,
        total: Option<u64>,
    ) -> std::result::Result<(), String> {
        self.reports.lock().push((bytes, total));
        Ok(())
    }
}

struct FailingObserver;

#[async_trait]
impl TransferObserver for FailingObserver {
    async fn chunk_staged(&self, _: u64, _: Option<u64>) -> std::result::Result<(), String> {
        Err("record store unavailable".to_string())
    }
}

fn setup(chunk_size: usize) -> (Arc<ScriptedHttpClient>, Arc<MemoryByteCache>, TransferEngine) {
    let http = ScriptedHttpClient::new(chunk_size);
    let cache = MemoryByteCache::new();
    let engine = TransferEngine::new(http.clone(), cache.clone());
    (http, cache, engine)
}

fn job(offset: u64, size: Option<u64>) -> TransferJob {
    TransferJob {
        id: DownloadId::new(),
        url: URL.to_string(),
        offset,
        size,
    }
}

#[tokio::test]
async fn test_fresh_transfer_commits_payload() {
    let (http, cache, engine) = setup(400);
    http.serve(URL, Resource::new(1000));
    let observer = RecordingObserver::default();
    let job = job(0, None);

    let outcome = engine
        .run(job.clone(), &observer, CancellationToken::new())
        .await;

    assert_eq!(outcome, TransferOutcome::Completed { bytes: 1000 });
    assert_eq!(
        observer.reports(),
        vec![(400, Some(1000)), (800, Some(1000)), (1000, Some(1000))]
    );
    assert_eq!(cache.bytes(URL), Some(body(1000)));
    assert!(!cache.contains(&staging_key(&job.id)).await.unwrap());
    assert_eq!(http.requests_for(URL), vec![None]);
}

#[tokio::test]
async fn test_resume_sends_range_and_offsets_total() {
    let (http, cache, engine) = setup(300);
    http.serve(URL, Resource::new(1000));
    let observer = RecordingObserver::default();
    let job = job(400, Some(1000));
    cache
        .put(&staging_key(&job.id), body(400).into())
        .await
        .unwrap();

    let outcome = engine.run(job, &observer, CancellationToken::new()).await;

    assert_eq!(outcome, TransferOutcome::Completed { bytes: 1000 });
    assert_eq!(http.requests_for(URL), vec![Some("bytes=400-".to_string())]);
    assert_eq!(
        observer.reports(),
        vec![(700, Some(1000)), (1000, Some(1000))]
    );
    assert_eq!(cache.bytes(URL), Some(body(1000)));
}

#[tokio::test]
async fn test_resume_without_length_keeps_known_size() {
    let (http, cache, engine) = setup(300);
    http.serve(URL, Resource::new(1000).without_length());
    let observer = RecordingObserver::default();
    let job = job(400, Some(1000));
    cache
        .put(&staging_key(&job.id), body(400).into())
        .await
        .unwrap();

    let outcome = engine.run(job, &observer, CancellationToken::new()).await;

    assert_eq!(outcome, TransferOutcome::Completed { bytes: 1000 });
    assert_eq!(
        observer.reports(),
        vec![(700, Some(1000)), (1000, Some(1000))]
    );
    assert_eq!(cache.bytes(URL), Some(body(1000)));
}

#[tokio::test]
async fn test_resume_without_length_rejects_overrun() {
    let (http, cache, engine) = setup(100);
    http.serve(URL, Resource::new(1500).without_length());
    let observer = RecordingObserver::default();
    let job = job(400, Some(1000));
    let staging = staging_key(&job.id);
    cache.put(&staging, body(400).into()).await.unwrap();

    let outcome = engine.run(job, &observer, CancellationToken::new()).await;

    assert_eq!(
        outcome,
        TransferOutcome::Failed(TransferError::LengthMismatch {
            expected: 1000,
            actual: 1100,
        })
    );
    assert_eq!(cache.size(&staging).await.unwrap(), Some(1000));
    assert!(!cache.contains(URL).await.unwrap());
}

#[tokio::test]
async fn test_ignored_range_restarts_from_zero() {
    let (http, cache, engine) = setup(500);
    http.serve(URL, Resource::new(1000).ignore_range());
    let observer = RecordingObserver::default();
    let job = job(400, Some(1000));
    cache
        .put(&staging_key(&job.id), body(400).into())
        .await
        .unwrap();

    let outcome = engine.run(job, &observer, CancellationToken::new()).await;

    assert_eq!(outcome, TransferOutcome::Completed { bytes: 1000 });
    assert_eq!(observer.reports()[0], (0, Some(1000)));
    assert_eq!(cache.bytes(URL), Some(body(1000)));
}

#[tokio::test]
async fn test_staging_mismatch_restarts_without_range() {
    let (http, cache, engine) = setup(500);
    http.serve(URL, Resource::new(1000));
    let observer = RecordingObserver::default();

    let outcome = engine
        .run(job(400, Some(1000)), &observer, CancellationToken::new())
        .await;

    assert_eq!(outcome, TransferOutcome::Completed { bytes: 1000 });
    assert_eq!(http.requests_for(URL), vec![None]);
    assert_eq!(observer.reports()[0], (0, Some(1000)));
    assert_eq!(cache.bytes(URL), Some(body(1000)));
}

#[tokio::test]
async fn test_fully_staged_commits_without_request() {
    let (http, cache, engine) = setup(500);
    let observer = RecordingObserver::default();
    let job = job(1000, Some(1000));
    cache
        .put(&staging_key(&job.id), body(1000).into())
        .await
        .unwrap();

    let outcome = engine.run(job, &observer, CancellationToken::new()).await;

    assert_eq!(outcome, TransferOutcome::Completed { bytes: 1000 });
    assert!(http.requests().is_empty());
    assert_eq!(cache.bytes(URL), Some(body(1000)));
}

#[tokio::test]
async fn test_unknown_length_reports_no_total() {
    let (http, _cache, engine) = setup(600);
    http.serve(URL, Resource::new(1000).without_length());
    let observer = RecordingObserver::default();

    let outcome = engine
        .run(job(0, None), &observer, CancellationToken::new())
        .await;

    assert_eq!(outcome, TransferOutcome::Completed { bytes: 1000 });
    assert_eq!(observer.reports(), vec![(600, None), (1000, None)]);
}

#[tokio::test]
async fn test_error_status_fails() {
    let (http, cache, engine) = setup(100);
    http.serve(URL, Resource::new(1000).with_status(404));

    let outcome = engine
        .run(job(0, None), &RecordingObserver::default(), CancellationToken::new())
        .await;

    assert_eq!(outcome, TransferOutcome::Failed(TransferError::HttpStatus(404)));
    assert!(cache.keys().is_empty());
}

#[tokio::test]
async fn test_stream_error_keeps_staged_bytes() {
    let (http, cache, engine) = setup(100);
    http.serve(URL, Resource::new(1000).fail_after(2));
    let observer = RecordingObserver::default();
    let job = job(0, None);

    let outcome = engine
        .run(job.clone(), &observer, CancellationToken::new())
        .await;

    assert!(matches!(
        outcome,
        TransferOutcome::Failed(TransferError::Stream(_))
    ));
    assert_eq!(observer.reports().last(), Some(&(200, Some(1000))));
    assert_eq!(cache.size(&staging_key(&job.id)).await.unwrap(), Some(200));
    assert!(!cache.contains(URL).await.unwrap());
}

#[tokio::test]
async fn test_observer_failure_aborts_transfer() {
    let (http, _cache, engine) = setup(100);
    http.serve(URL, Resource::new(1000));

    let outcome = engine
        .run(job(0, None), &FailingObserver, CancellationToken::new())
        .await;

    assert_eq!(
        outcome,
        TransferOutcome::Failed(TransferError::Storage(
            "record store unavailable".to_string()
        ))
    );
}

#[tokio::test]
async fn test_cancel_before_start() {
    let (http, _cache, engine) = setup(100);
    http.serve(URL, Resource::new(1000));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = engine
        .run(job(0, None), &RecordingObserver::default(), cancel)
        .await;

    assert_eq!(outcome, TransferOutcome::Cancelled);
}

#[tokio::test]
async fn test_cancel_mid_stream_stops_at_chunk_boundary() {
    let (http, cache, engine) = setup(100);
    let (resource, gate) = Resource::new(1000).gated();
    http.serve(URL, resource);
    let observer = Arc::new(RecordingObserver::default());
    let cancel = CancellationToken::new();
    let job = job(0, None);

    let engine = Arc::new(engine);
    let task = {
        let engine = Arc::clone(&engine);
        let observer = Arc::clone(&observer);
        let cancel = cancel.clone();
        let job = job.clone();
        tokio::spawn(async move { engine.run(job, observer.as_ref(), cancel).await })
    };

    gate.add_permits(3);
    common::wait_for("three chunks", || observer.reports().len() == 3).await;
    cancel.cancel();

    assert_eq!(task.await.unwrap(), TransferOutcome::Cancelled);
    assert_eq!(cache.size(&staging_key(&job.id)).await.unwrap(), Some(300));
}

#[tokio::test]
async fn test_stall_timeout() {
    let (http, _cache, engine) = setup(100);
    let (resource, _gate) = Resource::new(1000).gated();
    http.serve(URL, resource);
    let engine = engine.with_stall_timeout(Some(Duration::from_millis(50)));

    let outcome = engine
        .run(job(0, None), &RecordingObserver::default(), CancellationToken::new())
        .await;

    assert_eq!(
        outcome,
        TransferOutcome::Failed(TransferError::Stalled(Duration::from_millis(50)))
    );
}
