//! In-memory bridges and a scripted streaming HTTP server for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    ByteCache, Clock, DeviceClass, HttpClient, HttpRequest, HttpStream, RecordStore, RecordTable,
    StorageEstimate, StorageEstimator,
};
use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use core_offline::OfflineDependencies;
use core_runtime::events::EventBus;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

// ============================================================================
// Record Store
// ============================================================================

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<(RecordTable, String), serde_json::Value>>,
    fail_writes: AtomicBool,
    write_budget: Mutex<Option<usize>>,
}

impl MemoryRecordStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent `put`/`delete`/`clear` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Allow `writes` more `put`/`delete`/`clear` calls, then fail.
    pub fn fail_writes_after(&self, writes: usize) {
        *self.write_budget.lock() = Some(writes);
    }

    pub fn raw(&self, table: RecordTable, key: &str) -> Option<serde_json::Value> {
        self.records.lock().get(&(table, key.to_string())).cloned()
    }

    pub fn count(&self, table: RecordTable) -> usize {
        self.records.lock().keys().filter(|(t, _)| *t == table).count()
    }

    fn check_writable(&self) -> Result<()> {
        let disk_full = || Err(BridgeError::DatabaseError("disk full".to_string()));
        if self.fail_writes.load(Ordering::SeqCst) {
            return disk_full();
        }

        match self.write_budget.lock().as_mut() {
            Some(0) => disk_full(),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_all(&self, table: RecordTable) -> Result<Vec<(String, serde_json::Value)>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|((t, _), _)| *t == table)
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn get(&self, table: RecordTable, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.raw(table, key))
    }

    async fn put(&self, table: RecordTable, key: &str, value: serde_json::Value) -> Result<()> {
        self.check_writable()?;
        self.records.lock().insert((table, key.to_string()), value);
        Ok(())
    }

    async fn delete(&self, table: RecordTable, key: &str) -> Result<()> {
        self.check_writable()?;
        self.records.lock().remove(&(table, key.to_string()));
        Ok(())
    }

    async fn clear(&self, table: RecordTable) -> Result<()> {
        self.check_writable()?;
        self.records.lock().retain(|(t, _), _| *t != table);
        Ok(())
    }
}

// ============================================================================
// Byte Cache
// ============================================================================

#[derive(Default)]
pub struct MemoryByteCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryByteCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).cloned()
    }
}

#[async_trait]
impl ByteCache for MemoryByteCache {
    async fn put(&self, key: &str, payload: Bytes) -> Result<()> {
        self.entries.lock().insert(key.to_string(), payload.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.bytes(key).map(Bytes::from))
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().contains_key(key))
    }

    async fn append(&self, key: &str, chunk: Bytes) -> Result<()> {
        self.entries
            .lock()
            .entry(key.to_string())
            .or_default()
            .extend_from_slice(&chunk);
        Ok(())
    }

    async fn size(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.entries.lock().get(key).map(|v| v.len() as u64))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    async fn locate(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .lock()
            .contains_key(key)
            .then(|| format!("memory://{}", key)))
    }
}

// ============================================================================
// Scripted HTTP
// ============================================================================

/// Deterministic payload of `len` bytes.
pub fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// A resource served by [`ScriptedHttpClient`]
#[derive(Clone)]
pub struct Resource {
    pub body: Vec<u8>,
    /// Answer `Range` requests with 206; otherwise always 200 from byte 0
    pub honor_range: bool,
    /// Send a `Content-Length`
    pub declare_length: bool,
    /// Respond with this status and an empty body
    pub status: Option<u16>,
    /// Each chunk waits for one permit when set
    pub gate: Option<Arc<Semaphore>>,
    /// Break the stream after this many chunks
    pub fail_after_chunks: Option<usize>,
}

impl Resource {
    pub fn new(len: usize) -> Self {
        Self {
            body: body(len),
            honor_range: true,
            declare_length: true,
            status: None,
            gate: None,
            fail_after_chunks: None,
        }
    }

    /// Gate every chunk on a semaphore that starts with no permits.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn ignore_range(mut self) -> Self {
        self.honor_range = false;
        self
    }

    pub fn without_length(mut self) -> Self {
        self.declare_length = false;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn fail_after(mut self, chunks: usize) -> Self {
        self.fail_after_chunks = Some(chunks);
        self
    }
}

pub struct ScriptedHttpClient {
    chunk_size: usize,
    resources: Mutex<HashMap<String, Resource>>,
    requests: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedHttpClient {
    pub fn new(chunk_size: usize) -> Arc<Self> {
        Arc::new(Self {
            chunk_size,
            resources: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn serve(&self, url: &str, resource: Resource) {
        self.resources.lock().insert(url.to_string(), resource);
    }

    /// `(url, Range header)` of every request, in order.
    pub fn requests(&self) -> Vec<(String, Option<String>)> {
        self.requests.lock().clone()
    }

    pub fn requests_for(&self, url: &str) -> Vec<Option<String>> {
        self.requests()
            .into_iter()
            .filter(|(u, _)| u == url)
            .map(|(_, range)| range)
            .collect()
    }
}

fn parse_range(range: &str) -> Option<usize> {
    range.strip_prefix("bytes=")?.strip_suffix('-')?.parse().ok()
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn open_stream(&self, request: HttpRequest) -> Result<HttpStream> {
        let range = request.range().map(str::to_string);
        self.requests
            .lock()
            .push((request.url.clone(), range.clone()));

        let resource = self.resources.lock().get(&request.url).cloned();
        let Some(resource) = resource else {
            return Ok(HttpStream {
                status: 404,
                headers: HashMap::new(),
                content_length: Some(0),
                body: stream::empty::<Result<Bytes>>().boxed(),
            });
        };

        if let Some(status) = resource.status {
            return Ok(HttpStream {
                status,
                headers: HashMap::new(),
                content_length: Some(0),
                body: stream::empty::<Result<Bytes>>().boxed(),
            });
        }

        let start = match (resource.honor_range, range.as_deref().and_then(parse_range)) {
            (true, Some(start)) => start.min(resource.body.len()),
            _ => 0,
        };
        let status = if start > 0 { 206 } else { 200 };
        let remaining = &resource.body[start..];

        let mut chunks: Vec<Result<Bytes>> = remaining
            .chunks(self.chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if let Some(limit) = resource.fail_after_chunks {
            chunks.truncate(limit);
            chunks.push(Err(BridgeError::OperationFailed(
                "connection reset".to_string(),
            )));
        }

        let gate = resource.gate.clone();
        let body = stream::iter(chunks)
            .then(move |chunk| {
                let gate = gate.clone();
                async move {
                    if let Some(gate) = gate {
                        gate.acquire_owned()
                            .await
                            .map_err(|e| BridgeError::OperationFailed(e.to_string()))?
                            .forget();
                    }
                    chunk
                }
            })
            .boxed();

        Ok(HttpStream {
            status,
            headers: HashMap::new(),
            content_length: resource.declare_length.then_some(remaining.len() as u64),
            body,
        })
    }
}

// ============================================================================
// Clock & Estimator
// ============================================================================

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new() -> Arc<Self> {
        Self::at(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())
    }

    pub fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

pub struct StaticEstimator {
    pub estimate: Option<StorageEstimate>,
    pub class: DeviceClass,
}

#[async_trait]
impl StorageEstimator for StaticEstimator {
    async fn estimate(&self) -> Result<Option<StorageEstimate>> {
        Ok(self.estimate)
    }

    fn device_class(&self) -> DeviceClass {
        self.class
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub http: Arc<ScriptedHttpClient>,
    pub store: Arc<MemoryRecordStore>,
    pub cache: Arc<MemoryByteCache>,
    pub clock: Arc<FixedClock>,
    pub events: Arc<EventBus>,
}

impl Harness {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            http: ScriptedHttpClient::new(chunk_size),
            store: MemoryRecordStore::new(),
            cache: MemoryByteCache::new(),
            clock: FixedClock::new(),
            events: Arc::new(EventBus::new(256)),
        }
    }

    pub fn deps(&self) -> OfflineDependencies {
        OfflineDependencies {
            http_client: self.http.clone(),
            byte_cache: self.cache.clone(),
            record_store: self.store.clone(),
            storage_estimator: None,
            clock: self.clock.clone(),
            event_bus: Some(Arc::clone(&self.events)),
        }
    }
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_for<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}
