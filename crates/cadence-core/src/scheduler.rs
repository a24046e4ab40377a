//! Request admission, bucketing, and batch execution.
//!
//! The scheduler owns every request from admission to terminal state. A
//! single long-lived driver task drains the pending pool through the bucket
//! builder and submits one bucket at a time to the exclusive model resource;
//! admission only appends to the pool under a short-held lock and never
//! blocks on inference.

use crate::artifact::{Artifact, ArtifactStore, AudioSink, WavSink};
use crate::bucket::{self, Bucket, SentenceUnit};
use crate::config::{DecodingParams, SchedulerConfig};
use crate::error::{CadenceError, CadenceResult};
use crate::model::{AudioData, ModelResource, SpeechModel};
use crate::request::{RequestId, RequestStatus, UnitId};
use crate::segmenter;
use crate::voice::VoiceRegistry;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

/// One caller-submitted text-to-speech job, used for batch submission.
#[derive(Debug, Clone)]
pub struct TtsRequest {
    /// Text to convert
    pub text: String,
    /// Reference-voice id, resolved against the voice registry
    pub voice_id: String,
    /// Decoding parameters
    pub params: DecodingParams,
}

impl TtsRequest {
    /// Create a job with default decoding parameters.
    #[must_use]
    pub fn new<S: Into<String>, V: Into<String>>(text: S, voice_id: V) -> Self {
        Self {
            text: text.into(),
            voice_id: voice_id.into(),
            params: DecodingParams::default(),
        }
    }

    /// Replace the decoding parameters.
    #[must_use]
    pub fn with_params(mut self, params: DecodingParams) -> Self {
        self.params = params;
        self
    }
}

/// Snapshot of one request's admission metadata and progress.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Request identifier
    pub id: RequestId,
    /// Reference-voice id given at admission
    pub voice_id: String,
    /// Current status
    pub status: RequestStatus,
    /// Submission timestamp
    pub submitted_at: DateTime<Utc>,
    /// Number of sentence units the request segmented into
    pub total_units: u32,
    /// Number of units already synthesized
    pub resolved_units: u32,
}

/// Aggregate scheduler counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Requests admitted since startup
    pub total_requests: u64,
    /// Requests that reached Done
    pub succeeded_requests: u64,
    /// Requests that reached Failed
    pub failed_requests: u64,
    /// Requests cancelled by callers
    pub cancelled_requests: u64,
    /// Batched inference calls executed
    pub buckets_executed: u64,
    /// Artifacts currently recorded
    pub artifacts: usize,
}

struct RequestEntry {
    voice_id: String,
    status: RequestStatus,
    submitted_at: DateTime<Utc>,
    total_units: u32,
    segments: BTreeMap<u32, AudioData>,
    retries_left: u32,
    error: Option<CadenceError>,
    status_tx: watch::Sender<RequestStatus>,
}

impl RequestEntry {
    fn set_status(&mut self, status: RequestStatus) {
        self.status = status;
        self.status_tx.send_replace(status);
    }
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    buckets: AtomicU64,
}

struct Inner {
    config: SchedulerConfig,
    voices: Arc<VoiceRegistry>,
    model: ModelResource,
    artifacts: Arc<ArtifactStore>,
    // Lock order: pool before requests, never the reverse.
    pool: Mutex<VecDeque<SentenceUnit>>,
    requests: Mutex<HashMap<RequestId, RequestEntry>>,
    wake: Notify,
    shutdown: AtomicBool,
    counters: Counters,
}

struct Prepared {
    id: RequestId,
    voice_id: String,
    units: Vec<SentenceUnit>,
    submitted_at: DateTime<Utc>,
}

/// The batch scheduler: admits requests, drives segmentation and bucketing,
/// serializes model access, and reassembles per-request audio.
pub struct BatchScheduler {
    inner: Arc<Inner>,
    driver: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl BatchScheduler {
    /// Create a scheduler persisting artifacts as WAV files under the
    /// configured output directory.
    ///
    /// Must be called within a Tokio runtime: the driver task is spawned
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the output
    /// directory cannot be created.
    pub fn new(
        config: SchedulerConfig,
        model: Arc<dyn SpeechModel>,
        voices: Arc<VoiceRegistry>,
    ) -> CadenceResult<Self> {
        let sink = Arc::new(WavSink::new(&config.output_dir, config.sample_rate)?);
        Self::with_sink(config, model, voices, sink)
    }

    /// Create a scheduler with a custom audio persistence collaborator.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the configuration is invalid.
    pub fn with_sink(
        config: SchedulerConfig,
        model: Arc<dyn SpeechModel>,
        voices: Arc<VoiceRegistry>,
        sink: Arc<dyn AudioSink>,
    ) -> CadenceResult<Self> {
        config.validate()?;
        let artifacts = Arc::new(ArtifactStore::new(sink, config.sample_rate));
        let model = ModelResource::new(model, config.infer_timeout);
        let inner = Arc::new(Inner {
            config,
            voices,
            model,
            artifacts,
            pool: Mutex::new(VecDeque::new()),
            requests: Mutex::new(HashMap::new()),
            wake: Notify::new(),
            shutdown: AtomicBool::new(false),
            counters: Counters::default(),
        });
        let driver = tokio::spawn(drive(Arc::clone(&inner)));
        info!("batch scheduler started");
        Ok(Self { inner, driver })
    }

    /// Submit one request. Validates, segments, and enqueues synchronously;
    /// the result is produced asynchronously by the driver loop.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError`/`VoiceNotFound` for bad input,
    /// `SegmentationError` for unsegmentable text, and `Overloaded` when the
    /// pending pool is full (the pool is left unchanged).
    pub fn submit(
        &self,
        text: &str,
        voice_id: &str,
        params: DecodingParams,
    ) -> CadenceResult<RequestId> {
        let prepared = self.prepare(text, voice_id, &params)?;
        let mut ids = self.commit(vec![prepared])?;
        Ok(ids.remove(0))
    }

    /// Submit many requests atomically: either all are admitted or none.
    /// Admitted requests compete fairly with already-pending ones at the
    /// unit level.
    ///
    /// # Errors
    ///
    /// Returns the first admission error encountered, or `Overloaded` if the
    /// combined unit count does not fit the pending pool.
    pub fn submit_batch(&self, jobs: Vec<TtsRequest>) -> CadenceResult<Vec<RequestId>> {
        if jobs.is_empty() {
            return Err(CadenceError::validation("batch submission is empty"));
        }
        let mut prepared = Vec::with_capacity(jobs.len());
        for job in &jobs {
            prepared.push(self.prepare(&job.text, &job.voice_id, &job.params)?);
        }
        self.commit(prepared)
    }

    /// Current status of a request.
    ///
    /// # Errors
    ///
    /// Returns `RequestNotFound` for unknown ids.
    pub fn status(&self, id: RequestId) -> CadenceResult<RequestStatus> {
        self.inner
            .requests
            .lock()
            .get(&id)
            .map(|entry| entry.status)
            .ok_or_else(|| CadenceError::request_not_found(&id))
    }

    /// Snapshot of a request's metadata and progress.
    ///
    /// # Errors
    ///
    /// Returns `RequestNotFound` for unknown ids.
    pub fn inspect(&self, id: RequestId) -> CadenceResult<RequestInfo> {
        let requests = self.inner.requests.lock();
        let entry = requests
            .get(&id)
            .ok_or_else(|| CadenceError::request_not_found(&id))?;
        let resolved_units = if entry.status == RequestStatus::Done {
            entry.total_units
        } else {
            entry.segments.len() as u32
        };
        Ok(RequestInfo {
            id,
            voice_id: entry.voice_id.clone(),
            status: entry.status,
            submitted_at: entry.submitted_at,
            total_units: entry.total_units,
            resolved_units,
        })
    }

    /// Await a request's terminal state.
    ///
    /// # Errors
    ///
    /// Returns `RequestNotFound` for unknown ids.
    pub async fn wait(&self, id: RequestId) -> CadenceResult<RequestStatus> {
        let mut rx = {
            let requests = self.inner.requests.lock();
            let entry = requests
                .get(&id)
                .ok_or_else(|| CadenceError::request_not_found(&id))?;
            entry.status_tx.subscribe()
        };
        loop {
            let status = *rx.borrow_and_update();
            if status.is_terminal() {
                return Ok(status);
            }
            rx.changed()
                .await
                .map_err(|_| CadenceError::request_not_found(&id))?;
        }
    }

    /// Fetch the artifact for a finished request. Completion is all-or-
    /// nothing: a Failed request never yields partial audio.
    ///
    /// # Errors
    ///
    /// Returns the recorded failure for Failed requests, `Cancelled` for
    /// cancelled ones, and `ValidationError` while the request is still in
    /// flight.
    pub fn result(&self, id: RequestId) -> CadenceResult<Artifact> {
        let (status, err) = {
            let requests = self.inner.requests.lock();
            let entry = requests
                .get(&id)
                .ok_or_else(|| CadenceError::request_not_found(&id))?;
            (entry.status, entry.error.clone())
        };
        match status {
            RequestStatus::Done => self.inner.artifacts.get(id),
            RequestStatus::Failed => Err(err.unwrap_or_else(|| {
                CadenceError::inference("request failed", Vec::new())
            })),
            RequestStatus::Cancelled => Err(CadenceError::cancelled(&id)),
            other => Err(CadenceError::validation(format!(
                "request {id} is not finished (status: {other})"
            ))),
        }
    }

    /// Cancel a request. Pending and queued units are removed from the pool;
    /// units already inside an in-flight bucket cannot be aborted, so
    /// cancelling a Running request only suppresses delivery of its result.
    ///
    /// # Errors
    ///
    /// Returns `RequestNotFound` for unknown ids and `ValidationError` if
    /// the request is already terminal.
    pub fn cancel(&self, id: RequestId) -> CadenceResult<()> {
        let mut pool = self.inner.pool.lock();
        let mut requests = self.inner.requests.lock();
        let entry = requests
            .get_mut(&id)
            .ok_or_else(|| CadenceError::request_not_found(&id))?;
        if entry.status.is_terminal() {
            return Err(CadenceError::validation(format!(
                "request {id} is already terminal ({})",
                entry.status
            )));
        }
        pool.retain(|unit| unit.id.request != id);
        entry.set_status(RequestStatus::Cancelled);
        self.inner.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        info!(request = %id, "request cancelled");
        Ok(())
    }

    /// Aggregate counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            total_requests: self.inner.counters.total.load(Ordering::Relaxed),
            succeeded_requests: self.inner.counters.succeeded.load(Ordering::Relaxed),
            failed_requests: self.inner.counters.failed.load(Ordering::Relaxed),
            cancelled_requests: self.inner.counters.cancelled.load(Ordering::Relaxed),
            buckets_executed: self.inner.counters.buckets.load(Ordering::Relaxed),
            artifacts: self.inner.artifacts.count(),
        }
    }

    /// Number of sentence units currently in the pending pool.
    #[must_use]
    pub fn pending_units(&self) -> usize {
        self.inner.pool.lock().len()
    }

    /// Drop bookkeeping for terminal requests submitted more than `age` ago,
    /// returning the number of entries evicted. Without periodic eviction the
    /// request table grows for the scheduler's lifetime; artifacts are
    /// retained independently, so pair this with
    /// [`ArtifactStore::cleanup_older_than`] for a full retention sweep.
    pub fn evict_terminal_older_than(&self, age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - age;
        let mut requests = self.inner.requests.lock();
        let before = requests.len();
        requests.retain(|_, entry| !(entry.status.is_terminal() && entry.submitted_at < cutoff));
        let evicted = before - requests.len();
        drop(requests);
        if evicted > 0 {
            info!(count = evicted, "evicted finished request entries");
        }
        evicted
    }

    /// The artifact store, for retrieval and retention sweeps.
    #[must_use]
    pub fn artifacts(&self) -> Arc<ArtifactStore> {
        Arc::clone(&self.inner.artifacts)
    }

    /// Stop the driver loop after the current bucket finishes. Pending
    /// requests are left in place and no longer make progress.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.wake.notify_one();
    }

    fn prepare(
        &self,
        text: &str,
        voice_id: &str,
        params: &DecodingParams,
    ) -> CadenceResult<Prepared> {
        params.validate()?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(CadenceError::validation("text cannot be empty"));
        }
        if text.len() > crate::MAX_TEXT_LENGTH {
            return Err(CadenceError::validation(format!(
                "text length {} exceeds maximum of {}",
                text.len(),
                crate::MAX_TEXT_LENGTH
            )));
        }
        let voice_path = self.inner.voices.resolve(voice_id)?;

        let max_tokens = params
            .max_text_tokens_per_sentence
            .unwrap_or(self.inner.config.max_text_tokens_per_sentence);
        let bucket_limit = params
            .bucket_size_hint
            .unwrap_or(self.inner.config.max_bucket_size);

        let id = RequestId::new();
        let spans = segmenter::segment(trimmed, max_tokens)?;
        let units = spans
            .into_iter()
            .enumerate()
            .map(|(index, span)| SentenceUnit {
                id: UnitId::new(id, index as u32),
                text: span.text,
                est_tokens: span.est_tokens,
                voice_path: voice_path.clone(),
                params: params.clone(),
                bucket_limit,
            })
            .collect();
        Ok(Prepared {
            id,
            voice_id: voice_id.to_string(),
            units,
            submitted_at: Utc::now(),
        })
    }

    fn commit(&self, prepared: Vec<Prepared>) -> CadenceResult<Vec<RequestId>> {
        let added: usize = prepared.iter().map(|p| p.units.len()).sum();
        let mut pool = self.inner.pool.lock();
        if pool.len() + added > self.inner.config.pending_pool_limit {
            return Err(CadenceError::overloaded(
                pool.len(),
                self.inner.config.pending_pool_limit,
            ));
        }
        let mut requests = self.inner.requests.lock();
        let mut ids = Vec::with_capacity(prepared.len());
        for p in prepared {
            let (status_tx, _) = watch::channel(RequestStatus::Queued);
            debug!(
                request = %p.id,
                voice = %p.voice_id,
                units = p.units.len(),
                "request admitted"
            );
            requests.insert(
                p.id,
                RequestEntry {
                    voice_id: p.voice_id,
                    status: RequestStatus::Queued,
                    submitted_at: p.submitted_at,
                    total_units: p.units.len() as u32,
                    segments: BTreeMap::new(),
                    retries_left: self.inner.config.retry_count,
                    error: None,
                    status_tx,
                },
            );
            pool.extend(p.units);
            self.inner.counters.total.fetch_add(1, Ordering::Relaxed);
            ids.push(p.id);
        }
        drop(requests);
        drop(pool);
        self.inner.wake.notify_one();
        Ok(ids)
    }
}

impl Drop for BatchScheduler {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn drive(inner: Arc<Inner>) {
    debug!("scheduler driver loop running");
    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let next = {
            let mut pool = inner.pool.lock();
            bucket::take_next(&mut pool, inner.config.max_text_tokens_per_sentence)
        };
        match next {
            Some(bucket) => execute_bucket(&inner, bucket).await,
            None => inner.wake.notified().await,
        }
    }
    info!("scheduler driver stopped");
}

async fn execute_bucket(inner: &Arc<Inner>, bucket: Bucket) {
    let units = bucket.units().to_vec();
    {
        let mut requests = inner.requests.lock();
        for unit in &units {
            if let Some(entry) = requests.get_mut(&unit.id.request) {
                if entry.status == RequestStatus::Queued {
                    entry.set_status(RequestStatus::Running);
                }
            }
        }
    }
    debug!(
        units = units.len(),
        tokens = bucket.total_tokens(),
        "executing bucket"
    );
    inner.counters.buckets.fetch_add(1, Ordering::Relaxed);

    match inner.model.infer(bucket).await {
        Ok(segments) => deliver(inner, &units, segments),
        Err(err) => handle_failure(inner, units, &err),
    }
}

/// Distribute synthesized segments to their owning requests and finish any
/// request whose units are now all resolved. Segments are reassembled by
/// original sequence index, never by bucket order.
fn deliver(inner: &Arc<Inner>, units: &[SentenceUnit], mut segments: HashMap<UnitId, AudioData>) {
    let mut completed: Vec<(RequestId, AudioData)> = Vec::new();
    {
        let mut requests = inner.requests.lock();
        for unit in units {
            let Some(entry) = requests.get_mut(&unit.id.request) else {
                continue;
            };
            if entry.status == RequestStatus::Cancelled {
                continue;
            }
            if let Some(audio) = segments.remove(&unit.id) {
                entry.segments.insert(unit.id.index, audio);
            }
            if entry.total_units > 0 && entry.segments.len() as u32 == entry.total_units {
                let audio: AudioData = std::mem::take(&mut entry.segments)
                    .into_values()
                    .flatten()
                    .collect();
                completed.push((unit.id.request, audio));
            }
        }
    }

    for (id, audio) in completed {
        match inner.artifacts.record(id, &audio) {
            Ok(_) => {
                let mut requests = inner.requests.lock();
                if let Some(entry) = requests.get_mut(&id) {
                    if entry.status == RequestStatus::Cancelled {
                        // Cancelled while the artifact was being written:
                        // suppress delivery.
                        let _ = inner.artifacts.delete(id);
                    } else {
                        entry.set_status(RequestStatus::Done);
                        inner.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                        info!(request = %id, "request completed");
                    }
                }
            }
            Err(err) => {
                error!(request = %id, error = %err, "failed to record artifact");
                let mut requests = inner.requests.lock();
                if let Some(entry) = requests.get_mut(&id) {
                    entry.error = Some(err);
                    entry.set_status(RequestStatus::Failed);
                    inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// A failed bucket fails as a whole: each affected request's units are
/// requeued while it has retries left, otherwise the request fails, its
/// remaining pooled units are purged, and the recorded error carries every
/// unresolved unit.
fn handle_failure(inner: &Arc<Inner>, units: Vec<SentenceUnit>, err: &CadenceError) {
    warn!(error = %err, units = units.len(), "bucket execution failed");

    let mut retry: HashMap<RequestId, bool> = HashMap::new();
    let mut pool = inner.pool.lock();
    {
        let mut requests = inner.requests.lock();
        for unit in &units {
            let request_id = unit.id.request;
            if retry.contains_key(&request_id) {
                continue;
            }
            let Some(entry) = requests.get_mut(&request_id) else {
                retry.insert(request_id, false);
                continue;
            };
            if entry.status == RequestStatus::Cancelled {
                retry.insert(request_id, false);
                continue;
            }
            if entry.retries_left > 0 {
                entry.retries_left -= 1;
                entry.set_status(RequestStatus::Queued);
                warn!(request = %request_id, "requeueing units for retry");
                retry.insert(request_id, true);
            } else {
                // Every unresolved unit of the request: this bucket's plus
                // any siblings still waiting in the pool, which are purged
                // so a Failed request stops consuming model time.
                let mut unresolved: Vec<UnitId> = units
                    .iter()
                    .map(|u| u.id)
                    .filter(|u| u.request == request_id)
                    .collect();
                unresolved.extend(
                    pool.iter()
                        .filter(|u| u.id.request == request_id)
                        .map(|u| u.id),
                );
                unresolved.sort_unstable_by_key(|u| u.index);
                pool.retain(|u| u.id.request != request_id);
                entry.error = Some(match err {
                    CadenceError::TimeoutError { message, .. } => {
                        CadenceError::timeout(message.clone(), unresolved)
                    }
                    CadenceError::InferenceError { message, .. } => {
                        CadenceError::inference(message.clone(), unresolved)
                    }
                    other => CadenceError::inference(other.to_string(), unresolved),
                });
                entry.set_status(RequestStatus::Failed);
                inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(request = %request_id, "request failed after retries");
                retry.insert(request_id, false);
            }
        }
    }

    let retry_units: Vec<SentenceUnit> = units
        .into_iter()
        .filter(|u| retry.get(&u.id.request).copied().unwrap_or(false))
        .collect();
    let requeued = !retry_units.is_empty();
    // Requeue at the front, preserving original relative order, so retried
    // units keep their arrival precedence.
    for unit in retry_units.into_iter().rev() {
        pool.push_front(unit);
    }
    drop(pool);
    if requeued {
        inner.wake.notify_one();
    }
}
