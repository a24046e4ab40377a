//! Exclusive access to the opaque speech-synthesis capability.
//!
//! The underlying model owns a single shared device context, so access is
//! strictly serialized: never more than one batched call in flight. The
//! exclusion lock travels into the blocking call itself, so a timed-out call
//! keeps holding the model until the hardware actually returns.

use crate::bucket::Bucket;
use crate::config::DecodingParams;
use crate::error::{CadenceError, CadenceResult};
use crate::request::UnitId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Audio data type - 32-bit floating point samples
pub type AudioData = Vec<f32>;

/// One entry of a batched synthesis call.
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// Identity of the sentence unit being synthesized
    pub unit_id: UnitId,
    /// Text to synthesize
    pub text: String,
    /// Reference-voice audio path
    pub voice_path: PathBuf,
    /// Decoding parameters for this item
    pub params: DecodingParams,
}

/// The opaque synthesis capability.
///
/// A successful call returns exactly one audio segment per input item, in
/// the same order. Implementations are expected to be stateless per call;
/// the scheduler never invokes this concurrently.
pub trait SpeechModel: Send + Sync {
    /// Synthesize a batch of items into raw audio buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if synthesis fails for any item; partial results are
    /// discarded and the whole batch is reported failed.
    fn synthesize_batch(&self, items: &[BatchItem]) -> CadenceResult<Vec<AudioData>>;
}

/// Exclusive handle to the synthesis capability.
///
/// Holds no per-request state. At most one bucket is in flight at any
/// instant; concurrent callers queue on the internal lock.
pub struct ModelResource {
    model: Arc<dyn SpeechModel>,
    lock: Arc<Mutex<()>>,
    timeout: Duration,
}

impl std::fmt::Debug for ModelResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelResource")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ModelResource {
    /// Wrap a synthesis capability with exclusive access and a per-call
    /// time budget.
    #[must_use]
    pub fn new(model: Arc<dyn SpeechModel>, timeout: Duration) -> Self {
        Self {
            model,
            lock: Arc::new(Mutex::new(())),
            timeout,
        }
    }

    /// Execute one batched inference call for a bucket.
    ///
    /// Returns audio keyed by unit identity so the scheduler can reassemble
    /// by original sequence index regardless of internal batch order.
    ///
    /// # Errors
    ///
    /// Returns `InferenceError` (or `TimeoutError`) carrying the whole
    /// bucket's unit set: on any mid-batch failure no partial results are
    /// delivered.
    pub async fn infer(&self, bucket: Bucket) -> CadenceResult<HashMap<UnitId, AudioData>> {
        let unit_ids = bucket.unit_ids();
        let items: Vec<BatchItem> = bucket
            .into_units()
            .into_iter()
            .map(|unit| BatchItem {
                unit_id: unit.id,
                text: unit.text,
                voice_path: unit.voice_path,
                params: unit.params,
            })
            .collect();

        debug!(units = items.len(), "submitting bucket to model");

        // The guard moves into the blocking closure: even if this future
        // times out below, the model stays locked until the call returns.
        let guard = Arc::clone(&self.lock).lock_owned().await;
        let model = Arc::clone(&self.model);
        let call = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            model.synthesize_batch(&items)
        });

        let outputs = match tokio::time::timeout(self.timeout, call).await {
            Err(_) => {
                warn!(timeout = ?self.timeout, "bucket inference timed out");
                return Err(CadenceError::timeout(
                    format!("bucket inference exceeded {:?}", self.timeout),
                    unit_ids,
                ));
            }
            Ok(Err(join_err)) => {
                return Err(CadenceError::inference(
                    format!("model task failed: {join_err}"),
                    unit_ids,
                ));
            }
            Ok(Ok(Err(err))) => {
                warn!(error = %err, "bucket inference failed");
                return Err(CadenceError::inference(err.to_string(), unit_ids));
            }
            Ok(Ok(Ok(outputs))) => outputs,
        };

        if outputs.len() != unit_ids.len() {
            return Err(CadenceError::inference(
                format!(
                    "model returned {} segments for {} units",
                    outputs.len(),
                    unit_ids.len()
                ),
                unit_ids,
            ));
        }

        Ok(unit_ids.into_iter().zip(outputs).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket;
    use crate::request::RequestId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModel {
        in_flight: AtomicUsize,
        max_observed: AtomicUsize,
        delay: Duration,
    }

    impl CountingModel {
        fn new(delay: Duration) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_observed: AtomicUsize::new(0),
                delay,
            }
        }
    }

    impl SpeechModel for CountingModel {
        fn synthesize_batch(&self, items: &[BatchItem]) -> CadenceResult<Vec<AudioData>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(items.iter().map(|_| vec![0.0f32; 8]).collect())
        }
    }

    struct FailingModel;

    impl SpeechModel for FailingModel {
        fn synthesize_batch(&self, _items: &[BatchItem]) -> CadenceResult<Vec<AudioData>> {
            Err(CadenceError::inference("device fault", Vec::new()))
        }
    }

    fn test_bucket(n: u32) -> Bucket {
        let request = RequestId::new();
        let units: Vec<_> = (0..n)
            .map(|i| crate::bucket::SentenceUnit {
                id: UnitId::new(request, i),
                text: format!("sentence {i}"),
                est_tokens: 5,
                voice_path: PathBuf::from("/voices/ref.wav"),
                params: DecodingParams::default(),
                bucket_limit: n.max(1) as usize,
            })
            .collect();
        let mut buckets = bucket::build(units, 120);
        buckets.remove(0)
    }

    #[tokio::test]
    async fn test_infer_returns_segment_per_unit() {
        let model = Arc::new(CountingModel::new(Duration::from_millis(1)));
        let resource = ModelResource::new(model, Duration::from_secs(5));
        let bucket = test_bucket(3);
        let ids = bucket.unit_ids();

        let segments = resource.infer(bucket).await.unwrap();
        assert_eq!(segments.len(), 3);
        for id in ids {
            assert!(segments.contains_key(&id));
        }
    }

    #[tokio::test]
    async fn test_infer_failure_carries_all_units() {
        let resource = ModelResource::new(Arc::new(FailingModel), Duration::from_secs(5));
        let bucket = test_bucket(2);
        let ids = bucket.unit_ids();

        let err = resource.infer(bucket).await.unwrap_err();
        assert!(matches!(err, CadenceError::InferenceError { .. }));
        assert_eq!(err.failed_units(), ids.as_slice());
    }

    #[tokio::test]
    async fn test_infer_timeout_reported_as_timeout() {
        let model = Arc::new(CountingModel::new(Duration::from_millis(200)));
        let resource = ModelResource::new(model, Duration::from_millis(10));
        let bucket = test_bucket(1);

        let err = resource.infer(bucket).await.unwrap_err();
        assert!(matches!(err, CadenceError::TimeoutError { .. }));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_exclusive_access_under_contention() {
        let model = Arc::new(CountingModel::new(Duration::from_millis(10)));
        let resource = Arc::new(ModelResource::new(
            Arc::clone(&model) as Arc<dyn SpeechModel>,
            Duration::from_secs(5),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resource = Arc::clone(&resource);
            handles.push(tokio::spawn(async move {
                resource.infer(test_bucket(2)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(model.max_observed.load(Ordering::SeqCst), 1);
    }
}
