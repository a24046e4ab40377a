//! Scheduler configuration and per-request decoding parameters.

use crate::error::{CadenceError, CadenceResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum estimated token length of a single sentence unit
    pub max_text_tokens_per_sentence: usize,
    /// Default cap on sentence units per bucket; a request's
    /// `bucket_size_hint` overrides it in either direction
    pub max_bucket_size: usize,
    /// Maximum number of sentence units allowed in the pending pool
    pub pending_pool_limit: usize,
    /// Time budget for one batched inference call
    pub infer_timeout: Duration,
    /// How many times a failed bucket's units are requeued per request
    pub retry_count: u32,
    /// Directory where finished audio artifacts are written
    pub output_dir: PathBuf,
    /// Sample rate of the audio produced by the model
    pub sample_rate: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_text_tokens_per_sentence: crate::DEFAULT_MAX_TEXT_TOKENS,
            max_bucket_size: crate::DEFAULT_MAX_BUCKET_SIZE,
            pending_pool_limit: crate::DEFAULT_PENDING_POOL_LIMIT,
            infer_timeout: Duration::from_secs(300),
            retry_count: 1,
            output_dir: PathBuf::from("outputs"),
            sample_rate: crate::DEFAULT_SAMPLE_RATE,
        }
    }
}

impl SchedulerConfig {
    /// Set the maximum sentence token length
    #[must_use]
    pub fn with_max_text_tokens_per_sentence(mut self, max_tokens: usize) -> Self {
        self.max_text_tokens_per_sentence = max_tokens;
        self
    }

    /// Set the maximum bucket size
    #[must_use]
    pub fn with_max_bucket_size(mut self, max_bucket_size: usize) -> Self {
        self.max_bucket_size = max_bucket_size;
        self
    }

    /// Set the pending pool limit
    #[must_use]
    pub fn with_pending_pool_limit(mut self, limit: usize) -> Self {
        self.pending_pool_limit = limit;
        self
    }

    /// Set the inference timeout
    #[must_use]
    pub fn with_infer_timeout(mut self, timeout: Duration) -> Self {
        self.infer_timeout = timeout;
        self
    }

    /// Set the retry count
    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Set the artifact output directory
    #[must_use]
    pub fn with_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if any limit is zero or inconsistent.
    pub fn validate(&self) -> CadenceResult<()> {
        if self.max_text_tokens_per_sentence == 0 {
            return Err(CadenceError::configuration(
                "max_text_tokens_per_sentence must be greater than 0",
            ));
        }
        if self.max_bucket_size == 0 {
            return Err(CadenceError::configuration(
                "max_bucket_size must be greater than 0",
            ));
        }
        if self.pending_pool_limit == 0 {
            return Err(CadenceError::configuration(
                "pending_pool_limit must be greater than 0",
            ));
        }
        if self.infer_timeout.is_zero() {
            return Err(CadenceError::configuration(
                "infer_timeout must be greater than zero",
            ));
        }
        if self.sample_rate == 0 {
            return Err(CadenceError::configuration(
                "sample_rate must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Decoding parameters for one request.
///
/// Defaults mirror the standard synthesis parameter set; `fast()` gives the
/// throughput-oriented variant (shorter sentences, explicit bucket hint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodingParams {
    /// Whether to sample during decoding (false = pure beam search)
    pub do_sample: bool,
    /// Nucleus sampling probability mass
    pub top_p: f32,
    /// Top-k sampling cutoff
    pub top_k: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Beam search length penalty
    pub length_penalty: f32,
    /// Number of beams for beam search
    pub num_beams: u32,
    /// Repetition penalty applied during decoding
    pub repetition_penalty: f32,
    /// Maximum mel tokens the model may emit per unit
    pub max_mel_tokens: u32,
    /// Per-request override of the sentence token limit
    pub max_text_tokens_per_sentence: Option<usize>,
    /// Per-request hint for the bucket unit cap (fast-path tuning)
    pub bucket_size_hint: Option<usize>,
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self {
            do_sample: true,
            top_p: 0.8,
            top_k: 30,
            temperature: 1.0,
            length_penalty: 0.0,
            num_beams: 3,
            repetition_penalty: 10.0,
            max_mel_tokens: 600,
            max_text_tokens_per_sentence: None,
            bucket_size_hint: None,
        }
    }
}

impl DecodingParams {
    /// Fast-path parameter set: shorter sentence units and an explicit
    /// bucket hint, trading first-result latency for throughput.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            max_text_tokens_per_sentence: Some(crate::FAST_MAX_TEXT_TOKENS),
            bucket_size_hint: Some(crate::DEFAULT_MAX_BUCKET_SIZE),
            ..Self::default()
        }
    }

    /// Set the sampling toggle
    #[must_use]
    pub fn with_do_sample(mut self, do_sample: bool) -> Self {
        self.do_sample = do_sample;
        self
    }

    /// Set the beam count
    #[must_use]
    pub fn with_num_beams(mut self, num_beams: u32) -> Self {
        self.num_beams = num_beams;
        self
    }

    /// Set the sampling temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the per-request sentence token limit
    #[must_use]
    pub fn with_max_text_tokens_per_sentence(mut self, max_tokens: usize) -> Self {
        self.max_text_tokens_per_sentence = Some(max_tokens);
        self
    }

    /// Set the bucket size hint
    #[must_use]
    pub fn with_bucket_size_hint(mut self, hint: usize) -> Self {
        self.bucket_size_hint = Some(hint);
        self
    }

    /// Validate parameter ranges
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if any parameter is out of range.
    pub fn validate(&self) -> CadenceResult<()> {
        if !(0.0..=1.0).contains(&self.top_p) || self.top_p == 0.0 {
            return Err(CadenceError::validation(format!(
                "top_p must be in (0.0, 1.0], got {}",
                self.top_p
            )));
        }
        if self.top_k == 0 {
            return Err(CadenceError::validation("top_k must be greater than 0"));
        }
        if self.temperature <= 0.0 {
            return Err(CadenceError::validation(format!(
                "temperature must be greater than 0.0, got {}",
                self.temperature
            )));
        }
        if self.num_beams == 0 {
            return Err(CadenceError::validation("num_beams must be greater than 0"));
        }
        if self.repetition_penalty <= 0.0 {
            return Err(CadenceError::validation(format!(
                "repetition_penalty must be greater than 0.0, got {}",
                self.repetition_penalty
            )));
        }
        if self.max_mel_tokens == 0 {
            return Err(CadenceError::validation(
                "max_mel_tokens must be greater than 0",
            ));
        }
        if let Some(max_tokens) = self.max_text_tokens_per_sentence {
            if max_tokens == 0 {
                return Err(CadenceError::validation(
                    "max_text_tokens_per_sentence must be greater than 0",
                ));
            }
        }
        if let Some(hint) = self.bucket_size_hint {
            if hint == 0 {
                return Err(CadenceError::validation(
                    "bucket_size_hint must be greater than 0",
                ));
            }
        }
        Ok(())
    }

    /// Batching compatibility signature: units may only share a bucket when
    /// their beam count and sampling mode are identical, since a batched call
    /// executes with one decoder configuration.
    #[must_use]
    pub const fn signature(&self) -> ParamSignature {
        ParamSignature {
            num_beams: self.num_beams,
            do_sample: self.do_sample,
        }
    }
}

/// The subset of decoding parameters that must match across a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamSignature {
    /// Beam count of every unit in the bucket
    pub num_beams: u32,
    /// Sampling mode of every unit in the bucket
    pub do_sample: bool,
}
