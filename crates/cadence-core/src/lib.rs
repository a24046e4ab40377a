//! # Cadence Core
//!
//! Batched text-to-speech scheduling around a single exclusive model
//! resource.
//!
//! ## Features
//!
//! - Sentence segmentation bounded by a maximum token length
//! - Greedy, signature-aware bucketing of sentence units across requests
//! - Strictly serialized batched inference with a per-call time budget
//! - In-order per-request reassembly and WAV artifact bookkeeping
//! - Bounded retry, cancellation, and pending-pool backpressure
//!
//! ## Example
//!
//! ```rust,no_run
//! use cadence_core::{BatchScheduler, DecodingParams, SchedulerConfig, VoiceRegistry};
//! use std::sync::Arc;
//!
//! # fn load_model() -> Arc<dyn cadence_core::SpeechModel> { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let voices = Arc::new(VoiceRegistry::new());
//!     voices.register("narrator", "voices/narrator.wav")?;
//!
//!     let scheduler = BatchScheduler::new(SchedulerConfig::default(), load_model(), voices)?;
//!     let id = scheduler.submit("Hello, world!", "narrator", DecodingParams::default())?;
//!     scheduler.wait(id).await?;
//!     let artifact = scheduler.result(id)?;
//!     println!("audio at {}", artifact.path.display());
//!
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

pub mod artifact;
pub mod bucket;
pub mod config;
pub mod error;
pub mod model;
pub mod request;
pub mod scheduler;
pub mod segmenter;
pub mod voice;

// Re-export main types for convenience
pub use artifact::{Artifact, ArtifactStore, AudioSink, WavSink};
pub use bucket::{Bucket, SentenceUnit};
pub use config::{DecodingParams, ParamSignature, SchedulerConfig};
pub use error::{CadenceError, CadenceResult};
pub use model::{AudioData, BatchItem, ModelResource, SpeechModel};
pub use request::{RequestId, RequestStatus, UnitId};
pub use scheduler::{BatchScheduler, RequestInfo, SchedulerStats, TtsRequest};
pub use segmenter::SentenceSpan;
pub use voice::VoiceRegistry;

/// Version information for the cadence-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default sample rate of model output audio (24 kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Default maximum estimated tokens per sentence unit
pub const DEFAULT_MAX_TEXT_TOKENS: usize = 120;

/// Sentence token limit used by the fast parameter set
pub const FAST_MAX_TEXT_TOKENS: usize = 100;

/// Default maximum number of sentence units per bucket
pub const DEFAULT_MAX_BUCKET_SIZE: usize = 4;

/// Default cap on sentence units in the pending pool
pub const DEFAULT_PENDING_POOL_LIMIT: usize = 256;

/// Maximum text length for one request (to prevent memory issues)
pub const MAX_TEXT_LENGTH: usize = 10_000;
