//! Bookkeeping for finished audio artifacts.
//!
//! The store tracks artifact metadata under a single lock and delegates byte
//! persistence to an [`AudioSink`] collaborator. The default sink writes
//! 16-bit mono WAV files named after the owning request.

use crate::error::{CadenceError, CadenceResult};
use crate::model::AudioData;
use crate::request::{RequestId, RequestStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Metadata for one completed request's audio output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// The request this artifact belongs to
    pub request_id: RequestId,
    /// Path of the persisted audio file
    pub path: PathBuf,
    /// Audio duration in seconds
    pub duration_secs: f64,
    /// When the artifact was recorded
    pub created_at: DateTime<Utc>,
    /// Completion status of the owning request (always `Done` at creation)
    pub status: RequestStatus,
}

/// File-persistence collaborator for artifact audio.
pub trait AudioSink: Send + Sync {
    /// Persist audio samples for a request, returning the written path.
    ///
    /// # Errors
    ///
    /// Returns a `FileError` if the bytes cannot be written.
    fn persist(&self, request_id: RequestId, audio: &[f32]) -> CadenceResult<PathBuf>;

    /// Remove a previously persisted file.
    ///
    /// # Errors
    ///
    /// Returns a `FileError` if the file cannot be removed.
    fn remove(&self, path: &Path) -> CadenceResult<()>;
}

/// Default sink: 16-bit mono WAV files in a fixed output directory.
#[derive(Debug)]
pub struct WavSink {
    dir: PathBuf,
    sample_rate: u32,
}

impl WavSink {
    /// Create a WAV sink, creating the output directory if needed.
    ///
    /// # Errors
    ///
    /// Returns a `FileError` if the directory cannot be created.
    pub fn new<P: Into<PathBuf>>(dir: P, sample_rate: u32) -> CadenceResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            CadenceError::file(format!(
                "failed to create output directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir, sample_rate })
    }
}

impl AudioSink for WavSink {
    fn persist(&self, request_id: RequestId, audio: &[f32]) -> CadenceResult<PathBuf> {
        let path = self.dir.join(format!("{request_id}.wav"));
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)
            .map_err(|e| CadenceError::file(format!("failed to create WAV file: {e}")))?;
        for &sample in audio {
            let clamped = sample.clamp(-1.0, 1.0);
            #[allow(clippy::cast_possible_truncation)]
            let quantized = (clamped * f32::from(i16::MAX)) as i16;
            writer
                .write_sample(quantized)
                .map_err(|e| CadenceError::file(format!("failed to write WAV sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| CadenceError::file(format!("failed to finalize WAV file: {e}")))?;
        debug!(path = %path.display(), samples = audio.len(), "persisted artifact audio");
        Ok(path)
    }

    fn remove(&self, path: &Path) -> CadenceResult<()> {
        std::fs::remove_file(path).map_err(|e| {
            CadenceError::file(format!("failed to remove {}: {e}", path.display()))
        })
    }
}

/// Tracks generated audio artifacts for later retrieval and cleanup.
pub struct ArtifactStore {
    sink: Arc<dyn AudioSink>,
    sample_rate: u32,
    entries: Mutex<HashMap<RequestId, Artifact>>,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("sample_rate", &self.sample_rate)
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

impl ArtifactStore {
    /// Create a store delegating persistence to the given sink.
    #[must_use]
    pub fn new(sink: Arc<dyn AudioSink>, sample_rate: u32) -> Self {
        Self {
            sink,
            sample_rate,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Persist a request's reassembled audio and record its artifact.
    ///
    /// # Errors
    ///
    /// Returns a `FileError` if persistence fails; nothing is recorded then.
    pub fn record(&self, request_id: RequestId, audio: &AudioData) -> CadenceResult<Artifact> {
        let path = self.sink.persist(request_id, audio)?;
        let artifact = Artifact {
            request_id,
            path,
            duration_secs: audio.len() as f64 / f64::from(self.sample_rate),
            created_at: Utc::now(),
            status: RequestStatus::Done,
        };
        self.entries.lock().insert(request_id, artifact.clone());
        info!(request = %request_id, duration_secs = artifact.duration_secs, "artifact recorded");
        Ok(artifact)
    }

    /// Look up the artifact for a request.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactNotFound` if no artifact is recorded for the request.
    pub fn get(&self, request_id: RequestId) -> CadenceResult<Artifact> {
        self.entries
            .lock()
            .get(&request_id)
            .cloned()
            .ok_or_else(|| CadenceError::artifact_not_found(&request_id))
    }

    /// Delete a request's artifact and its persisted file.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactNotFound` if no artifact is recorded, or a
    /// `FileError` if the file cannot be removed.
    pub fn delete(&self, request_id: RequestId) -> CadenceResult<()> {
        let artifact = self
            .entries
            .lock()
            .remove(&request_id)
            .ok_or_else(|| CadenceError::artifact_not_found(&request_id))?;
        self.sink.remove(&artifact.path)?;
        info!(request = %request_id, "artifact deleted");
        Ok(())
    }

    /// Remove all artifacts older than the given age, returning the ids of
    /// the removed entries. Invoked explicitly by the retention collaborator.
    pub fn cleanup_older_than(&self, age: chrono::Duration) -> Vec<RequestId> {
        let cutoff = Utc::now() - age;
        let expired: Vec<Artifact> = {
            let mut entries = self.entries.lock();
            let ids: Vec<RequestId> = entries
                .values()
                .filter(|a| a.created_at < cutoff)
                .map(|a| a.request_id)
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };
        let mut removed = Vec::with_capacity(expired.len());
        for artifact in expired {
            // File removal failures leave the entry dropped; the file is
            // orphaned but the store stays consistent.
            let _ = self.sink.remove(&artifact.path);
            removed.push(artifact.request_id);
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "cleaned up expired artifacts");
        }
        removed
    }

    /// Number of recorded artifacts.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }
}
