//! Reference-voice registry.
//!
//! Maps caller-facing voice reference ids to reference audio files on disk.
//! Admission validates the reference here so unknown voices never enter the
//! pending pool.

use crate::error::{CadenceError, CadenceResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

/// Registry of reference voices available for synthesis.
#[derive(Debug, Default)]
pub struct VoiceRegistry {
    voices: RwLock<HashMap<String, PathBuf>>,
}

impl VoiceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a voice reference id pointing at a reference audio file.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if the id is empty or the file does not
    /// exist.
    pub fn register<S: Into<String>, P: Into<PathBuf>>(
        &self,
        voice_id: S,
        audio_path: P,
    ) -> CadenceResult<()> {
        let voice_id = voice_id.into();
        let audio_path = audio_path.into();
        if voice_id.is_empty() {
            return Err(CadenceError::validation("voice id cannot be empty"));
        }
        if !audio_path.exists() {
            return Err(CadenceError::validation(format!(
                "reference audio file does not exist: {}",
                audio_path.display()
            )));
        }
        info!(voice = %voice_id, path = %audio_path.display(), "registered voice reference");
        self.voices.write().insert(voice_id, audio_path);
        Ok(())
    }

    /// Resolve a voice reference id to its reference audio path.
    ///
    /// # Errors
    ///
    /// Returns `VoiceNotFound` for unregistered ids.
    pub fn resolve(&self, voice_id: &str) -> CadenceResult<PathBuf> {
        self.voices
            .read()
            .get(voice_id)
            .cloned()
            .ok_or_else(|| CadenceError::voice_not_found(voice_id))
    }

    /// Remove a voice reference.
    ///
    /// # Errors
    ///
    /// Returns `VoiceNotFound` if the id is not registered.
    pub fn remove(&self, voice_id: &str) -> CadenceResult<PathBuf> {
        self.voices
            .write()
            .remove(voice_id)
            .ok_or_else(|| CadenceError::voice_not_found(voice_id))
    }

    /// Whether a voice reference id is registered.
    #[must_use]
    pub fn contains(&self, voice_id: &str) -> bool {
        self.voices.read().contains_key(voice_id)
    }

    /// List registered voice ids, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.voices.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
