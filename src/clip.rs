//! The clip store: a map from opaque [`ClipId`] to an immutable mono
//! sample sequence, plus file I/O via [`crate::wav`].

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::wav;

/// Opaque, process-unique, monotonically assigned clip identifier.
/// Never reused within a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClipId(u64);

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A mono clip owned by the [`ClipStore`]. Mutated only at creation
/// (load or end-of-recording); destroyed only by explicit delete.
///
/// Samples live behind an `Arc` so the playback mixer can take a cheap
/// snapshot of the clips a finalized arrangement references, rather than
/// holding a lock on the whole store for the duration of playback.
#[derive(Debug, Clone)]
pub struct Clip {
    pub id: ClipId,
    pub samples: Arc<Vec<f32>>,
}

/// Mapping from [`ClipId`] to [`Clip`], plus the id generator.
#[derive(Debug, Default)]
pub struct ClipStore {
    next_id: u64,
    clips: HashMap<ClipId, Clip>,
}

impl ClipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn contains(&self, id: ClipId) -> bool {
        self.clips.contains_key(&id)
    }

    pub fn get(&self, id: ClipId) -> EngineResult<&Clip> {
        self.clips
            .get(&id)
            .ok_or_else(|| EngineError::Precondition(format!("invalid clip id {id}")))
    }

    /// Allocate the next id and insert a clip holding `samples`.
    pub(crate) fn insert(&mut self, samples: Vec<f32>) -> ClipId {
        let id = ClipId(self.next_id);
        self.next_id += 1;
        self.clips.insert(
            id,
            Clip {
                id,
                samples: Arc::new(samples),
            },
        );
        id
    }

    /// Reserve the next id and insert an empty clip — used when recording
    /// starts, before any samples have been captured.
    pub fn insert_empty(&mut self) -> ClipId {
        self.insert(Vec::new())
    }

    /// Fill in the samples of a previously-reserved empty clip (the
    /// recording clip, once capture stops).
    pub fn set_samples(&mut self, id: ClipId, samples: Vec<f32>) {
        if let Some(clip) = self.clips.get_mut(&id) {
            clip.samples = Arc::new(samples);
        }
    }

    /// Cheap `Arc` clone of a clip's samples, for the mixer's per-clip
    /// snapshot taken at `start_playback` (see [`crate::playback::mixer`]).
    pub fn samples_handle(&self, id: ClipId) -> EngineResult<Arc<Vec<f32>>> {
        Ok(Arc::clone(&self.get(id)?.samples))
    }

    /// Read a WAV file and insert it as a new clip. Fails on I/O error,
    /// invalid format, or a sample rate mismatch against `expected_sample_rate`.
    pub fn load(&mut self, path: &Path, expected_sample_rate: u32) -> EngineResult<ClipId> {
        let bytes = fs::read(path)?;
        let wav = wav::decode(&bytes)?;
        if wav.sample_rate != expected_sample_rate {
            return Err(EngineError::Precondition(format!(
                "sample rate mismatch: file is {}Hz, engine is {}Hz",
                wav.sample_rate, expected_sample_rate
            )));
        }
        let id = self.insert(wav.samples);
        log::info!("loaded clip {id} from '{}'", path.display());
        Ok(id)
    }

    /// Write a clip to WAV at `sample_rate`.
    pub fn save(&self, id: ClipId, path: &Path, sample_rate: u32) -> EngineResult<()> {
        let clip = self.get(id)?;
        let bytes = wav::encode(sample_rate, &clip.samples);
        fs::write(path, bytes)?;
        log::info!("saved clip {id} to '{}'", path.display());
        Ok(())
    }

    /// Remove a clip. Caller is responsible for the transport-state check;
    /// this only validates the id.
    pub fn delete(&mut self, id: ClipId) -> EngineResult<()> {
        self.clips
            .remove(&id)
            .ok_or_else(|| EngineError::Precondition(format!("invalid clip id {id}")))?;
        Ok(())
    }

    pub fn sample_count(&self, id: ClipId) -> EngineResult<usize> {
        Ok(self.get(id)?.samples.len())
    }

    /// Nearest-neighbor preview: exactly `max` samples (or the full clip if
    /// `max <= 0`), where sample `i` is `clip.samples[floor(i * len / max)]`.
    pub fn preview_samples(&self, id: ClipId, max: i64) -> EngineResult<Vec<f32>> {
        let clip = self.get(id)?;
        let len = clip.samples.len();
        let max = if max <= 0 { len as i64 } else { max };
        if max == 0 || len == 0 {
            return Ok(Vec::new());
        }
        let max = max as usize;
        let mut out = Vec::with_capacity(max);
        for i in 0..max {
            let source_index = (i as u64 * len as u64 / max as u64) as usize;
            out.push(clip.samples[source_index]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing_and_never_repeat() {
        let mut store = ClipStore::new();
        let a = store.insert(vec![1.0]);
        let b = store.insert(vec![2.0]);
        let c = store.insert(vec![3.0]);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn get_invalid_id_is_precondition_error() {
        let store = ClipStore::new();
        let err = store.get(ClipId(0)).unwrap_err();
        assert!(matches!(err, EngineError::Precondition(_)));
    }

    #[test]
    fn delete_invalid_id_is_precondition_error() {
        let mut store = ClipStore::new();
        let err = store.delete(ClipId(0)).unwrap_err();
        assert!(matches!(err, EngineError::Precondition(_)));
    }

    #[test]
    fn preview_subsampling_matches_nearest_neighbor_rule() {
        let mut store = ClipStore::new();
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let id = store.insert(samples.clone());

        let max = 10;
        let preview = store.preview_samples(id, max).unwrap();
        assert_eq!(preview.len(), max as usize);
        for (i, &value) in preview.iter().enumerate() {
            let expected = samples[(i as u64 * 100 / max as u64) as usize];
            assert_eq!(value, expected);
        }
    }

    #[test]
    fn preview_with_non_positive_max_returns_full_clip() {
        let mut store = ClipStore::new();
        let samples = vec![1.0, 2.0, 3.0];
        let id = store.insert(samples.clone());
        assert_eq!(store.preview_samples(id, 0).unwrap(), samples);
        assert_eq!(store.preview_samples(id, -5).unwrap(), samples);
    }

    #[test]
    fn load_save_round_trip_is_bit_exact() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("clip.wav");

        let mut writer_store = ClipStore::new();
        let samples = vec![0.25_f32, -0.75, 1.0, -1.0];
        let id = writer_store.insert(samples.clone());
        writer_store.save(id, &path, 44100).unwrap();

        let mut reader_store = ClipStore::new();
        let loaded = reader_store.load(&path, 44100).unwrap();
        assert_eq!(*reader_store.get(loaded).unwrap().samples, samples);
    }

    #[test]
    fn load_rejects_sample_rate_mismatch() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("clip.wav");
        std::fs::write(&path, wav::encode(48000, &[0.0, 1.0])).unwrap();

        let mut store = ClipStore::new();
        let err = store.load(&path, 44100).unwrap_err();
        assert!(matches!(err, EngineError::Precondition(_)));
    }
}
