//! The engine state machine: lifecycle, sample-rate setting, and
//! mutually-exclusive transport control over recording and playback.
//!
//! `Engine` is meant to be driven from a single client thread as a
//! process-wide singleton — a client-side convention here, not ambient
//! global state: callers own an `Engine` value and pass it around
//! explicitly.

use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicPtr, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::clip::{ClipId, ClipStore};
use crate::device::DeviceCatalog;
use crate::error::{EngineError, EngineResult};
use crate::playback::arrangement::PlaybackClip;
use crate::playback::mixer::{self, ClipSnapshot};
use crate::playback::{PlaybackArrangement, PlaybackEvent};
use crate::recording::{self, Provisioner, RecordingBuffer, RecordingChain};

/// Length of one recording buffer, in seconds.
const RECORDING_BUFFER_SECONDS: u32 = 5;
/// Remaining headroom in the tail buffer that triggers provisioning.
const RECORDING_BUFFER_PADDING_SECONDS: u32 = 1;

/// The three mutually exclusive transport states, modeled as an explicit
/// enum rather than a pair of booleans — it can't represent an illegal
/// "recording and playing at once" combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Idle,
    Recording,
    Playing,
}

/// State shared with the playback callback: the active list, the event
/// cursor, and a snapshot of the clip samples it needs. Guarded by a
/// `Mutex` the client thread never contends for while playing — transport
/// exclusivity means only the callback touches this while `Playing`, which
/// keeps swappable mixer state behind a lock while hot scalars (the sample
/// cursor) remain plain atomics.
struct MixerState {
    clips: ClipSnapshot,
    placements: Vec<PlaybackClip>,
    events: Vec<PlaybackEvent>,
    first_active: Option<usize>,
    next_event_index: usize,
}

/// Recording-side state kept alive only between `start_recording_clip` and
/// `stop_recording_clip`.
struct RecordingSession {
    chain: RecordingChain,
    current: Arc<AtomicPtr<RecordingBuffer>>,
    underflows: Arc<AtomicU32>,
    provisioner: Provisioner,
    clip_id: ClipId,
}

/// The engine itself. Owns the clip store, placements, events, recording
/// chain, and stream handle.
pub struct Engine {
    host: Option<cpal::Host>,
    devices: DeviceCatalog,
    sample_rate: Option<u32>,
    clips: ClipStore,
    mode: TransportMode,
    stream: Option<cpal::Stream>,

    recording: Option<RecordingSession>,

    arrangement: PlaybackArrangement,
    mixer_state: Option<Arc<Mutex<MixerState>>>,
    playback_sample_index: Arc<AtomicI64>,

    metronome_samples_per_beat: Option<u32>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            host: None,
            devices: DeviceCatalog::default(),
            sample_rate: None,
            clips: ClipStore::new(),
            mode: TransportMode::Idle,
            stream: None,
            recording: None,
            arrangement: PlaybackArrangement::new(),
            mixer_state: None,
            playback_sample_index: Arc::new(AtomicI64::new(0)),
            metronome_samples_per_beat: None,
        }
    }

    fn require_idle(&self) -> EngineResult<()> {
        match self.mode {
            TransportMode::Idle => Ok(()),
            TransportMode::Recording => Err(EngineError::State(
                "cannot perform this action while recording is active".into(),
            )),
            TransportMode::Playing => Err(EngineError::State(
                "cannot perform this action while playback is active".into(),
            )),
        }
    }

    // ---- 4.1 device catalog / lifecycle ----------------------------------

    pub fn initialize(&mut self) -> EngineResult<()> {
        if self.host.is_some() {
            return Err(EngineError::State("engine already initialized".into()));
        }
        let host = cpal::default_host();
        let devices = DeviceCatalog::enumerate(&host)?;
        log::info!(
            "engine initialized: {} input device(s), {} output device(s)",
            devices.input_count(),
            devices.output_count()
        );
        self.host = Some(host);
        self.devices = devices;
        Ok(())
    }

    /// No-ops if the engine was never initialized (or was already shut
    /// down) — the only failure mode is a transport still being active.
    pub fn shutdown(&mut self) -> EngineResult<()> {
        self.require_idle()?;
        log::info!("engine shutting down");
        self.host = None;
        self.devices = DeviceCatalog::default();
        Ok(())
    }

    pub fn input_count(&self) -> usize {
        self.devices.input_count()
    }

    pub fn output_count(&self) -> usize {
        self.devices.output_count()
    }

    pub fn default_input_index(&self) -> Option<usize> {
        self.devices.default_input_index()
    }

    pub fn default_output_index(&self) -> Option<usize> {
        self.devices.default_output_index()
    }

    pub fn input_name(&self, index: usize) -> EngineResult<&str> {
        self.devices.input_name(index)
    }

    pub fn output_name(&self, index: usize) -> EngineResult<&str> {
        self.devices.output_name(index)
    }

    // ---- 4.2 clip store ----------------------------------------------------

    pub fn set_sample_rate(&mut self, sample_rate: i64) -> EngineResult<()> {
        self.require_idle()?;
        if sample_rate <= 0 {
            return Err(EngineError::Precondition("invalid sample rate".into()));
        }
        if !self.clips.is_empty() {
            return Err(EngineError::State("cannot set sample rate when clips exist".into()));
        }
        self.sample_rate = Some(sample_rate as u32);
        log::info!("sample rate set to {sample_rate}");
        Ok(())
    }

    fn sample_rate(&self) -> EngineResult<u32> {
        self.sample_rate
            .ok_or_else(|| EngineError::State("sample rate is unset".into()))
    }

    pub fn load_clip(&mut self, path: &Path) -> EngineResult<ClipId> {
        self.require_idle()?;
        let sample_rate = self.sample_rate()?;
        self.clips.load(path, sample_rate)
    }

    pub fn save_clip(&self, id: ClipId, path: &Path) -> EngineResult<()> {
        let sample_rate = self.sample_rate()?;
        self.clips.save(id, path, sample_rate)
    }

    /// Deleting a clip referenced by an existing placement is rejected
    /// with a state error — this keeps every placement's clip reference
    /// valid without needing to invalidate placements after the fact.
    pub fn delete_clip(&mut self, id: ClipId) -> EngineResult<()> {
        self.require_idle()?;
        if self.arrangement.placements().iter().any(|p| p.clip_id == id) {
            return Err(EngineError::State(
                "cannot delete a clip referenced by the current playback arrangement".into(),
            ));
        }
        self.clips.delete(id)
    }

    pub fn clip_sample_count(&self, id: ClipId) -> EngineResult<usize> {
        self.clips.sample_count(id)
    }

    pub fn clip_samples(&self, id: ClipId, max: i64) -> EngineResult<Vec<f32>> {
        self.clips.preview_samples(id, max)
    }

    pub fn recording_underflows(&self) -> u32 {
        self.recording
            .as_ref()
            .map(|r| r.underflows.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // ---- 4.3 / 4.6 recording transport --------------------------------------

    pub fn start_recording_clip(
        &mut self,
        input_index: usize,
        output_index: usize,
        frames_per_buffer: u32,
    ) -> EngineResult<ClipId> {
        self.require_idle()?;
        let sample_rate = self.sample_rate()?;
        if frames_per_buffer == 0 {
            return Err(EngineError::Precondition("invalid frames per buffer".into()));
        }
        let input_device = self.devices.input(input_index)?.clone();
        // The output index is validated too (callers pass both sides of a
        // duplex pair), but only the capture stream is opened — there's no
        // live-monitoring path to feed an output device during recording.
        self.devices.output(output_index)?;

        let host = self.host.as_ref().ok_or_else(|| EngineError::State("engine not initialized".into()))?;
        let devices = host.input_devices().map_err(|e| EngineError::Host(e.to_string()))?;
        let cpal_device = devices
            .into_iter()
            .find(|d| d.name().map(|n| n == input_device.name).unwrap_or(false))
            .ok_or_else(|| EngineError::Host("input device no longer available".into()))?;

        check_format_supported(&cpal_device, sample_rate, true)?;

        let capacity = (sample_rate * RECORDING_BUFFER_SECONDS) as usize;
        let padding = (sample_rate * RECORDING_BUFFER_PADDING_SECONDS) as usize;

        let chain = RecordingChain::new(capacity);
        let current = Arc::new(AtomicPtr::new(chain.head_ptr()));
        let underflows = Arc::new(AtomicU32::new(0));
        let provisioner = Provisioner::spawn(chain.tail_handle(), capacity, padding);

        let config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(frames_per_buffer),
        };

        let callback_current = Arc::clone(&current);
        let callback_underflows = Arc::clone(&underflows);
        let stream = cpal_device.build_input_stream(
            &config,
            move |input: &[f32], _: &cpal::InputCallbackInfo| {
                recording::capture_callback(&callback_current, &callback_underflows, input);
            },
            |err| log::error!("capture stream error: {err}"),
            None,
        );

        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                provisioner.join();
                return Err(EngineError::Host(format!("failed to build capture stream: {e}")));
            }
        };

        if let Err(e) = stream.play() {
            provisioner.join();
            return Err(EngineError::Host(format!("failed to start capture stream: {e}")));
        }

        let clip_id = self.clips.insert_empty();

        self.recording = Some(RecordingSession {
            chain,
            current,
            underflows,
            provisioner,
            clip_id,
        });
        self.stream = Some(stream);
        self.mode = TransportMode::Recording;
        log::info!("recording started into clip {clip_id}");
        Ok(clip_id)
    }

    pub fn stop_recording_clip(&mut self) -> EngineResult<()> {
        let mut session = match self.recording.take() {
            Some(s) => s,
            None => return Err(EngineError::State("not recording".into())),
        };

        if let Some(stream) = self.stream.take() {
            stream.pause().map_err(|e| EngineError::Host(format!("failed to stop the stream: {e}")))?;
        }

        session.provisioner.join();
        let samples = session.chain.drain();
        self.clips.set_samples(session.clip_id, samples);

        self.mode = TransportMode::Idle;
        log::info!(
            "recording stopped; clip {} has {} underflow(s)",
            session.clip_id,
            session.underflows.load(Ordering::Relaxed)
        );
        Ok(())
    }

    pub fn get_latest_recorded_samples(&self, n: i64) -> EngineResult<Vec<f32>> {
        if n < 0 {
            return Err(EngineError::Precondition("invalid sample count".into()));
        }
        let session = self
            .recording
            .as_ref()
            .ok_or_else(|| EngineError::State("not recording".into()))?;
        Ok(recording::latest_samples(&session.current, n as usize))
    }

    // ---- 4.4 playback arrangement builder -----------------------------------

    pub fn playback_builder_begin(&mut self) -> EngineResult<()> {
        self.require_idle()?;
        self.arrangement.begin();
        Ok(())
    }

    pub fn playback_builder_add_clip(
        &mut self,
        clip_id: ClipId,
        start: i64,
        end: i64,
        playback_start: i64,
    ) -> EngineResult<()> {
        self.require_idle()?;
        let clip_len = self.clips.sample_count(clip_id)?;
        self.arrangement.add_clip(clip_id, start, end, playback_start, clip_len)
    }

    pub fn playback_builder_finalize(&mut self) -> EngineResult<()> {
        self.require_idle()?;
        self.arrangement.finalize();
        Ok(())
    }

    // ---- 4.5 / 4.6 playback transport ----------------------------------------

    pub fn start_playback(
        &mut self,
        output_index: usize,
        frames_per_buffer: u32,
        sample_index: i64,
    ) -> EngineResult<()> {
        self.require_idle()?;
        let sample_rate = self.sample_rate()?;
        if frames_per_buffer == 0 {
            return Err(EngineError::Precondition("invalid frames per buffer".into()));
        }
        let output_device = self.devices.output(output_index)?.clone();

        let host = self.host.as_ref().ok_or_else(|| EngineError::State("engine not initialized".into()))?;
        let cpal_devices = host.output_devices().map_err(|e| EngineError::Host(e.to_string()))?;
        let cpal_device = cpal_devices
            .into_iter()
            .find(|d| d.name().map(|n| n == output_device.name).unwrap_or(false))
            .ok_or_else(|| EngineError::Host("output device no longer available".into()))?;

        check_format_supported(&cpal_device, sample_rate, false)?;

        let mut placements = self.arrangement.placements().to_vec();
        let events = self.arrangement.events().to_vec();
        let (first_active, next_event_index) =
            mixer::activate_for_start(&mut placements, &events, sample_index);

        let mut clips = ClipSnapshot::new();
        for placement in &placements {
            if !clips.contains_key(&placement.clip_id) {
                clips.insert(placement.clip_id, self.clips.samples_handle(placement.clip_id)?);
            }
        }

        let mixer_state = Arc::new(Mutex::new(MixerState {
            clips,
            placements,
            events,
            first_active,
            next_event_index,
        }));

        let config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(frames_per_buffer),
        };

        let callback_state = Arc::clone(&mixer_state);
        let callback_cursor = Arc::clone(&self.playback_sample_index);
        let stream = cpal_device.build_output_stream(
            &config,
            move |output: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut state = callback_state.lock().expect("mixer state lock poisoned");
                let MixerState {
                    clips,
                    placements,
                    events,
                    first_active,
                    next_event_index,
                } = &mut *state;
                let cursor = callback_cursor.load(Ordering::Acquire);
                let end = mixer::mix_into(output, clips, placements, events, first_active, next_event_index, cursor);
                callback_cursor.store(end, Ordering::Release);
            },
            |err| log::error!("playback stream error: {err}"),
            None,
        );

        let stream = match stream {
            Ok(s) => s,
            Err(e) => return Err(EngineError::Host(format!("failed to build playback stream: {e}"))),
        };

        // Published before `play()` so the callback's first invocation
        // reads the correct starting cursor; on a start failure below,
        // nothing has been exposed as Playing and the next successful
        // `start_playback` overwrites it anyway.
        self.playback_sample_index.store(sample_index, Ordering::Release);

        if let Err(e) = stream.play() {
            return Err(EngineError::Host(format!("failed to start playback stream: {e}")));
        }

        self.mixer_state = Some(mixer_state);
        self.stream = Some(stream);
        self.mode = TransportMode::Playing;
        log::info!("playback started at sample {sample_index}");
        Ok(())
    }

    pub fn stop_playback(&mut self) -> EngineResult<()> {
        if self.mode != TransportMode::Playing {
            return Err(EngineError::State("not playing".into()));
        }
        if let Some(stream) = self.stream.take() {
            stream.pause().map_err(|e| EngineError::Host(format!("failed to stop the stream: {e}")))?;
        }
        // The active list lives entirely in `mixer_state`'s snapshot; no
        // invariant requires it be reflected back into `arrangement`, so
        // we simply drop it here.
        self.mixer_state = None;
        self.mode = TransportMode::Idle;
        log::info!("playback stopped");
        Ok(())
    }

    pub fn get_playback_sample_index(&self) -> i64 {
        self.playback_sample_index.load(Ordering::Acquire)
    }

    // ---- transport lifecycle / metronome (reserved) -------------------------

    pub fn transport_mode(&self) -> TransportMode {
        self.mode
    }

    /// Reserved and inert: stored for later retrieval but has no effect
    /// on capture or playback.
    pub fn set_metronome_samples_per_beat(&mut self, samples_per_beat: u32) {
        self.metronome_samples_per_beat = Some(samples_per_beat);
    }

    pub fn metronome_samples_per_beat(&self) -> Option<u32> {
        self.metronome_samples_per_beat
    }
}

/// Check that `device` supports mono float32 at `sample_rate`, in the
/// direction indicated by `is_input`. cpal has no single "is format
/// supported" query like PortAudio's `Pa_IsFormatSupported`, so this scans
/// the device's supported config ranges for one that covers the rate.
fn check_format_supported(device: &cpal::Device, sample_rate: u32, is_input: bool) -> EngineResult<()> {
    let configs: Vec<_> = if is_input {
        device
            .supported_input_configs()
            .map_err(|e| EngineError::Host(e.to_string()))?
            .collect()
    } else {
        device
            .supported_output_configs()
            .map_err(|e| EngineError::Host(e.to_string()))?
            .collect()
    };

    let supported = configs.iter().any(|range| {
        range.channels() == 1
            && range.sample_format() == cpal::SampleFormat::F32
            && range.min_sample_rate().0 <= sample_rate
            && range.max_sample_rate().0 >= sample_rate
    });

    if supported {
        Ok(())
    } else {
        Err(EngineError::Host(format!(
            "device does not support mono float32 at {sample_rate}Hz"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_rate(sample_rate: i64) -> Engine {
        let mut engine = Engine::new();
        // Device enumeration requires `initialize`, which needs a real
        // host; transport-state and clip-store tests below don't touch
        // devices, so they construct the engine directly and only set the
        // sample rate.
        engine.sample_rate = Some(sample_rate as u32);
        engine
    }

    #[test]
    fn set_sample_rate_rejects_non_positive_values() {
        let mut engine = Engine::new();
        assert!(matches!(
            engine.set_sample_rate(0).unwrap_err(),
            EngineError::Precondition(_)
        ));
        assert!(matches!(
            engine.set_sample_rate(-1).unwrap_err(),
            EngineError::Precondition(_)
        ));
    }

    #[test]
    fn set_sample_rate_rejects_when_clips_exist() {
        let mut engine = engine_with_rate(44100);
        engine.clips.insert_empty();
        assert!(matches!(
            engine.set_sample_rate(48000).unwrap_err(),
            EngineError::State(_)
        ));
    }

    #[test]
    fn operations_requiring_idle_reject_while_recording() {
        let mut engine = engine_with_rate(44100);
        engine.mode = TransportMode::Recording;

        assert!(matches!(engine.set_sample_rate(48000).unwrap_err(), EngineError::State(_)));
        assert!(matches!(engine.playback_builder_begin().unwrap_err(), EngineError::State(_)));
        assert!(matches!(engine.playback_builder_finalize().unwrap_err(), EngineError::State(_)));
        let clip = engine.clips.insert_empty();
        assert!(matches!(engine.delete_clip(clip).unwrap_err(), EngineError::State(_)));
    }

    #[test]
    fn operations_requiring_idle_reject_while_playing() {
        let mut engine = engine_with_rate(44100);
        engine.mode = TransportMode::Playing;

        assert!(matches!(engine.set_sample_rate(48000).unwrap_err(), EngineError::State(_)));
        assert!(matches!(engine.playback_builder_begin().unwrap_err(), EngineError::State(_)));
        let clip = engine.clips.insert_empty();
        assert!(matches!(engine.delete_clip(clip).unwrap_err(), EngineError::State(_)));
    }

    #[test]
    fn shutdown_without_initialize_is_a_no_op() {
        let mut engine = Engine::new();
        assert!(engine.shutdown().is_ok());
        assert!(engine.shutdown().is_ok(), "shutting down twice should still succeed");
    }

    #[test]
    fn shutdown_rejects_while_a_transport_is_active() {
        let mut engine = engine_with_rate(44100);
        engine.mode = TransportMode::Recording;
        assert!(matches!(engine.shutdown().unwrap_err(), EngineError::State(_)));
    }

    #[test]
    fn stop_recording_without_recording_is_state_error() {
        let mut engine = engine_with_rate(44100);
        assert!(matches!(engine.stop_recording_clip().unwrap_err(), EngineError::State(_)));
    }

    #[test]
    fn stop_playback_without_playing_is_state_error() {
        let mut engine = engine_with_rate(44100);
        assert!(matches!(engine.stop_playback().unwrap_err(), EngineError::State(_)));
    }

    #[test]
    fn get_latest_recorded_samples_requires_recording() {
        let engine = engine_with_rate(44100);
        assert!(matches!(
            engine.get_latest_recorded_samples(10).unwrap_err(),
            EngineError::State(_)
        ));
    }

    #[test]
    fn delete_clip_rejects_clip_referenced_by_a_placement() {
        let mut engine = engine_with_rate(44100);
        let clip = engine.clips.insert(vec![1.0, 2.0, 3.0]);
        engine.playback_builder_begin().unwrap();
        engine.playback_builder_add_clip(clip, 0, 3, 0).unwrap();

        assert!(matches!(engine.delete_clip(clip).unwrap_err(), EngineError::State(_)));
    }

    #[test]
    fn metronome_setter_is_inert_but_observable() {
        let mut engine = Engine::new();
        assert_eq!(engine.metronome_samples_per_beat(), None);
        engine.set_metronome_samples_per_beat(24000);
        assert_eq!(engine.metronome_samples_per_beat(), Some(24000));
    }

    #[test]
    fn load_clip_requires_sample_rate_to_be_set() {
        let mut engine = Engine::new();
        let err = engine.load_clip(Path::new("nonexistent.wav")).unwrap_err();
        assert!(matches!(err, EngineError::State(_)));
    }
}
