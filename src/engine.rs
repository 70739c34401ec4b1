use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{info, warn};

use crate::error::SoftAeResult;
use crate::format::{from_float, mix_accumulate, scale_array, AudioFormat, Channel};
use crate::packetizer::Packetizer;
use crate::remap::ChannelRemap;
use crate::sink::Sink;
use crate::sound::{mix_sounds, Sound, SoundPlayback};
use crate::stream::{Stream, StreamState};
use crate::viz::{VizBuffer, VIZ_BUFFER_SAMPLES};

struct EngineState {
    streams: Vec<Arc<Stream>>,
    playing_sounds: Vec<SoundPlayback>,
    canonical_layout: Vec<Channel>,
    frames_per_period: usize,
    sink_format: AudioFormat,
    remap_to_sink: ChannelRemap,
}

/// The mixing engine thread loop (`CSoftAE`): pulls canonical float frames from every
/// registered [`Stream`], sums one-shot [`Sound`] playbacks, normalizes on clip,
/// remaps to the sink's negotiated channel layout, converts to sink PCM, and writes.
///
/// `run_iteration` is the single testable unit of work; `run` simply drives it in a
/// loop until [`Engine::stop`] flips the running flag, matching `CSoftAE::Run`/`Stop`.
pub struct Engine {
    sink: Mutex<Box<dyn Sink>>,
    state: RwLock<EngineState>,
    reconfigure: Mutex<Option<AudioFormat>>,
    viz: VizBuffer,
    running: AtomicBool,
    passthrough_enabled: AtomicBool,
}

impl Engine {
    pub fn new(
        mut sink: Box<dyn Sink>,
        canonical: AudioFormat,
        passthrough_enabled: bool,
    ) -> SoftAeResult<Self> {
        let actual = sink.open(&canonical)?;
        let remap_to_sink = ChannelRemap::new(&canonical.channel_layout, &actual.channel_layout);
        info!(
            "engine opened: canonical {} ch @ {} Hz -> sink {} ch @ {} Hz",
            canonical.channel_count, canonical.sample_rate, actual.channel_count, actual.sample_rate
        );

        Ok(Self {
            sink: Mutex::new(sink),
            state: RwLock::new(EngineState {
                streams: Vec::new(),
                playing_sounds: Vec::new(),
                canonical_layout: canonical.channel_layout.clone(),
                frames_per_period: canonical.frames_per_period,
                sink_format: actual,
                remap_to_sink,
            }),
            reconfigure: Mutex::new(None),
            viz: VizBuffer::new(),
            running: AtomicBool::new(false),
            passthrough_enabled: AtomicBool::new(passthrough_enabled),
        })
    }

    /// Requests that the next iteration close and reopen the sink with `desired`
    /// before resuming the mix loop (`CSoftAE::OnSettingsChange`/`OpenSink`).
    pub fn request_reconfigure(&self, desired: AudioFormat) {
        *self.reconfigure.lock().expect("reconfigure lock poisoned") = Some(desired);
    }

    pub fn set_passthrough_enabled(&self, enabled: bool) {
        self.passthrough_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn add_stream(&self, stream: Arc<Stream>) {
        self.state
            .write()
            .expect("engine lock poisoned")
            .streams
            .push(stream);
    }

    pub fn stream_count(&self) -> usize {
        self.state.read().expect("engine lock poisoned").streams.len()
    }

    pub fn play_sound(&self, sound: Arc<Sound>) {
        self.state
            .write()
            .expect("engine lock poisoned")
            .playing_sounds
            .push(SoundPlayback::new(sound));
    }

    /// Removes every active playback of the sound identified by `key`.
    pub fn stop_sound(&self, key: &str) {
        self.state
            .write()
            .expect("engine lock poisoned")
            .playing_sounds
            .retain(|p| p.sound_key() != key);
    }

    pub fn playing_sound_count(&self) -> usize {
        self.state.read().expect("engine lock poisoned").playing_sounds.len()
    }

    pub fn viz_snapshot(&self) -> Vec<f32> {
        self.viz.snapshot()
    }

    pub fn get_delay(&self) -> f64 {
        self.sink.lock().expect("sink lock poisoned").get_delay()
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Drives the mix loop until [`Engine::stop`] is called. Meant to be run on its
    /// own thread; the current period's sink write always completes before the loop
    /// checks the running flag again and closes the sink.
    pub fn run(&self) -> SoftAeResult<()> {
        self.running.store(true, Ordering::Release);
        while self.running.load(Ordering::Acquire) {
            self.run_iteration()?;
        }
        self.sink.lock().expect("sink lock poisoned").close();
        Ok(())
    }

    /// One pass of the loop body described in the engine design: reconfigure if
    /// requested, pick raw-passthrough vs mixed mode, and produce one period.
    /// Returns the number of frames actually written to the sink.
    pub fn run_iteration(&self) -> SoftAeResult<usize> {
        if let Some(desired) = self.reconfigure.lock().expect("reconfigure lock poisoned").take() {
            self.open_sink(&desired)?;
        }

        match self.raw_passthrough_target() {
            Some(stream) => self.run_raw_passthrough_iteration(&stream),
            None => self.run_mixed_iteration(),
        }
    }

    fn open_sink(&self, desired: &AudioFormat) -> SoftAeResult<()> {
        let mut sink = self.sink.lock().expect("sink lock poisoned");
        sink.close();
        let actual = sink.open(desired)?;
        drop(sink);

        let mut state = self.state.write().expect("engine lock poisoned");
        state.remap_to_sink = ChannelRemap::new(&state.canonical_layout, &actual.channel_layout);
        info!(
            "sink reconfigured: {} ch @ {} Hz",
            actual.channel_count, actual.sample_rate
        );
        state.sink_format = actual;
        Ok(())
    }

    /// True exactly when passthrough is enabled and precisely one non-paused stream
    /// advertises a `Raw` data format (step 2 of the engine loop design).
    fn raw_passthrough_target(&self) -> Option<Arc<Stream>> {
        if !self.passthrough_enabled.load(Ordering::Relaxed) {
            return None;
        }

        let state = self.state.read().expect("engine lock poisoned");
        let mut candidate = None;
        let mut raw_running_count = 0;
        for stream in &state.streams {
            if stream.is_raw() && stream.state() != StreamState::Paused {
                raw_running_count += 1;
                candidate = Some(Arc::clone(stream));
            }
        }

        if raw_running_count == 1 {
            candidate
        } else {
            None
        }
    }

    fn run_raw_passthrough_iteration(&self, stream: &Arc<Stream>) -> SoftAeResult<usize> {
        let period_bytes = {
            let state = self.state.read().expect("engine lock poisoned");
            state.frames_per_period * state.sink_format.frame_size_bytes.max(1)
        };

        if let Some(hint) = stream.wants_data(period_bytes) {
            stream.invoke_data_callback(hint);
        }

        let mut bytes = Vec::new();
        let pulled = stream.get_raw_bytes(period_bytes, &mut bytes);
        if pulled == 0 {
            self.garbage_collect();
            return Ok(0);
        }

        if let Some(compressed_format) = stream.compressed_format() {
            bytes = Packetizer::new(compressed_format, period_bytes).wrap(&bytes);
        }

        // Raw/passthrough frame counts have no stable relationship to sink
        // `frame_size_bytes` (already-packetized bursts), so the byte count itself
        // doubles as the `frame_count` hint the sink uses purely for pacing.
        let write_result = self.sink.lock().expect("sink lock poisoned").write(&bytes, bytes.len());

        self.garbage_collect();

        match write_result {
            Ok(written) => Ok(written),
            Err(err) => {
                warn!("sink write failed, dropping this period: {err}");
                Ok(0)
            }
        }
    }

    fn run_mixed_iteration(&self) -> SoftAeResult<usize> {
        let (streams, frames_per_period, canonical_channels, sink_format, remap_is_passthrough) = {
            let state = self.state.read().expect("engine lock poisoned");
            (
                state.streams.clone(),
                state.frames_per_period,
                state.canonical_layout.len().max(1),
                state.sink_format.clone(),
                state.remap_to_sink.is_passthrough(),
            )
        };

        for stream in &streams {
            if let Some(hint) = stream.wants_data(frames_per_period) {
                stream.invoke_data_callback(hint);
            }
        }

        let mut accumulator = vec![0.0_f32; frames_per_period * canonical_channels];
        for stream in &streams {
            let mut frame_buf = Vec::with_capacity(frames_per_period * canonical_channels);
            stream.get_frame(frames_per_period, canonical_channels, &mut frame_buf);
            // A short pull (stream behind, or exhausted) naturally contributes
            // silence for its missing tail: `accumulator` starts zeroed and only
            // the samples actually returned are summed in.
            mix_accumulate(&mut accumulator[..frame_buf.len()], &frame_buf, 1.0);
        }

        {
            let mut state = self.state.write().expect("engine lock poisoned");
            mix_sounds(&mut state.playing_sounds, &mut accumulator, frames_per_period);
        }

        let peak = accumulator.iter().fold(0.0_f32, |m, &s| m.max(s.abs()));
        if peak > 1.0 {
            warn!("period clipped at peak {peak:.3}, normalizing");
            scale_array(&mut accumulator, 1.0 / peak);
        }

        let viz_take = accumulator.len().min(VIZ_BUFFER_SAMPLES);
        self.viz.publish(&accumulator[..viz_take]);

        let sink_channels = sink_format.channel_count.max(1);
        let mut remapped_storage;
        let to_convert: &[f32] = if remap_is_passthrough {
            &accumulator
        } else {
            remapped_storage = vec![0.0_f32; frames_per_period * sink_channels];
            let state = self.state.read().expect("engine lock poisoned");
            state.remap_to_sink.remap(&accumulator, &mut remapped_storage, frames_per_period);
            &remapped_storage
        };

        let mut pcm_bytes = Vec::new();
        from_float(to_convert, to_convert.len(), sink_format.data_format, &mut pcm_bytes);

        let write_result = self
            .sink
            .lock()
            .expect("sink lock poisoned")
            .write(&pcm_bytes, frames_per_period);

        self.garbage_collect();

        match write_result {
            Ok(written_frames) => Ok(written_frames),
            Err(err) => {
                warn!("sink write failed, dropping this period: {err}");
                Ok(0)
            }
        }
    }

    /// Removes every stream that is `Drained` and `free_on_drain`, firing its free
    /// callback (the single legal release point) before dropping the engine's `Arc`.
    fn garbage_collect(&self) {
        let mut state = self.state.write().expect("engine lock poisoned");
        let mut i = 0;
        while i < state.streams.len() {
            let stream = &state.streams[i];
            if stream.state() == StreamState::Drained && stream.free_on_drain() {
                let freed = state.streams.remove(i);
                drop(state);
                freed.fire_free_callback();
                state = self.state.write().expect("engine lock poisoned");
            } else {
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SoftAeResult as Result_;
    use crate::format::DataFormat;
    use crate::stream::stream_options;
    use std::sync::atomic::AtomicUsize;

    struct RecordingSink {
        written: Vec<u8>,
        opened_format: Option<AudioFormat>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                written: Vec::new(),
                opened_format: None,
            }
        }
    }

    impl Sink for RecordingSink {
        fn open(&mut self, desired: &AudioFormat) -> Result_<AudioFormat> {
            self.opened_format = Some(desired.clone());
            Ok(desired.clone())
        }

        fn write(&mut self, bytes: &[u8], frame_count: usize) -> Result_<usize> {
            self.written.extend_from_slice(bytes);
            Ok(frame_count)
        }

        fn drain(&mut self) {}

        fn get_delay(&self) -> f64 {
            0.0
        }

        fn close(&mut self) {}
    }

    fn stereo_canonical(frames_per_period: usize) -> AudioFormat {
        AudioFormat::stereo(48_000, DataFormat::Float, frames_per_period)
    }

    #[test]
    fn engine_opens_sink_with_canonical_format() {
        let sink = Box::new(RecordingSink::new());
        let engine = Engine::new(sink, stereo_canonical(256), false).unwrap();
        assert_eq!(engine.stream_count(), 0);
    }

    #[test]
    fn silent_period_writes_zeroed_bytes_of_expected_length() {
        let sink = Box::new(RecordingSink::new());
        let engine = Engine::new(sink, stereo_canonical(64), false).unwrap();

        let written = engine.run_iteration().unwrap();
        assert_eq!(written, 64);
    }

    #[test]
    fn stream_contributes_its_samples_into_the_mix() {
        let sink = Box::new(RecordingSink::new());
        let engine = Engine::new(sink, stereo_canonical(4), false).unwrap();

        let layout = vec![Channel::FrontLeft, Channel::FrontRight];
        let format_in = AudioFormat::stereo(48_000, DataFormat::Float, 4);
        let stream = Arc::new(Stream::new(format_in, &layout, 64, stream_options::NONE));

        let mut bytes = Vec::new();
        crate::format::from_float(&[0.5, 0.5, 0.5, 0.5], 4, DataFormat::Float, &mut bytes);
        stream.add_data(&bytes);

        engine.add_stream(stream);
        assert_eq!(engine.stream_count(), 1);

        let written = engine.run_iteration().unwrap();
        assert_eq!(written, 2);
    }

    #[test]
    fn raw_passthrough_stream_is_burst_wrapped_before_reaching_the_sink() {
        use crate::packetizer::CompressedFormat;

        let sink = Box::new(RecordingSink::new());
        let engine = Engine::new(sink, stereo_canonical(4), true).unwrap();

        let layout = vec![Channel::FrontLeft, Channel::FrontRight];
        let format_in = AudioFormat::compressed(48_000, layout.clone(), CompressedFormat::Ac3, 32, 4);
        let stream = Arc::new(Stream::new(format_in, &layout, 64, stream_options::NONE));
        stream.add_data(&[1, 2, 3, 4]);

        engine.add_stream(stream);
        let written = engine.run_iteration().unwrap();

        assert_eq!(written, 32, "raw passthrough period should be burst-wrapped to the negotiated size");
    }

    #[test]
    fn drained_free_on_drain_stream_is_collected_and_fires_callback() {
        let sink = Box::new(RecordingSink::new());
        let engine = Engine::new(sink, stereo_canonical(4), false).unwrap();

        let layout = vec![Channel::FrontLeft, Channel::FrontRight];
        let format_in = AudioFormat::stereo(48_000, DataFormat::Float, 4);
        let stream = Arc::new(Stream::new(format_in, &layout, 64, stream_options::FREE_ON_DRAIN));
        stream.drain();

        let freed = Arc::new(AtomicUsize::new(0));
        let freed_cb = Arc::clone(&freed);
        stream.set_free_callback(move || {
            freed_cb.fetch_add(1, Ordering::SeqCst);
        });

        engine.add_stream(stream);
        engine.run_iteration().unwrap();

        assert_eq!(engine.stream_count(), 0);
        assert_eq!(freed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn playing_sound_is_removed_once_exhausted() {
        let sink = Box::new(RecordingSink::new());
        let engine = Engine::new(sink, stereo_canonical(8), false).unwrap();

        let sound = Arc::new(Sound::new("beep".to_string(), vec![0.2_f32; 4], 2, 48_000));
        engine.play_sound(sound);
        assert_eq!(engine.playing_sound_count(), 1);

        engine.run_iteration().unwrap();
        assert_eq!(engine.playing_sound_count(), 0);
    }

    #[test]
    fn clipping_period_is_normalized_to_unity_peak() {
        let sink = Box::new(RecordingSink::new());
        let engine = Engine::new(sink, stereo_canonical(2), false).unwrap();

        let layout = vec![Channel::FrontLeft, Channel::FrontRight];
        let format_in = AudioFormat::stereo(48_000, DataFormat::Float, 2);
        let stream = Arc::new(Stream::new(format_in, &layout, 64, stream_options::NONE));
        let mut bytes = Vec::new();
        crate::format::from_float(&[1.0, 1.0, 1.0, 1.0], 4, DataFormat::Float, &mut bytes);
        stream.add_data(&bytes);

        let sound = Arc::new(Sound::new("loud".to_string(), vec![1.0_f32; 4], 2, 48_000));
        engine.play_sound(sound);
        engine.add_stream(stream);

        engine.run_iteration().unwrap();
        let viz = engine.viz_snapshot();
        assert!(viz.iter().all(|&s| s.abs() <= 1.0 + 1e-6));
    }
}
