use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;

use log::debug;
use ringbuf::traits::{Consumer as _, Observer as _, Producer as _, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::format::{self, AudioFormat, Channel, DataFormat};
use crate::postproc::PostProc;
use crate::remap::ChannelRemap;

/// Creation-time option flags (`AESTREAM_*` in the engine this generalizes).
pub mod stream_options {
    pub const NONE: u32 = 0;
    pub const FREE_ON_DRAIN: u32 = 0b001;
    pub const OWNS_POST_PROC: u32 = 0b010;
    pub const PAUSED: u32 = 0b100;
}

const STATE_PAUSED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_DRAINING: u8 = 2;
const STATE_DRAINED: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Paused,
    Running,
    Draining,
    Drained,
}

fn state_from_u8(v: u8) -> StreamState {
    match v {
        STATE_PAUSED => StreamState::Paused,
        STATE_RUNNING => StreamState::Running,
        STATE_DRAINING => StreamState::Draining,
        _ => StreamState::Drained,
    }
}

type DataCallback = Box<dyn FnMut(usize) + Send>;
type FreeCallback = Box<dyn FnOnce() + Send>;

/// A per-producer stream (`CSoftAEStream`/`IAEStream` in the source this generalizes):
/// ring buffer, post-processor chain, volume/replay-gain, and pause/drain state.
///
/// The ring stores canonical float frames already converted from `format_in`'s wire
/// encoding, but *not yet* remapped to the engine's channel layout — that remap, plus
/// replay-gain, the post-proc chain, and stream volume, are all applied lazily in
/// [`Stream::get_frame`] so a `prepend_post_proc` takes effect starting on the very
/// next pull, per the stream contract.
pub struct Stream {
    format_in: AudioFormat,
    channels_in: usize,
    remap: ChannelRemap,
    producer: Mutex<HeapProd<f32>>,
    consumer: Mutex<HeapCons<f32>>,
    /// Raw/passthrough byte ring, populated only when `format_in.data_format` is
    /// `Raw`: compressed frames bypass float conversion entirely and are handed to
    /// the packetizer untouched, so this stream carries two independent rings and
    /// only one of them is ever live for a given stream.
    raw_producer: Option<Mutex<HeapProd<u8>>>,
    raw_consumer: Option<Mutex<HeapCons<u8>>>,
    capacity_frames: usize,
    post_proc: Mutex<Vec<Box<dyn PostProc>>>,
    volume_bits: AtomicU32,
    replay_gain_bits: AtomicU32,
    state: AtomicU8,
    free_on_drain: bool,
    owns_post_proc: bool,
    data_cb: Mutex<Option<DataCallback>>,
    free_cb: Mutex<Option<FreeCallback>>,
}

impl Stream {
    pub fn new(
        format_in: AudioFormat,
        engine_channel_layout: &[Channel],
        capacity_frames: usize,
        options: u32,
    ) -> Self {
        let channels_in = format_in.channel_count.max(1);
        let is_raw = format_in.data_format == DataFormat::Raw;

        let capacity_samples = capacity_frames * channels_in;
        let ring = HeapRb::<f32>::new(capacity_samples.max(channels_in));
        let (producer, consumer) = ring.split();

        let (raw_producer, raw_consumer) = if is_raw {
            let raw_capacity_bytes = capacity_frames * format_in.frame_size_bytes.max(1);
            let raw_ring = HeapRb::<u8>::new(raw_capacity_bytes.max(1));
            let (rp, rc) = raw_ring.split();
            (Some(Mutex::new(rp)), Some(Mutex::new(rc)))
        } else {
            (None, None)
        };

        let remap = ChannelRemap::new(&format_in.channel_layout, engine_channel_layout);

        let initial_state = if options & stream_options::PAUSED != 0 {
            STATE_PAUSED
        } else {
            STATE_RUNNING
        };

        Self {
            format_in,
            channels_in,
            remap,
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
            raw_producer,
            raw_consumer,
            capacity_frames,
            post_proc: Mutex::new(Vec::new()),
            volume_bits: AtomicU32::new(1.0_f32.to_bits()),
            replay_gain_bits: AtomicU32::new(1.0_f32.to_bits()),
            state: AtomicU8::new(initial_state),
            free_on_drain: options & stream_options::FREE_ON_DRAIN != 0,
            owns_post_proc: options & stream_options::OWNS_POST_PROC != 0,
            data_cb: Mutex::new(None),
            free_cb: Mutex::new(None),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.format_in.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels_in
    }

    pub fn data_format(&self) -> DataFormat {
        self.format_in.data_format
    }

    pub fn owns_post_proc(&self) -> bool {
        self.owns_post_proc
    }

    pub fn free_on_drain(&self) -> bool {
        self.free_on_drain
    }

    pub fn state(&self) -> StreamState {
        state_from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_raw(&self) -> bool {
        self.raw_producer.is_some()
    }

    /// `Some` when this raw stream's bitstream still needs IEC 61937 burst wrapping
    /// before the sink sees it; `None` for PCM streams and for raw streams that
    /// arrive already burst-wrapped.
    pub fn compressed_format(&self) -> Option<crate::packetizer::CompressedFormat> {
        self.format_in.compressed_format
    }

    /// Producer side: decodes `bytes` (in `format_in`'s encoding) into canonical float
    /// frames and copies them into the ring, or for a `Raw` stream copies the encoded
    /// bytes through untouched. Silently drops the data (per contract) if the stream
    /// is draining or already drained.
    pub fn add_data(&self, bytes: &[u8]) -> usize {
        let state = self.state.load(Ordering::Acquire);
        if state == STATE_DRAINING || state == STATE_DRAINED {
            return 0;
        }

        if let Some(raw_producer) = &self.raw_producer {
            let mut producer = raw_producer.lock().expect("stream raw producer lock poisoned");
            return producer.push_slice(bytes);
        }

        let bytes_per_sample = self.format_in.data_format.bytes_per_sample().max(1);
        let sample_count = bytes.len() / bytes_per_sample;
        if sample_count == 0 {
            return 0;
        }

        let mut floats = Vec::with_capacity(sample_count);
        format::to_float(self.format_in.data_format, bytes, sample_count, &mut floats);

        let mut producer = self.producer.lock().expect("stream producer lock poisoned");
        let pushed = producer.push_slice(&floats);
        pushed / self.channels_in
    }

    /// Raw passthrough engine side: pulls up to `max_bytes` of already-encoded bytes
    /// out of the raw ring, appending to `out`. Only meaningful when [`Stream::is_raw`].
    pub fn get_raw_bytes(&self, max_bytes: usize, out: &mut Vec<u8>) -> usize {
        let Some(raw_consumer) = &self.raw_consumer else {
            return 0;
        };

        let state = self.state.load(Ordering::Acquire);
        if state == STATE_PAUSED || state == STATE_DRAINED {
            return 0;
        }

        let mut consumer = raw_consumer.lock().expect("stream raw consumer lock poisoned");
        let available = consumer.occupied_len().min(max_bytes);

        if available == 0 {
            if state == STATE_DRAINING {
                drop(consumer);
                self.state.store(STATE_DRAINED, Ordering::Release);
                debug!("raw stream drained");
            }
            return 0;
        }

        let start = out.len();
        out.resize(start + available, 0);
        consumer.pop_slice(&mut out[start..]);
        available
    }

    /// Engine side: whether (and how many frames) the data callback should be asked
    /// to supply right now. `None` when paused, draining, or the ring has no room.
    pub fn wants_data(&self, frames_needed_hint: usize) -> Option<usize> {
        let state = self.state.load(Ordering::Acquire);
        if state != STATE_RUNNING {
            return None;
        }

        if let Some(raw_producer) = &self.raw_producer {
            let producer = raw_producer.lock().expect("stream raw producer lock poisoned");
            let vacant_bytes = producer.vacant_len();
            if vacant_bytes == 0 {
                return None;
            }
            return Some(vacant_bytes.min(frames_needed_hint).max(1));
        }

        let producer = self.producer.lock().expect("stream producer lock poisoned");
        let vacant_frames = producer.vacant_len() / self.channels_in;
        if vacant_frames == 0 {
            return None;
        }
        Some(vacant_frames.min(frames_needed_hint).max(1))
    }

    pub fn set_data_callback(&self, cb: impl FnMut(usize) + Send + 'static) {
        *self.data_cb.lock().expect("data_cb lock poisoned") = Some(Box::new(cb));
    }

    pub fn set_free_callback(&self, cb: impl FnOnce() + Send + 'static) {
        *self.free_cb.lock().expect("free_cb lock poisoned") = Some(Box::new(cb));
    }

    /// Invokes the stored data callback, if any, asking for `frames_needed` frames.
    /// Called by the engine thread only.
    pub fn invoke_data_callback(&self, frames_needed: usize) {
        let mut guard = self.data_cb.lock().expect("data_cb lock poisoned");
        if let Some(cb) = guard.as_mut() {
            cb(frames_needed);
        }
    }

    pub fn pause(&self) {
        if self.state.load(Ordering::Acquire) == STATE_RUNNING {
            self.state.store(STATE_PAUSED, Ordering::Release);
        }
    }

    pub fn resume(&self) {
        if self.state.load(Ordering::Acquire) == STATE_PAUSED {
            self.state.store(STATE_RUNNING, Ordering::Release);
        }
    }

    /// Marks the stream as having no more producer data. Once the ring empties, the
    /// next `get_frame` observes the transition to `Drained`.
    pub fn drain(&self) {
        let prev = self.state.swap(STATE_DRAINING, Ordering::AcqRel);
        if prev != STATE_DRAINING && prev != STATE_DRAINED {
            debug!("stream entering Draining state");
        }
    }

    pub fn flush(&self) {
        let mut producer = self.producer.lock().expect("stream producer lock poisoned");
        let mut consumer = self.consumer.lock().expect("stream consumer lock poisoned");
        while consumer.try_pop().is_some() {}
        producer.clear();

        if let (Some(raw_producer), Some(raw_consumer)) = (&self.raw_producer, &self.raw_consumer) {
            let mut rp = raw_producer.lock().expect("stream raw producer lock poisoned");
            let mut rc = raw_consumer.lock().expect("stream raw consumer lock poisoned");
            while rc.try_pop().is_some() {}
            rp.clear();
        }
    }

    pub fn set_replay_gain(&self, linear: f32) {
        self.replay_gain_bits.store(linear.to_bits(), Ordering::Relaxed);
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Inserts `pp` at the head of the post-processor chain; it applies starting on
    /// the very next `get_frame` call.
    pub fn prepend_post_proc(&self, pp: Box<dyn PostProc>) {
        self.post_proc
            .lock()
            .expect("post_proc lock poisoned")
            .insert(0, pp);
    }

    /// Engine side: pulls up to `max_frames` canonical float frames (already remapped
    /// to `engine_channels`, gain-staged, and post-processed) into `out`, appending.
    /// Returns the number of frames actually produced; 0 if paused or the ring is
    /// currently empty. Also observes the `Draining -> Drained` transition here, the
    /// moment the ring runs dry with no more producer data coming.
    pub fn get_frame(&self, max_frames: usize, engine_channels: usize, out: &mut Vec<f32>) -> usize {
        let state = self.state.load(Ordering::Acquire);
        if state == STATE_PAUSED || state == STATE_DRAINED {
            return 0;
        }

        let mut consumer = self.consumer.lock().expect("stream consumer lock poisoned");
        let available_frames = consumer.occupied_len() / self.channels_in;
        let frames = available_frames.min(max_frames);

        if frames == 0 {
            if state == STATE_DRAINING {
                drop(consumer);
                self.state.store(STATE_DRAINED, Ordering::Release);
                debug!("stream drained");
            }
            return 0;
        }

        let mut raw = vec![0.0_f32; frames * self.channels_in];
        consumer.pop_slice(&mut raw);
        drop(consumer);

        let mut remapped = vec![0.0_f32; frames * engine_channels];
        self.remap.remap(&raw, &mut remapped, frames);

        let replay_gain = f32::from_bits(self.replay_gain_bits.load(Ordering::Relaxed));
        let volume = f32::from_bits(self.volume_bits.load(Ordering::Relaxed));

        let mut chain = self.post_proc.lock().expect("post_proc lock poisoned");
        for frame in remapped.chunks_mut(engine_channels) {
            for sample in frame.iter_mut() {
                *sample *= replay_gain;
            }
            for pp in chain.iter_mut() {
                pp.process_frame(frame);
            }
            for sample in frame.iter_mut() {
                *sample *= volume;
            }
        }
        chain.retain(|pp| !pp.is_done());
        drop(chain);

        out.extend_from_slice(&remapped);
        frames
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Fires and consumes the free callback (the single legal release point for a
    /// `FREE_ON_DRAIN` stream's externally-owned backing object). No-op if already
    /// fired or never set.
    pub fn fire_free_callback(&self) {
        let cb = self.free_cb.lock().expect("free_cb lock poisoned").take();
        if let Some(cb) = cb {
            cb();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DataFormat;

    fn stereo_format(sample_rate: u32) -> AudioFormat {
        AudioFormat::stereo(sample_rate, DataFormat::Float, 512)
    }

    fn push_floats(stream: &Stream, samples: &[f32]) -> usize {
        let mut bytes = Vec::new();
        format::from_float(samples, samples.len(), DataFormat::Float, &mut bytes);
        stream.add_data(&bytes)
    }

    #[test]
    fn paused_stream_yields_no_frames() {
        let layout = vec![Channel::FrontLeft, Channel::FrontRight];
        let stream = Stream::new(stereo_format(48_000), &layout, 1024, stream_options::PAUSED);
        push_floats(&stream, &[1.0, 1.0, 1.0, 1.0]);

        let mut out = Vec::new();
        let n = stream.get_frame(10, 2, &mut out);
        assert_eq!(n, 0);
    }

    #[test]
    fn running_stream_returns_pushed_frames() {
        let layout = vec![Channel::FrontLeft, Channel::FrontRight];
        let stream = Stream::new(stereo_format(48_000), &layout, 1024, stream_options::NONE);
        push_floats(&stream, &[0.5, -0.5, 0.25, -0.25]);

        let mut out = Vec::new();
        let n = stream.get_frame(10, 2, &mut out);
        assert_eq!(n, 2);
        assert_eq!(out, vec![0.5, -0.5, 0.25, -0.25]);
    }

    #[test]
    fn drain_transitions_to_drained_once_ring_empties() {
        let layout = vec![Channel::FrontLeft, Channel::FrontRight];
        let stream = Stream::new(stereo_format(48_000), &layout, 1024, stream_options::NONE);
        push_floats(&stream, &[0.1, 0.1]);
        stream.drain();

        let mut out = Vec::new();
        assert_eq!(stream.get_frame(10, 2, &mut out), 1);
        assert_eq!(stream.state(), StreamState::Draining);

        let mut out2 = Vec::new();
        assert_eq!(stream.get_frame(10, 2, &mut out2), 0);
        assert_eq!(stream.state(), StreamState::Drained);
    }

    #[test]
    fn add_data_is_dropped_while_draining() {
        let layout = vec![Channel::FrontLeft, Channel::FrontRight];
        let stream = Stream::new(stereo_format(48_000), &layout, 1024, stream_options::NONE);
        stream.drain();
        let pushed = push_floats(&stream, &[1.0, 1.0]);
        assert_eq!(pushed, 0);
    }

    #[test]
    fn flush_discards_buffered_frames() {
        let layout = vec![Channel::FrontLeft, Channel::FrontRight];
        let stream = Stream::new(stereo_format(48_000), &layout, 1024, stream_options::NONE);
        push_floats(&stream, &[1.0, 1.0, 1.0, 1.0]);
        stream.flush();

        let mut out = Vec::new();
        assert_eq!(stream.get_frame(10, 2, &mut out), 0);
    }

    #[test]
    fn volume_scales_output() {
        let layout = vec![Channel::FrontLeft, Channel::FrontRight];
        let stream = Stream::new(stereo_format(48_000), &layout, 1024, stream_options::NONE);
        stream.set_volume(0.5);
        push_floats(&stream, &[1.0, 1.0]);

        let mut out = Vec::new();
        stream.get_frame(10, 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn free_callback_fires_exactly_once() {
        let layout = vec![Channel::FrontLeft, Channel::FrontRight];
        let stream = Stream::new(stereo_format(48_000), &layout, 1024, stream_options::NONE);
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let fired_cb = fired.clone();
        stream.set_free_callback(move || {
            fired_cb.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        stream.fire_free_callback();
        stream.fire_free_callback();
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
