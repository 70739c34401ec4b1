use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use softae::error::SoftAeResult;
use softae::format::AudioFormat;
use softae::player::{Decoder, DecoderStatus, PlayerCallback, ReadStatus};
use softae::sink::Sink;

/// Records every byte written to it, the way the teacher's own fallback-path test
/// for `resample_linear` records samples rather than driving real hardware.
pub struct FakeSink {
    written: Arc<Mutex<Vec<u8>>>,
    frame_size_bytes: usize,
}

impl FakeSink {
    pub fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                written: Arc::clone(&written),
                frame_size_bytes: 0,
            },
            written,
        )
    }
}

impl Sink for FakeSink {
    fn open(&mut self, desired: &AudioFormat) -> SoftAeResult<AudioFormat> {
        self.frame_size_bytes = desired.frame_size_bytes;
        Ok(desired.clone())
    }

    fn write(&mut self, bytes: &[u8], frame_count: usize) -> SoftAeResult<usize> {
        self.written.lock().unwrap().extend_from_slice(bytes);
        Ok(frame_count)
    }

    fn drain(&mut self) {}

    fn get_delay(&self) -> f64 {
        0.0
    }

    fn close(&mut self) {}
}

/// Deterministic sine-wave decoder: `duration_secs` of a `freq_hz` tone at
/// `sample_rate`, interleaved across `channels`. Tracks how many times `seek` is
/// called so FFRW/seek scenarios can assert on snippet-stepping behavior.
pub struct FakeDecoder {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
    cursor: usize,
    status: DecoderStatus,
    seek_count: Arc<AtomicUsize>,
}

impl FakeDecoder {
    pub fn new(freq_hz: f32, duration_secs: f32, channels: u16, sample_rate: u32) -> Self {
        let frames = (duration_secs * sample_rate as f32) as usize;
        let mut samples = Vec::with_capacity(frames * channels as usize);
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let v = (2.0 * std::f32::consts::PI * freq_hz * t).sin();
            for _ in 0..channels {
                samples.push(v);
            }
        }
        Self {
            samples,
            channels,
            sample_rate,
            cursor: 0,
            status: DecoderStatus::Idle,
            seek_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn seek_count_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.seek_count)
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

impl Decoder for FakeDecoder {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_time_ms(&self) -> u64 {
        (self.frame_count() as u64 * 1000) / self.sample_rate.max(1) as u64
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn get_replay_gain(&self) -> f32 {
        1.0
    }

    fn get_cache_level(&self) -> u8 {
        100
    }

    fn read_samples(&mut self, _packet_size: usize) -> ReadStatus {
        if self.cursor >= self.samples.len() {
            ReadStatus::Eof
        } else {
            ReadStatus::Ok
        }
    }

    fn get_data(&mut self, n: usize, out: &mut Vec<f32>) -> usize {
        let available = self.samples.len() - self.cursor;
        let take = n.min(available);
        out.extend_from_slice(&self.samples[self.cursor..self.cursor + take]);
        self.cursor += take;
        take
    }

    fn get_data_size(&self) -> usize {
        self.samples.len() - self.cursor
    }

    fn seek(&mut self, ms: u64) {
        self.seek_count.fetch_add(1, Ordering::Relaxed);
        let sample = (ms * self.sample_rate as u64 * self.channels.max(1) as u64) / 1000;
        self.cursor = (sample as usize).min(self.samples.len());
    }

    fn status(&self) -> DecoderStatus {
        self.status
    }

    fn set_status(&mut self, status: DecoderStatus) {
        self.status = status;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Started,
    Stopped,
    Paused,
    Resumed,
    Seek(u64, i64),
    SpeedChanged(i32),
    QueueNextItem,
}

/// `PlayerCallback` that appends every notification to a shared log the test keeps
/// a handle to, since `Player` takes ownership of the boxed callback.
pub struct RecordingCallback {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingCallback {
    pub fn new() -> (Self, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                events: Arc::clone(&events),
            },
            events,
        )
    }
}

impl PlayerCallback for RecordingCallback {
    fn on_playback_started(&mut self) {
        self.events.lock().unwrap().push(Event::Started);
    }
    fn on_playback_stopped(&mut self) {
        self.events.lock().unwrap().push(Event::Stopped);
    }
    fn on_playback_paused(&mut self) {
        self.events.lock().unwrap().push(Event::Paused);
    }
    fn on_playback_resumed(&mut self) {
        self.events.lock().unwrap().push(Event::Resumed);
    }
    fn on_playback_seek(&mut self, new_ms: u64, delta_ms: i64) {
        self.events.lock().unwrap().push(Event::Seek(new_ms, delta_ms));
    }
    fn on_playback_speed_changed(&mut self, speed: i32) {
        self.events.lock().unwrap().push(Event::SpeedChanged(speed));
    }
    fn on_queue_next_item(&mut self) {
        self.events.lock().unwrap().push(Event::QueueNextItem);
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
