mod callback;
mod decoder;
mod stream_info;

pub use callback::{AudioCallback, PlayerCallback};
pub use decoder::{Decoder, DecoderStatus, ReadStatus, SymphoniaDecoder};
pub use stream_info::PlayerStream;

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::debug;

use crate::config::PlayerConfig;
use crate::engine::Engine;
use crate::error::{PlayerError, PlayerResult};
use crate::format::DataFormat;
use crate::stream::{stream_options, Stream};

/// Engine push cap per data-callback invocation (`OUTPUT_SAMPLES` in the source).
const OUTPUT_SAMPLES: usize = 4096;
/// Decoder read granularity, in samples (`PACKET_SIZE`).
const PACKET_SIZE: usize = 4096;
/// Lead time, in milliseconds, before track end at which the host is asked for the
/// next file (`TIME_TO_CACHE_NEXT_FILE`).
const TIME_TO_CACHE_NEXT_FILE_MS: i64 = 5000;
/// Crossfade duration cap applied once a second track is already fading out
/// (`FAST_XFADE_TIME`), so a user skipping quickly can't stack unbounded fades.
const FAST_XFADE_TIME_MS: u32 = 2000;

struct PlayerInner {
    queued: VecDeque<PlayerStream>,
    current: Option<PlayerStream>,
    finishing: Vec<PlayerStream>,
    play_on_queue: bool,
    queue_failed: bool,
    fast_open: bool,
    audio_callback: Option<Box<dyn AudioCallback>>,
}

/// Pull-driven gapless/crossfading playback coordinator (`PAPlayer`). Owns decoders,
/// schedules the next track ahead of the current one ending, and drives
/// fast-forward/rewind via periodic snippet re-seeking.
///
/// Must be held behind an `Arc` (see [`Player::new`]): the data callback registered
/// on each engine `Stream` needs to call back into the player from the engine
/// thread, and does so through a `Weak` reference to avoid a reference cycle.
pub struct Player {
    self_weak: Weak<Player>,
    inner: Mutex<PlayerInner>,
    callback: Mutex<Box<dyn PlayerCallback>>,
    engine: Arc<Engine>,
    seek_config: PlayerConfig,
    crossfade_ms: AtomicU32,
    speed: AtomicI32,
    is_playing: AtomicBool,
    is_paused: AtomicBool,
    next_stream_id: AtomicU64,
}

impl Player {
    pub fn new(engine: Arc<Engine>, callback: Box<dyn PlayerCallback>, crossfade_ms: u32) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_weak: weak.clone(),
            inner: Mutex::new(PlayerInner {
                queued: VecDeque::new(),
                current: None,
                finishing: Vec::new(),
                play_on_queue: false,
                queue_failed: false,
                fast_open: true,
                audio_callback: None,
            }),
            callback: Mutex::new(callback),
            engine,
            seek_config: PlayerConfig::default(),
            crossfade_ms: AtomicU32::new(crossfade_ms),
            speed: AtomicI32::new(1),
            is_playing: AtomicBool::new(false),
            is_paused: AtomicBool::new(false),
            next_stream_id: AtomicU64::new(1),
        })
    }

    pub fn set_crossfade_ms(&self, ms: u32) {
        self.crossfade_ms.store(ms, Ordering::Relaxed);
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused.load(Ordering::Acquire)
    }

    /// `OpenFile`: resets speed to 1, queues `path`, and starts it playing.
    pub fn open_file(self: &Arc<Self>, path: &Path) -> PlayerResult<()> {
        self.speed.store(1, Ordering::Relaxed);
        self.queue_next(path)?;
        Ok(())
    }

    /// `QueueNextFile`/`QueueNextItem`: opens a decoder for `path`, creates a paused
    /// stream for it, seeds the decoder with one packet, and appends to the queue.
    /// If a previous track already asked to play as soon as something was queued
    /// (`play_on_queue`), immediately promotes this track to `current`.
    pub fn queue_next(self: &Arc<Self>, path: &Path) -> PlayerResult<()> {
        let decoder = Box::new(
            SymphoniaDecoder::create(path, 0).map_err(|_| PlayerError::DecoderOpenFailure)?,
        );
        self.queue_decoder(decoder)
    }

    /// Same as [`Player::queue_next`] but accepts an already-opened decoder —
    /// the seam integration tests use to inject a `FakeDecoder`.
    pub fn queue_decoder(self: &Arc<Self>, mut decoder: Box<dyn Decoder>) -> PlayerResult<()> {
        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);

        let channels = decoder.channels() as usize;
        let sample_rate = decoder.sample_rate();
        let bytes_per_sample = DataFormat::Float.bytes_per_sample();

        let layout = crate::config::default_layout_for_channel_count(channels);
        let format_in = crate::format::AudioFormat::pcm(sample_rate, layout.clone(), DataFormat::Float, OUTPUT_SAMPLES);

        let stream = Arc::new(Stream::new(
            format_in,
            &layout,
            OUTPUT_SAMPLES * 4,
            stream_options::FREE_ON_DRAIN | stream_options::OWNS_POST_PROC | stream_options::PAUSED,
        ));

        stream.set_replay_gain(decoder.get_replay_gain());

        let weak_self = Arc::downgrade(self);
        stream.set_data_callback(move |frames_needed| {
            if let Some(player) = weak_self.upgrade() {
                player.data_callback(id, frames_needed);
            }
        });

        let weak_self_free = Arc::downgrade(self);
        stream.set_free_callback(move || {
            if let Some(player) = weak_self_free.upgrade() {
                player.on_stream_freed(id);
            }
        });

        let mut player_stream = PlayerStream::new(id, decoder, stream, bytes_per_sample);

        let crossfade_ms = self.crossfade_ms.load(Ordering::Relaxed) as i64;
        let samples_per_second = player_stream.samples_per_second();
        let total_ms = player_stream.decoder.total_time_ms() as i64;
        player_stream.change_at = (total_ms - crossfade_ms).max(0) * samples_per_second / 1000;
        player_stream.prepare_at =
            (total_ms - crossfade_ms - TIME_TO_CACHE_NEXT_FILE_MS) * samples_per_second / 1000;

        let speed = self.speed.load(Ordering::Relaxed);
        let speed_div = if speed > 1 { speed } else { -speed }.max(1);
        player_stream.snippet_end = samples_per_second / speed_div as i64;

        player_stream.decoder.read_samples(PACKET_SIZE);

        self.engine.add_stream(Arc::clone(&player_stream.stream));

        let should_play_now = {
            let mut inner = self.inner.lock().expect("player lock poisoned");
            inner.queued.push_back(player_stream);
            let play_now = inner.play_on_queue;
            inner.play_on_queue = false;
            play_now
        };

        if should_play_now {
            self.play_next_stream();
        }

        Ok(())
    }

    /// `PlayNextStream`: promotes the head of the queue to `current`, crossfading
    /// with whatever was playing before if `crossfade_ms > 0`.
    pub fn play_next_stream(&self) -> bool {
        let crossfade_ms = self.crossfade_ms.load(Ordering::Relaxed);

        let mut inner = self.inner.lock().expect("player lock poisoned");

        if inner.queued.is_empty() {
            if !inner.queue_failed {
                inner.play_on_queue = true;
            } else {
                drop(inner);
                self.is_playing.store(false, Ordering::Release);
                self.callback.lock().expect("callback lock poisoned").on_playback_stopped();
            }
            return false;
        }

        let effective_crossfade_ms = if let Some(mut previous) = inner.current.take() {
            if crossfade_ms == 0 {
                previous.stream.drain();
                if inner.fast_open {
                    previous.stream.flush();
                }
                inner.fast_open = false;
                0
            } else {
                let effective = if !inner.finishing.is_empty() {
                    crossfade_ms.min(FAST_XFADE_TIME_MS)
                } else {
                    crossfade_ms
                };

                let prev_id = previous.id;
                let weak_self = self.self_weak.clone();
                let mut fade_out = crate::postproc::Fade::new(1.0, 0.0, effective, previous.decoder.sample_rate());
                fade_out.set_done_callback(move || {
                    if let Some(player) = weak_self.upgrade() {
                        player.on_fade_out_done(prev_id);
                    }
                });
                previous.stream.prepend_post_proc(Box::new(fade_out));
                inner.finishing.push(previous);
                effective
            }
        } else {
            0
        };

        let mut next = inner.queued.pop_front().expect("queue non-empty checked above");

        if effective_crossfade_ms > 0 {
            let fade_in = crate::postproc::Fade::new(0.0, 1.0, effective_crossfade_ms, next.decoder.sample_rate());
            next.stream.prepend_post_proc(Box::new(fade_in));
        }

        next.stream.resume();
        inner.current = Some(next);

        drop(inner);

        self.is_paused.store(false, Ordering::Release);
        self.is_playing.store(true, Ordering::Release);
        self.callback.lock().expect("callback lock poisoned").on_playback_started();
        true
    }

    /// `OnNothingToQueueNotify`: the host had nothing to queue. If a change was
    /// pending, playback stops cleanly.
    pub fn on_nothing_to_queue_notify(&self) {
        let play_on_queue = {
            let mut inner = self.inner.lock().expect("player lock poisoned");
            inner.queue_failed = true;
            inner.play_on_queue
        };

        if play_on_queue {
            self.is_playing.store(false, Ordering::Release);
            self.callback.lock().expect("callback lock poisoned").on_playback_stopped();
        }
    }

    fn on_fade_out_done(&self, id: u64) {
        let mut inner = self.inner.lock().expect("player lock poisoned");
        if let Some(finishing) = inner.finishing.iter_mut().find(|ps| ps.id == id) {
            finishing.decoder.set_status(DecoderStatus::Ended);
            finishing.stream.drain();
        }
    }

    fn on_stream_freed(&self, id: u64) {
        let mut inner = self.inner.lock().expect("player lock poisoned");
        inner.finishing.retain(|ps| ps.id != id);
        if inner.current.as_ref().map(|c| c.id) == Some(id) {
            inner.current = None;
        }
        inner.queued.retain(|ps| ps.id != id);
    }

    /// Engine-thread pull callback: pushes up to `frames_needed` frames from this
    /// track's decoder, then runs FFRW snippet, queue-next, change, and EOF logic.
    fn data_callback(&self, id: u64, frames_needed: usize) {
        if !self.is_playing.load(Ordering::Acquire) {
            return;
        }

        let speed = self.speed.load(Ordering::Relaxed);
        let mut queue_next_needed = false;
        let mut play_next_needed = false;
        let mut ended_and_was_current = false;

        {
            let mut inner = self.inner.lock().expect("player lock poisoned");
            let Some(ps) = locate_mut(&mut inner, id) else {
                return;
            };

            let channel_count = ps.decoder.channels().max(1) as usize;
            let mut needed_samples = frames_needed * channel_count;

            while self.is_playing.load(Ordering::Acquire) && needed_samples > 0 {
                let available = ps.decoder.get_data_size();
                let take = available.min(needed_samples).min(OUTPUT_SAMPLES);
                if take == 0 {
                    break;
                }

                let mut samples = Vec::with_capacity(take);
                ps.decoder.get_data(take, &mut samples);

                let mut bytes = Vec::new();
                crate::format::from_float(&samples, samples.len(), DataFormat::Float, &mut bytes);
                ps.stream.add_data(&bytes);

                ps.sent_samples += take as i64;
                needed_samples -= take;
            }

            if !ps.triggered && speed != 1 && ps.sent_samples >= ps.snippet_end {
                self.apply_ffrw_snippet(ps, speed);
            }

            if ps.prepare_at > 0 && !ps.prepare_requested && ps.sent_samples >= ps.prepare_at {
                ps.prepare_requested = true;
                queue_next_needed = true;
            }

            if !ps.triggered && ps.sent_samples >= ps.change_at {
                ps.triggered = true;
                play_next_needed = true;
            }

            if self.is_playing.load(Ordering::Acquire) && ps.decoder.get_data_size() == 0 {
                let read = ps.decoder.read_samples(PACKET_SIZE);
                let at_end = ps.decoder.status() == DecoderStatus::Ended
                    || matches!(read, ReadStatus::Eof | ReadStatus::Error);

                if at_end {
                    if !ps.prepare_requested {
                        ps.prepare_requested = true;
                        queue_next_needed = true;
                    }
                    if !ps.triggered {
                        play_next_needed = true;
                    }

                    ps.stream.drain();
                    ended_and_was_current = true;
                }
            }
        }

        if ended_and_was_current {
            let mut inner = self.inner.lock().expect("player lock poisoned");
            if inner.current.as_ref().map(|c| c.id) == Some(id) {
                inner.current = None;
            }
        }

        if queue_next_needed {
            if play_next_needed {
                self.inner.lock().expect("player lock poisoned").play_on_queue = true;
            }
            self.callback.lock().expect("callback lock poisoned").on_queue_next_item();
        } else if play_next_needed {
            self.play_next_stream();
        }
    }

    /// FFRW snippet re-seek: implements the source's `step` formula literally,
    /// asymmetric ff/rw magnitudes included (see DESIGN.md).
    fn apply_ffrw_snippet(&self, ps: &mut PlayerStream, speed: i32) {
        let step = (if speed > 1 { 0.5 } else { 1.0 }) * (speed as f32 / 2.0);
        let bps = ps.samples_per_second();
        let mut time = ps.sent_samples as f32 / bps as f32 + step;

        if time <= 0.0 {
            ps.snippet_end = 0;
            self.speed.store(1, Ordering::Relaxed);
            self.callback
                .lock()
                .expect("callback lock poisoned")
                .on_playback_speed_changed(1);
            time = 0.0;
        }

        let ttl = ps.decoder.total_time_ms() as f32 / 1000.0;
        if time >= ttl {
            time = ttl;
        }

        ps.decoder.seek((time * 1000.0) as u64);
        ps.sent_samples = (time * bps as f32) as i64;

        let speed_div = if speed < 1 { -speed } else { speed }.max(1);
        ps.snippet_end = ps.sent_samples + bps / speed_div as i64;
    }

    /// `ToFFRW`: sets the playback speed and forces the next data callback to enter
    /// FFRW snippet logic immediately.
    pub fn to_ffrw(&self, speed: i32) {
        self.speed.store(speed, Ordering::Relaxed);

        let mut inner = self.inner.lock().expect("player lock poisoned");
        if let Some(current) = inner.current.as_mut() {
            current.snippet_end = current.sent_samples;
        }
        drop(inner);

        self.callback
            .lock()
            .expect("callback lock poisoned")
            .on_playback_speed_changed(speed);
    }

    /// `SeekTime`: seeks to an absolute position, clamped so it cannot move before
    /// track start.
    pub fn seek_time(&self, target_ms: i64) {
        let mut inner = self.inner.lock().expect("player lock poisoned");
        let Some(current) = inner.current.as_mut() else {
            return;
        };
        if !current.decoder.can_seek() {
            return;
        }

        let bps = current.samples_per_second();
        let current_ms = (current.sent_samples as f64 / bps as f64 * 1000.0) as i64;
        let delta_ms = target_ms - current_ms;

        let delta_samples_raw = (delta_ms as f64 / 1000.0 * bps as f64) as i64;
        let delta_samples = delta_samples_raw.max(-current.sent_samples);

        current.decoder.seek(target_ms.max(0) as u64);
        current.stream.flush();
        current.sent_samples += delta_samples;
        drop(inner);

        debug!("seeking to {target_ms} ms (delta {delta_ms} ms)");
        self.callback
            .lock()
            .expect("callback lock poisoned")
            .on_playback_seek(target_ms.max(0) as u64, delta_ms);
    }

    pub fn seek_percentage(&self, percent: f64) {
        let percent = percent.clamp(0.0, 100.0);
        let total = self.get_total_time_ms();
        self.seek_time((percent * 0.01 * total as f64) as i64);
    }

    /// `PAPlayer::Seek(bPlus, bLargeStep)`: steps by a configured number of seconds
    /// when the current decoder can seek, otherwise falls back to the equivalent
    /// jump in percentage of total time (`CanSeek` branches the same way upstream).
    pub fn seek_relative(&self, forward: bool, large_step: bool) {
        let step_ms = self.seek_config.seek_step(0, large_step) as i64 * 1000;
        let delta_ms = if forward { step_ms } else { -step_ms };

        if self.can_seek() {
            self.seek_time(self.get_time_ms() + delta_ms);
            return;
        }

        let total_ms = self.get_total_time_ms();
        if total_ms <= 0 {
            return;
        }
        let delta_percent = delta_ms as f64 * 100.0 / total_ms as f64;
        self.seek_percentage(self.get_percentage() + delta_percent);
    }

    /// `Pause`: toggles pause, applying it to `current` and every `finishing` stream.
    pub fn pause(&self) {
        if !self.is_playing.load(Ordering::Acquire) {
            return;
        }

        let paused = !self.is_paused.load(Ordering::Acquire);
        self.is_paused.store(paused, Ordering::Release);

        let inner = self.inner.lock().expect("player lock poisoned");
        let apply = |s: &Stream| if paused { s.pause() } else { s.resume() };
        if let Some(current) = &inner.current {
            apply(&current.stream);
        }
        for f in &inner.finishing {
            apply(&f.stream);
        }
        drop(inner);

        let mut cb = self.callback.lock().expect("callback lock poisoned");
        if paused {
            cb.on_playback_paused();
        } else {
            cb.on_playback_resumed();
        }
    }

    /// `StopStream`/`CloseFile`: tears down every stream the player owns.
    pub fn close_file(&self) {
        self.speed.store(1, Ordering::Relaxed);

        let mut inner = self.inner.lock().expect("player lock poisoned");
        if let Some(current) = inner.current.take() {
            stop_player_stream(&current);
        }
        for ps in inner.queued.drain(..) {
            stop_player_stream(&ps);
        }
        for ps in inner.finishing.drain(..) {
            stop_player_stream(&ps);
        }
        drop(inner);

        self.is_playing.store(false, Ordering::Release);
        self.callback.lock().expect("callback lock poisoned").on_playback_stopped();
    }

    pub fn register_audio_callback(&self, mut cb: Box<dyn AudioCallback>) {
        let mut inner = self.inner.lock().expect("player lock poisoned");
        if let Some(current) = &inner.current {
            cb.on_initialize(
                current.decoder.channels(),
                current.decoder.sample_rate(),
                DataFormat::Float.bytes_per_sample() as u16 * 8,
            );
        }
        inner.audio_callback = Some(cb);
    }

    pub fn unregister_audio_callback(&self) {
        let mut inner = self.inner.lock().expect("player lock poisoned");
        if let Some(cb) = inner.audio_callback.as_mut() {
            cb.on_deinitialize();
        }
        inner.audio_callback = None;
    }

    /// Forwards the engine's published visualization window to whichever callback
    /// is currently registered. The host drives this periodically (engine
    /// visualization is global; the player only decides who receives it).
    pub fn pump_audio_callback(&self) {
        let samples = self.engine.viz_snapshot();
        let mut inner = self.inner.lock().expect("player lock poisoned");
        if let Some(cb) = inner.audio_callback.as_mut() {
            cb.on_audio_data(&samples);
        }
    }

    // --- Supplemental accessors (original_source/ §9 of SPEC_FULL.md) ---

    pub fn get_time_ms(&self) -> i64 {
        let inner = self.inner.lock().expect("player lock poisoned");
        let Some(current) = &inner.current else {
            return 0;
        };
        let bps = current.samples_per_second();
        (current.sent_samples as f64 / bps as f64 * 1000.0) as i64
    }

    pub fn get_total_time_ms(&self) -> i64 {
        let inner = self.inner.lock().expect("player lock poisoned");
        inner.current.as_ref().map_or(0, |c| c.decoder.total_time_ms() as i64)
    }

    pub fn get_percentage(&self) -> f64 {
        let total = self.get_total_time_ms();
        if total == 0 {
            return 0.0;
        }
        self.get_time_ms() as f64 * 100.0 / total as f64
    }

    pub fn get_cache_level(&self) -> i32 {
        let inner = self.inner.lock().expect("player lock poisoned");
        inner.current.as_ref().map_or(-1, |c| c.decoder.get_cache_level() as i32)
    }

    pub fn get_channels(&self) -> u16 {
        let inner = self.inner.lock().expect("player lock poisoned");
        inner.current.as_ref().map_or(0, |c| c.decoder.channels())
    }

    pub fn get_bits_per_sample(&self) -> u16 {
        let inner = self.inner.lock().expect("player lock poisoned");
        inner
            .current
            .as_ref()
            .map_or(0, |_| (DataFormat::Float.bytes_per_sample() as u16) * 8)
    }

    /// `GetSampleRate`, preserved verbatim: kilohertz truncated by an int cast of a
    /// `+0.5`-biased float. A known quirk, not a rounding fix — see DESIGN.md.
    pub fn sample_rate_khz_rounded(&self) -> i32 {
        let inner = self.inner.lock().expect("player lock poisoned");
        inner
            .current
            .as_ref()
            .map_or(0, |c| ((c.decoder.sample_rate() as f32 / 1000.0) + 0.5) as i32)
    }

    /// Exact sample rate in Hz. Not present in the source; added alongside the
    /// truncating accessor above for callers that want the real value.
    pub fn sample_rate_hz(&self) -> u32 {
        let inner = self.inner.lock().expect("player lock poisoned");
        inner.current.as_ref().map_or(0, |c| c.decoder.sample_rate())
    }

    pub fn can_seek(&self) -> bool {
        let inner = self.inner.lock().expect("player lock poisoned");
        inner.current.as_ref().is_some_and(|c| c.decoder.can_seek())
    }

    pub fn skip_next(&self) {
        self.play_next_stream();
    }
}

fn locate_mut(inner: &mut PlayerInner, id: u64) -> Option<&mut PlayerStream> {
    if let Some(c) = inner.current.as_mut() {
        if c.id == id {
            return Some(c);
        }
    }
    inner.finishing.iter_mut().find(|ps| ps.id == id)
}

fn stop_player_stream(ps: &PlayerStream) {
    ps.stream.drain();
    ps.stream.flush();
}
