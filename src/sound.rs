use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::format::mix_accumulate;

/// A preloaded one-shot PCM sample (`CSoftAESound`), already converted to the engine's
/// canonical channel count at load time so playback never has to remap.
///
/// Cheaply cloneable: `pcm` is shared immutable storage, so many [`SoundPlayback`]
/// instances (and cache entries keyed by `key`) can reference the same decoded audio.
pub struct Sound {
    key: String,
    pcm: Arc<Vec<f32>>,
    channel_count: usize,
    sample_rate: u32,
    last_used_tick: AtomicU64,
}

impl Sound {
    pub fn new(key: String, pcm: Vec<f32>, channel_count: usize, sample_rate: u32) -> Self {
        Self {
            key,
            pcm: Arc::new(pcm),
            channel_count,
            sample_rate,
            last_used_tick: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_count(&self) -> usize {
        self.pcm.len() / self.channel_count.max(1)
    }

    pub fn touch(&self, tick: u64) {
        self.last_used_tick.store(tick, Ordering::Relaxed);
    }

    pub fn last_used_tick(&self) -> u64 {
        self.last_used_tick.load(Ordering::Relaxed)
    }
}

/// An in-flight playback of a [`Sound`] (`SoundPlayback`, engine-internal). Created by
/// `play_sound`, destroyed by `stop_sound` or once `cursor` runs off the end of the PCM.
pub struct SoundPlayback {
    owner: Arc<Sound>,
    cursor: usize,
}

impl SoundPlayback {
    pub fn new(owner: Arc<Sound>) -> Self {
        Self { owner, cursor: 0 }
    }

    pub fn sound_key(&self) -> &str {
        self.owner.key()
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.owner.pcm.len()
    }

    /// Mixes up to `frame_count` frames of this playback into `accumulator` (sized
    /// `frame_count * channel_count`), advancing the cursor. Returns the number of
    /// frames actually contributed, which may be less than `frame_count` when the
    /// sample runs out mid-period.
    pub fn mix_into(&mut self, accumulator: &mut [f32], frame_count: usize) -> usize {
        let channels = self.owner.channel_count.max(1);
        let remaining_samples = self.owner.pcm.len() - self.cursor;
        let remaining_frames = remaining_samples / channels;
        let frames = frame_count.min(remaining_frames);

        if frames == 0 {
            return 0;
        }

        let sample_count = frames * channels;
        let src = &self.owner.pcm[self.cursor..self.cursor + sample_count];
        mix_accumulate(&mut accumulator[..sample_count], src, 1.0);

        self.cursor += sample_count;
        frames
    }
}

/// Advances every active playback by up to `frame_count` frames, summing into
/// `accumulator`, and drops any playback that has run to completion. Mirrors
/// `CSoftAE::MixSounds`.
pub fn mix_sounds(playing: &mut Vec<SoundPlayback>, accumulator: &mut [f32], frame_count: usize) {
    playing.retain_mut(|playback| {
        playback.mix_into(accumulator, frame_count);
        !playback.is_finished()
    });
}
