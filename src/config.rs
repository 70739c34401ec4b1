use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::engine::Engine;
use crate::format::{AudioFormat, Channel, DataFormat};

/// Standard channel layouts keyed by count, used wherever a stream or the engine
/// needs a default layout and none was supplied explicitly (`CAEUtil::GuessChLayout`,
/// generalized to the handful of layouts this crate actually mixes).
pub fn default_layout_for_channel_count(channel_count: usize) -> Vec<Channel> {
    match channel_count {
        0 => Vec::new(),
        1 => vec![Channel::FrontCenter],
        2 => vec![Channel::FrontLeft, Channel::FrontRight],
        3 => vec![Channel::FrontLeft, Channel::FrontRight, Channel::Lfe],
        4 => vec![
            Channel::FrontLeft,
            Channel::FrontRight,
            Channel::BackLeft,
            Channel::BackRight,
        ],
        5 => vec![
            Channel::FrontLeft,
            Channel::FrontRight,
            Channel::FrontCenter,
            Channel::BackLeft,
            Channel::BackRight,
        ],
        _ => vec![
            Channel::FrontLeft,
            Channel::FrontRight,
            Channel::FrontCenter,
            Channel::Lfe,
            Channel::BackLeft,
            Channel::BackRight,
        ],
    }
}

/// Mixing-engine settings the host can change at runtime (`AE:*` advancedsettings,
/// generalized). Stored as atomics so `on_settings_change` can be called from any
/// thread without a lock around the whole config.
pub struct AeConfig {
    pub sample_rate: AtomicU32,
    pub frames_per_period: AtomicU32,
    pub passthrough_enabled: AtomicBool,
}

impl AeConfig {
    pub fn new(sample_rate: u32, frames_per_period: u32, passthrough_enabled: bool) -> Self {
        Self {
            sample_rate: AtomicU32::new(sample_rate),
            frames_per_period: AtomicU32::new(frames_per_period),
            passthrough_enabled: AtomicBool::new(passthrough_enabled),
        }
    }

    pub fn canonical_format(&self, channel_layout: Vec<Channel>) -> AudioFormat {
        AudioFormat::pcm(
            self.sample_rate.load(Ordering::Relaxed),
            channel_layout,
            DataFormat::Float,
            self.frames_per_period.load(Ordering::Relaxed) as usize,
        )
    }

    /// Applies a changed sample rate or channel layout by asking the engine to
    /// reopen its sink on the next iteration, rather than tearing anything down
    /// synchronously (`CAE::OnSettingsChange`, generalized).
    pub fn on_settings_change(&self, engine: &Arc<Engine>, sample_rate: u32, channel_layout: Vec<Channel>) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
        engine.request_reconfigure(self.canonical_format(channel_layout));
    }

    pub fn set_passthrough_enabled(&self, engine: &Arc<Engine>, enabled: bool) {
        self.passthrough_enabled.store(enabled, Ordering::Relaxed);
        engine.set_passthrough_enabled(enabled);
    }
}

/// Player-level seek-step settings (`CSettings::SEEK_STEPS`, generalized).
/// Crossfade duration lives on `Player` itself, since it's read on every
/// queue-ahead decision rather than just on a user seek.
pub struct PlayerConfig {
    pub seek_step_seconds: [i32; 4],
    pub seek_step_large_seconds: [i32; 4],
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            seek_step_seconds: [10, 30, 60, 600],
            seek_step_large_seconds: [60, 180, 600, 1800],
        }
    }
}

impl PlayerConfig {
    /// `GetSkipStepSize` equivalent, minus the channel of index-out-of-range cases
    /// the original demuxed through a `CInputManager` lookup table — here the four
    /// step sizes are just picked by a clamped index.
    pub fn seek_step(&self, index: usize, large_step: bool) -> i32 {
        let table = if large_step {
            &self.seek_step_large_seconds
        } else {
            &self.seek_step_seconds
        };
        table[index.min(table.len() - 1)]
    }
}
