/// Host notifications (`IPlayerCallback`, generalized). All methods have a default
/// no-op body so a host only implements the events it cares about.
pub trait PlayerCallback: Send {
    fn on_playback_started(&mut self) {}
    fn on_playback_stopped(&mut self) {}
    fn on_playback_paused(&mut self) {}
    fn on_playback_resumed(&mut self) {}
    fn on_playback_seek(&mut self, _new_ms: u64, _delta_ms: i64) {}
    fn on_playback_speed_changed(&mut self, _speed: i32) {}
    /// The host should look up the next file to play and call either
    /// `Player::queue_next` or, if nothing is available, `Player::on_nothing_to_queue_notify`.
    fn on_queue_next_item(&mut self) {}
}

/// Visualization sink (`IAudioCallback`, generalized). Registered per-stream; the
/// engine publishes up to 512 float samples per iteration to whichever callback is
/// currently attached to the playing stream.
pub trait AudioCallback: Send {
    fn on_initialize(&mut self, channels: u16, sample_rate: u32, bits_per_sample: u16);
    fn on_audio_data(&mut self, samples: &[f32]);
    fn on_deinitialize(&mut self);
}
