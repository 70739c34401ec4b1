mod cpal_sink;

pub use cpal_sink::CpalSink;

use crate::error::SoftAeResult;
use crate::format::AudioFormat;

/// The blocking output device abstraction (`IAESink`). Implementations may coerce the
/// requested format; `open` returns whatever format was actually negotiated and the
/// engine reconfigures its converter/remap around that.
pub trait Sink: Send {
    /// Opens the device for `desired`, returning the format actually negotiated.
    fn open(&mut self, desired: &AudioFormat) -> SoftAeResult<AudioFormat>;

    /// Writes `frame_count` frames of already-sink-format bytes, blocking until the
    /// device has accepted them. Returns the number of frames actually written.
    fn write(&mut self, bytes: &[u8], frame_count: usize) -> SoftAeResult<usize>;

    /// Blocks until all buffered audio has finished playing.
    fn drain(&mut self);

    /// Output device latency, in seconds, for audio written but not yet audible.
    fn get_delay(&self) -> f64;

    fn close(&mut self);

    fn has_volume(&self) -> bool {
        false
    }

    fn set_volume(&mut self, _volume: f32) {}
}
