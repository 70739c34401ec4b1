use std::sync::Arc;

use crate::player::decoder::Decoder;
use crate::stream::Stream;

/// Per-track bookkeeping the player keeps alongside each engine [`Stream`]
/// (`StreamInfo` in the source this generalizes).
///
/// `sent_samples` is a monotone counter of samples pushed into the stream via
/// `add_data`; `change_at`/`prepare_at` are thresholds measured against it that
/// decide, respectively, when to hand off to the next queued track and when to ask
/// the host for one.
pub struct PlayerStream {
    pub id: u64,
    pub decoder: Box<dyn Decoder>,
    pub stream: Arc<Stream>,
    pub bytes_per_sample: usize,
    pub sent_samples: i64,
    pub change_at: i64,
    pub prepare_at: i64,
    pub prepare_requested: bool,
    pub snippet_end: i64,
    pub triggered: bool,
}

impl PlayerStream {
    pub fn new(id: u64, decoder: Box<dyn Decoder>, stream: Arc<Stream>, bytes_per_sample: usize) -> Self {
        Self {
            id,
            decoder,
            stream,
            bytes_per_sample,
            sent_samples: 0,
            change_at: 0,
            prepare_at: 0,
            prepare_requested: false,
            snippet_end: 0,
            triggered: false,
        }
    }

    pub fn samples_per_second(&self) -> i64 {
        self.decoder.sample_rate() as i64 * self.decoder.channels() as i64
    }
}
