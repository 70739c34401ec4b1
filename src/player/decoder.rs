use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    Ok,
    Eof,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderStatus {
    Idle,
    Playing,
    Ended,
}

/// The decoder abstraction a [`crate::stream::Stream`]'s data callback pulls from
/// (`ICodec`, generalized). Codec internals are an external collaborator's job; this
/// crate supplies the trait plus one reference implementation, [`SymphoniaDecoder`].
pub trait Decoder: Send {
    fn channels(&self) -> u16;
    fn sample_rate(&self) -> u32;
    fn total_time_ms(&self) -> u64;
    fn can_seek(&self) -> bool;
    fn get_replay_gain(&self) -> f32;
    fn get_cache_level(&self) -> u8;

    /// Requests up to `packet_size` more samples be staged for `get_data`/`get_data_size`.
    fn read_samples(&mut self, packet_size: usize) -> ReadStatus;

    /// Copies up to `n` staged samples into `out`, consuming them. Returns the count
    /// actually copied.
    fn get_data(&mut self, n: usize, out: &mut Vec<f32>) -> usize;

    fn get_data_size(&self) -> usize;

    fn seek(&mut self, ms: u64);

    fn status(&self) -> DecoderStatus;
    fn set_status(&mut self, status: DecoderStatus);
}

/// Eagerly decodes the whole track into memory on `create` (the same tradeoff the
/// teacher's `decode_file` makes) and then serves it to the player a cursor at a
/// time. Simple, predictable memory behavior; not a streaming decoder, so
/// `get_cache_level` is always full and `read_samples` never actually blocks on I/O.
pub struct SymphoniaDecoder {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
    cursor: usize,
    status: DecoderStatus,
    replay_gain: f32,
}

impl SymphoniaDecoder {
    pub fn create(path: &Path, start_ms: u64) -> Result<Self, String> {
        let file = File::open(path).map_err(|e| format!("cannot open {}: {e}", path.display()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| format!("format probe failed: {e}"))?;

        let mut format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| "no default audio track".to_string())?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| format!("decoder creation failed: {e}"))?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| "track has no sample-rate metadata".to_string())?;
        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| "track has no channel metadata".to_string())?
            .count() as u16;

        let mut samples = Vec::<f32>::new();
        let mut sample_buffer: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::ResetRequired) => {
                    return Err("decoder reset required; unsupported stream transition".to_string())
                }
                Err(SymphoniaError::IoError(_)) => break,
                Err(err) => return Err(format!("error reading packet: {err}")),
            };

            let decoded = decoder
                .decode(&packet)
                .map_err(|e| format!("decode failure: {e}"))?;

            let spec = *decoded.spec();
            let duration = decoded.capacity() as u64;
            let buffer = sample_buffer.get_or_insert_with(|| SampleBuffer::<f32>::new(duration, spec));
            buffer.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buffer.samples());
        }

        let start_sample = ((start_ms as u64 * sample_rate as u64 * channels as u64) / 1000) as usize;
        let cursor = start_sample.min(samples.len());

        Ok(Self {
            samples,
            channels,
            sample_rate,
            cursor,
            status: DecoderStatus::Idle,
            replay_gain: 1.0,
        })
    }
}

impl Decoder for SymphoniaDecoder {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_time_ms(&self) -> u64 {
        let frames = self.samples.len() / self.channels.max(1) as usize;
        (frames as u64 * 1000) / self.sample_rate.max(1) as u64
    }

    fn can_seek(&self) -> bool {
        true
    }

    /// Replay-gain tag parsing is out of scope (codec metadata internals); this
    /// reference decoder always reports unity gain.
    fn get_replay_gain(&self) -> f32 {
        self.replay_gain
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
