mod convert;

pub use convert::{from_float, mix_accumulate, scale_array, to_float};

use crate::packetizer::CompressedFormat;

/// A single named channel position, ordered the way a `channel_layout` lists them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    FrontLeft,
    FrontRight,
    FrontCenter,
    Lfe,
    BackLeft,
    BackRight,
    SideLeft,
    SideRight,
}

/// Interleaved PCM sample encoding. `Raw` carries compressed/passthrough bitstreams
/// where `frame_size_bytes` on the owning [`AudioFormat`] is implementation-defined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataFormat {
    U8,
    S16LE,
    S16BE,
    S24LE3,
    S24LE4,
    S32,
    Float,
    Raw,
}

impl DataFormat {
    /// Bytes occupied by one sample in this format. Meaningless for `Raw`.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            DataFormat::U8 => 1,
            DataFormat::S16LE | DataFormat::S16BE => 2,
            DataFormat::S24LE3 => 3,
            DataFormat::S24LE4 | DataFormat::S32 | DataFormat::Float => 4,
            DataFormat::Raw => 0,
        }
    }
}

/// Describes the layout and encoding of a PCM (or raw/passthrough) stream.
///
/// Invariant: `frame_size_bytes == channel_count * data_format.bytes_per_sample()`,
/// except in `Raw` mode where `frame_size_bytes` is set by whoever packetized the
/// bitstream and carries no such relationship.
#[derive(Clone, Debug)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub frame_size_bytes: usize,
    pub channel_count: usize,
    pub channel_layout: Vec<Channel>,
    pub data_format: DataFormat,
    pub frames_per_period: usize,
    /// Set only for `Raw` streams that carry an undecoded compressed bitstream the
    /// engine must still burst-wrap itself (as opposed to one a demuxer already
    /// delivered pre-wrapped). `None` for every PCM format and for raw streams the
    /// engine should forward untouched.
    pub compressed_format: Option<CompressedFormat>,
}

impl AudioFormat {
    pub fn pcm(
        sample_rate: u32,
        channel_layout: Vec<Channel>,
        data_format: DataFormat,
        frames_per_period: usize,
    ) -> Self {
        let channel_count = channel_layout.len();
        Self {
            sample_rate,
            frame_size_bytes: channel_count * data_format.bytes_per_sample(),
            channel_count,
            channel_layout,
            data_format,
            frames_per_period,
            compressed_format: None,
        }
    }

    /// A `Raw`-format stream whose bitstream still needs IEC 61937 burst wrapping
    /// before it reaches the sink (`CDVDAudioCodecPassthrough` handing compressed
    /// frames to `CSoftAE`, generalized).
    pub fn compressed(
        sample_rate: u32,
        channel_layout: Vec<Channel>,
        compressed_format: CompressedFormat,
        burst_size_bytes: usize,
        frames_per_period: usize,
    ) -> Self {
        let channel_count = channel_layout.len();
        Self {
            sample_rate,
            frame_size_bytes: burst_size_bytes,
            channel_count,
            channel_layout,
            data_format: DataFormat::Raw,
            frames_per_period,
            compressed_format: Some(compressed_format),
        }
    }

    pub fn stereo(sample_rate: u32, data_format: DataFormat, frames_per_period: usize) -> Self {
        Self::pcm(
            sample_rate,
            vec![Channel::FrontLeft, Channel::FrontRight],
            data_format,
            frames_per_period,
        )
    }

    pub fn mono(sample_rate: u32, data_format: DataFormat, frames_per_period: usize) -> Self {
        Self::pcm(
            sample_rate,
            vec![Channel::FrontCenter],
            data_format,
            frames_per_period,
        )
    }
}
