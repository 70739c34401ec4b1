use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SampleRate, Stream, StreamConfig};
use log::{info, warn};
use ringbuf::traits::{Consumer as _, Observer as _, Producer as _, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::Sink;
use crate::error::{SoftAeError, SoftAeResult};
use crate::format::{AudioFormat, Channel, DataFormat};

/// Ring buffer depth, in bytes, kept between the blocking `write` caller (the engine
/// thread) and the cpal realtime callback. Sized generously enough to absorb scheduler
/// jitter on the engine side without growing perceptible output latency.
const RING_BYTES: usize = 64 * 1024;

/// A [`Sink`] backed by `cpal`'s default output device.
///
/// `write` is synchronous from the engine's point of view: it pushes bytes into a
/// lock-free SPSC ring and only returns once they've all been accepted, busy-waiting
/// in short increments when the ring is momentarily full. The actual hardware callback
/// drains that same ring from a separate (cpal-managed) realtime thread.
pub struct CpalSink {
    stream: Option<Stream>,
    producer: Option<HeapProd<u8>>,
    frame_size_bytes: usize,
    sample_rate: u32,
    channel_count: usize,
}

impl CpalSink {
    pub fn new() -> Self {
        Self {
            stream: None,
            producer: None,
            frame_size_bytes: 0,
            sample_rate: 0,
            channel_count: 0,
        }
    }
}

impl Default for CpalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for CpalSink {
    fn open(&mut self, desired: &AudioFormat) -> SoftAeResult<AudioFormat> {
        self.close();

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(SoftAeError::NoOutputDevice)?;

        let (config, sample_format) = select_stream_config(&device, desired)
            .map_err(SoftAeError::SinkOpen)?;

        info!(
            "cpal sink opened: {} Hz, {} ch, {:?}",
            config.sample_rate.0, config.channels, sample_format
        );

        let actual_data_format = match sample_format {
            SampleFormat::F32 => DataFormat::Float,
            SampleFormat::I16 => DataFormat::S16LE,
            SampleFormat::U16 => DataFormat::U8, // coerced further below
            other => {
                return Err(SoftAeError::SinkOpen(format!(
                    "unsupported cpal sample format {other:?}"
                )))
            }
        };

        let channel_count = config.channels as usize;
        let bytes_per_sample = match sample_format {
            SampleFormat::F32 => 4,
            SampleFormat::I16 => 2,
            SampleFormat::U16 => 2,
            _ => unreachable!(),
        };
        self.frame_size_bytes = channel_count * bytes_per_sample;
        self.sample_rate = config.sample_rate.0;
        self.channel_count = channel_count;

        let ring = HeapRb::<u8>::new(RING_BYTES);
        let (producer, mut consumer) = ring.split();

        let err_fn = |err| warn!("cpal output stream error: {err}");
        let stream = match sample_format {
            SampleFormat::F32 => device
                .build_output_stream(
                    &config,
                    move |output: &mut [f32], _| fill_f32(output, &mut consumer),
                    err_fn,
                    None,
                )
                .map_err(|e| SoftAeError::SinkOpen(e.to_string()))?,
            SampleFormat::I16 => device
                .build_output_stream(
                    &config,
                    move |output: &mut [i16], _| fill_i16(output, &mut consumer),
                    err_fn,
                    None,
                )
                .map_err(|e| SoftAeError::SinkOpen(e.to_string()))?,
            SampleFormat::U16 => device
                .build_output_stream(
                    &config,
                    move |output: &mut [u16], _| fill_u16(output, &mut consumer),
                    err_fn,
                    None,
                )
                .map_err(|e| SoftAeError::SinkOpen(e.to_string()))?,
            _ => unreachable!(),
        };

        stream
            .play()
            .map_err(|e| SoftAeError::SinkOpen(e.to_string()))?;

        self.stream = Some(stream);
        self.producer = Some(producer);

        let layout: Vec<Channel> = match channel_count {
            1 => vec![Channel::FrontCenter],
            2 => vec![Channel::FrontLeft, Channel::FrontRight],
            _ => desired.channel_layout.clone(),
        };

        Ok(AudioFormat::pcm(
            self.sample_rate,
            layout,
            actual_data_format,
            desired.frames_per_period,
        ))
    }

    fn write(&mut self, bytes: &[u8], frame_count: usize) -> SoftAeResult<usize> {
        let Some(producer) = self.producer.as_mut() else {
            return Err(SoftAeError::SinkWrite("sink is not open".to_string()));
        };

        let needed = frame_count * self.frame_size_bytes;
        let needed = needed.min(bytes.len());
        let mut written = 0;
        while written < needed {
            written += producer.push_slice(&bytes[written..needed]);
            if written < needed {
                thread::sleep(Duration::from_millis(1));
            }
        }
        Ok(written / self.frame_size_bytes.max(1))
    }

    fn drain(&mut self) {
        if let Some(producer) = &self.producer {
            while producer.occupied_len() > 0 {
                thread::sleep(Duration::from_millis(2));
            }
        }
    }

    fn get_delay(&self) -> f64 {
        let Some(producer) = &self.producer else {
            return 0.0;
        };
        if self.frame_size_bytes == 0 || self.sample_rate == 0 {
            return 0.0;
        }
        let buffered_frames = producer.occupied_len() / self.frame_size_bytes;
        buffered_frames as f64 / self.sample_rate as f64
    }

    fn close(&mut self) {
        self.stream.take();
        self.producer.take();
    }
}

fn select_stream_config(
    device: &cpal::Device,
    desired: &AudioFormat,
) -> Result<(StreamConfig, SampleFormat), String> {
    let mut preferred: Option<(StreamConfig, SampleFormat, bool)> = None;
    let mut fallback: Option<(StreamConfig, SampleFormat, bool)> = None;

    let ranges = device
        .supported_output_configs()
        .map_err(|e| format!("cannot query output configs: {e}"))?;

    for cfg in ranges {
        let channels = cfg.channels();
        let sample_format = cfg.sample_format();
        let min = cfg.min_sample_rate().0;
        let max = cfg.max_sample_rate().0;

        let exact_rate = desired.sample_rate >= min && desired.sample_rate <= max;
        let f32_preferred = matches!(sample_format, SampleFormat::F32);

        if channels as usize == desired.channel_count && exact_rate {
            let chosen = (
                StreamConfig {
                    channels,
                    sample_rate: SampleRate(desired.sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                },
                sample_format,
                true,
            );
            if f32_preferred {
                return Ok((chosen.0, chosen.1));
            }
            preferred = Some(chosen);
        }

        if fallback.is_none() || f32_preferred {
            fallback = Some((
                StreamConfig {
                    channels,
                    sample_rate: cfg.max_sample_rate(),
                    buffer_size: cpal::BufferSize::Default,
                },
                sample_format,
                false,
            ));
        }
    }

    preferred
        .or(fallback)
        .map(|(cfg, fmt, _)| (cfg, fmt))
        .ok_or_else(|| "no output stream configuration available".to_string())
}

fn fill_f32(output: &mut [f32], consumer: &mut HeapCons<u8>) {
    for sample in output.iter_mut() {
        let mut buf = [0u8; 4];
        let got = consumer.pop_slice(&mut buf);
        *sample = if got == 4 { f32::from_le_bytes(buf) } else { 0.0 };
    }
}

fn fill_i16(output: &mut [i16], consumer: &mut HeapCons<u8>) {
    for sample in output.iter_mut() {
        let mut buf = [0u8; 2];
        let got = consumer.pop_slice(&mut buf);
        *sample = if got == 2 { i16::from_le_bytes(buf) } else { 0 };
    }
}

fn fill_u16(output: &mut [u16], consumer: &mut HeapCons<u8>) {
    for sample in output.iter_mut() {
        let mut buf = [0u8; 2];
        let got = consumer.pop_slice(&mut buf);
        *sample = if got == 2 {
            u16::from_sample(i16::from_le_bytes(buf))
        } else {
            u16::MAX / 2
        };
    }
}
