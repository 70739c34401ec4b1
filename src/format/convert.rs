use super::DataFormat;

/// Converts `frame_count` frames (channel count already baked into the byte layout
/// the caller chose) of `src_format` interleaved bytes into canonical `[-1.0, 1.0]`
/// float frames, appending to `dst_floats`.
///
/// This is the scalar reference path. On targets where LLVM can auto-vectorize the
/// per-sample loop (the common case for these straight-line conversions) the compiled
/// code takes the same SIMD lanes the original engine hand-rolled with SSE intrinsics;
/// we rely on that instead of hand-written intrinsics so the conversion stays portable.
pub fn to_float(src_format: DataFormat, src_bytes: &[u8], sample_count: usize, dst_floats: &mut Vec<f32>) {
    dst_floats.reserve(sample_count);
    match src_format {
        DataFormat::U8 => {
            for &b in &src_bytes[..sample_count] {
                dst_floats.push((b as f32 - 128.0) / 128.0);
            }
        }
        DataFormat::S16LE => {
            for chunk in src_bytes[..sample_count * 2].chunks_exact(2) {
                let v = i16::from_le_bytes([chunk[0], chunk[1]]);
                dst_floats.push(v as f32 / 32768.0);
            }
        }
        DataFormat::S16BE => {
            for chunk in src_bytes[..sample_count * 2].chunks_exact(2) {
                let v = i16::from_be_bytes([chunk[0], chunk[1]]);
                dst_floats.push(v as f32 / 32768.0);
            }
        }
        DataFormat::S24LE3 => {
            for chunk in src_bytes[..sample_count * 3].chunks_exact(3) {
                let v = i32::from_le_bytes([0, chunk[0], chunk[1], chunk[2]]) >> 8;
                let v = sign_extend_24(v);
                dst_floats.push(v as f32 / 8_388_608.0);
            }
        }
        DataFormat::S24LE4 => {
            for chunk in src_bytes[..sample_count * 4].chunks_exact(4) {
                let v = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                // Top byte is padding; the 24-bit sample sits in the low three bytes.
                let v = sign_extend_24(v & 0x00FF_FFFF);
                dst_floats.push(v as f32 / 8_388_608.0);
            }
        }
        DataFormat::S32 => {
            for chunk in src_bytes[..sample_count * 4].chunks_exact(4) {
                let v = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                dst_floats.push(v as f32 / 2_147_483_648.0);
            }
        }
        DataFormat::Float => {
            for chunk in src_bytes[..sample_count * 4].chunks_exact(4) {
                dst_floats.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
        }
        DataFormat::Raw => {
            // Raw/passthrough bitstreams are never converted; callers must route
            // them directly to the packetizer/sink instead of calling this.
        }
    }
}

/// Converts canonical float frames back into `dst_format` interleaved bytes.
pub fn from_float(src_floats: &[f32], sample_count: usize, dst_format: DataFormat, dst_bytes: &mut Vec<u8>) {
    match dst_format {
        DataFormat::U8 => {
            dst_bytes.reserve(sample_count);
            for &s in &src_floats[..sample_count] {
                let clamped = s.clamp(-1.0, 1.0);
                dst_bytes.push(((clamped * 128.0) + 128.0) as u8);
            }
        }
        DataFormat::S16LE => {
            dst_bytes.reserve(sample_count * 2);
            for &s in &src_floats[..sample_count] {
                let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
                dst_bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        DataFormat::S16BE => {
            dst_bytes.reserve(sample_count * 2);
            for &s in &src_floats[..sample_count] {
                let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
                dst_bytes.extend_from_slice(&v.to_be_bytes());
            }
        }
        DataFormat::S24LE3 => {
            dst_bytes.reserve(sample_count * 3);
            for &s in &src_floats[..sample_count] {
                let v = (s.clamp(-1.0, 1.0) * 8_388_607.0) as i32;
                let bytes = v.to_le_bytes();
                dst_bytes.extend_from_slice(&bytes[..3]);
            }
        }
        DataFormat::S24LE4 => {
            dst_bytes.reserve(sample_count * 4);
            for &s in &src_floats[..sample_count] {
                let v = (s.clamp(-1.0, 1.0) * 8_388_607.0) as i32;
                let bytes = v.to_le_bytes();
                dst_bytes.extend_from_slice(&[bytes[0], bytes[1], bytes[2], 0]);
            }
        }
        DataFormat::S32 => {
            dst_bytes.reserve(sample_count * 4);
            for &s in &src_floats[..sample_count] {
                let v = (s.clamp(-1.0, 1.0) * 2_147_483_647.0) as i32;
                dst_bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        DataFormat::Float => {
            dst_bytes.reserve(sample_count * 4);
            for &s in &src_floats[..sample_count] {
                dst_bytes.extend_from_slice(&s.to_le_bytes());
            }
        }
        DataFormat::Raw => {}
    }
}

fn sign_extend_24(v: i32) -> i32 {
    (v << 8) >> 8
}

/// Adds `mul * add[i]` into `data[i]` for every sample — the hot per-iteration mix
/// accumulate used to sum streams and sounds into the engine's float buffer.
pub fn mix_accumulate(data: &mut [f32], add: &[f32], mul: f32) {
    for (d, a) in data.iter_mut().zip(add.iter()) {
        *d += a * mul;
    }
}

/// Scales every sample of `data` by `mul` in place — used by the normalize stage.
pub fn scale_array(data: &mut [f32], mul: f32) {
    for d in data.iter_mut() {
        *d *= mul;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s16_round_trip_within_quantization_step() {
        let original = vec![-1.0_f32, -0.5, 0.0, 0.25, 0.9999];
        let mut bytes = Vec::new();
        from_float(&original, original.len(), DataFormat::S16LE, &mut bytes);
        let mut back = Vec::new();
        to_float(DataFormat::S16LE, &bytes, original.len(), &mut back);
        for (a, b) in original.iter().zip(back.iter()) {
            assert!((a - b).abs() <= 1.0 / 32767.0 + 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn s24_packed_and_padded_agree() {
        let original = vec![0.5_f32, -0.75, 0.1234];
        let mut packed = Vec::new();
        from_float(&original, original.len(), DataFormat::S24LE3, &mut packed);
        let mut padded = Vec::new();
        from_float(&original, original.len(), DataFormat::S24LE4, &mut padded);

        let mut from_packed = Vec::new();
        to_float(DataFormat::S24LE3, &packed, original.len(), &mut from_packed);
        let mut from_padded = Vec::new();
        to_float(DataFormat::S24LE4, &padded, original.len(), &mut from_padded);

        for (a, b) in from_packed.iter().zip(from_padded.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn float_identity_round_trips_exactly() {
        let original = vec![0.1_f32, -0.2, 0.3, -0.4];
        let mut bytes = Vec::new();
        from_float(&original, original.len(), DataFormat::Float, &mut bytes);
        let mut back = Vec::new();
        to_float(DataFormat::Float, &bytes, original.len(), &mut back);
        assert_eq!(original, back);
    }

    #[test]
    fn u8_midpoint_is_silence() {
        let bytes = vec![128u8; 4];
        let mut floats = Vec::new();
        to_float(DataFormat::U8, &bytes, 4, &mut floats);
        for f in floats {
            assert!(f.abs() < 1e-3);
        }
    }

    #[test]
    fn mix_accumulate_adds_scaled_values() {
        let mut data = vec![1.0_f32, 2.0, 3.0];
        let add = vec![1.0_f32, 1.0, 1.0];
        mix_accumulate(&mut data, &add, 0.5);
        assert_eq!(data, vec![1.5, 2.5, 3.5]);
    }

    #[test]
    fn scale_array_divides_by_peak() {
        let mut data = vec![2.0_f32, -2.0, 1.0];
        scale_array(&mut data, 0.5);
        assert_eq!(data, vec![1.0, -1.0, 0.5]);
    }
}
