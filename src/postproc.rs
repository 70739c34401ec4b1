/// A single stage in a [`crate::stream::Stream`]'s post-processor chain. Applied,
/// in chain order, to every canonical float frame a stream hands the engine before
/// it is mixed.
pub trait PostProc: Send {
    /// Scales `frame` (one sample per channel) in place.
    fn process_frame(&mut self, frame: &mut [f32]);

    /// Whether this stage has run to completion and may be dropped from the chain.
    fn is_done(&self) -> bool {
        false
    }
}

/// Linear gain ramp from `start_gain` to `end_gain` over `duration_ms`, used for
/// crossfade-in/out. Calls `on_done` exactly once, on the iteration that emits the
/// last ramped sample, mirroring `CAEPPAnimationFade`'s done-callback contract.
pub struct Fade {
    start_gain: f32,
    end_gain: f32,
    total_samples: u64,
    position: u64,
    done_fired: bool,
    on_done: Option<Box<dyn FnMut() + Send>>,
}

impl Fade {
    pub fn new(start_gain: f32, end_gain: f32, duration_ms: u32, sample_rate: u32) -> Self {
        let total_samples = (duration_ms as u64 * sample_rate as u64) / 1000;
        Self {
            start_gain,
            end_gain,
            total_samples: total_samples.max(1),
            position: 0,
            done_fired: false,
            on_done: None,
        }
    }

    pub fn set_done_callback<F: FnMut() + Send + 'static>(&mut self, cb: F) {
        self.on_done = Some(Box::new(cb));
    }

    /// Gain at the current ramp position, before advancing it.
    pub fn current_gain(&self) -> f32 {
        let t = (self.position.min(self.total_samples)) as f32 / self.total_samples as f32;
        self.start_gain + (self.end_gain - self.start_gain) * t
    }
}

impl PostProc for Fade {
    fn process_frame(&mut self, frame: &mut [f32]) {
        let gain = self.current_gain();
        for sample in frame.iter_mut() {
            *sample *= gain;
        }

        if self.position < self.total_samples {
            self.position += 1;
        }

        if self.position >= self.total_samples && !self.done_fired {
            self.done_fired = true;
            if let Some(cb) = self.on_done.as_mut() {
                cb();
            }
        }
    }

    fn is_done(&self) -> bool {
        self.done_fired
    }
}
