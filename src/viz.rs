use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Number of float samples published to the visualization callback per engine
/// iteration (§6: "up to 512 float samples per iteration").
pub const VIZ_BUFFER_SAMPLES: usize = 512;

/// Double-buffered publication point for the visualization audio callback.
///
/// The engine thread writes into whichever buffer is not currently marked "active"
/// and then flips an atomic index, so a concurrent reader always sees one complete,
/// self-consistent 512-sample window rather than a buffer being torn mid-write.
pub struct VizBuffer {
    buffers: [Mutex<Vec<f32>>; 2],
    active: AtomicUsize,
}

impl VizBuffer {
    pub fn new() -> Self {
        Self {
            buffers: [
                Mutex::new(vec![0.0; VIZ_BUFFER_SAMPLES]),
                Mutex::new(vec![0.0; VIZ_BUFFER_SAMPLES]),
            ],
            active: AtomicUsize::new(0),
        }
    }

    /// Publishes up to [`VIZ_BUFFER_SAMPLES`] samples, overwriting the inactive buffer
    /// and then making it the new active one.
    pub fn publish(&self, samples: &[f32]) {
        let current = self.active.load(Ordering::Acquire);
        let write_idx = 1 - current;

        let mut buf = self.buffers[write_idx].lock().expect("viz buffer poisoned");
        let n = samples.len().min(VIZ_BUFFER_SAMPLES);
        buf[..n].copy_from_slice(&samples[..n]);
        for slot in &mut buf[n..] {
            *slot = 0.0;
        }
        drop(buf);

        self.active.store(write_idx, Ordering::Release);
    }

    /// Returns a snapshot copy of whatever window is currently active.
    pub fn snapshot(&self) -> Vec<f32> {
        let current = self.active.load(Ordering::Acquire);
        self.buffers[current]
            .lock()
            .expect("viz buffer poisoned")
            .clone()
    }
}

impl Default for VizBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_latest_publish() {
        let viz = VizBuffer::new();
        viz.publish(&[1.0; 512]);
        assert_eq!(viz.snapshot(), vec![1.0; 512]);

        viz.publish(&[2.0; 512]);
        assert_eq!(viz.snapshot(), vec![2.0; 512]);
    }

    #[test]
    fn short_publish_zero_pads_remainder() {
        let viz = VizBuffer::new();
        viz.publish(&[5.0; 10]);
        let snap = viz.snapshot();
        assert_eq!(&snap[..10], &[5.0; 10]);
        assert!(snap[10..].iter().all(|&s| s == 0.0));
    }
}
