//! Decimated waveform preview of the most recent mono input.
//!
//! A tick only produces a snapshot when the window is full and at least one
//! sample arrived since the previous snapshot. While capture stalls, or
//! delivers less often than once per tick, ticks deliver nothing and the
//! ~60 Hz cadence pauses instead of repeating the last window.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::buffer::RollingWindow;

/// Raw samples kept for the preview.
pub const WAVEFORM_WINDOW: usize = 2048;
/// Points delivered per snapshot (every second sample of the window).
pub const WAVEFORM_POINTS: usize = WAVEFORM_WINDOW / 2;

type SharedWindow = Arc<Mutex<RollingWindow>>;

fn lock(window: &SharedWindow) -> MutexGuard<'_, RollingWindow> {
    // The window is plain sample data; a panicked holder cannot corrupt it.
    match window.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Producer-side handle appending mono samples to the preview window.
#[derive(Debug, Clone)]
pub struct WaveformFeed {
    window: SharedWindow,
}

impl WaveformFeed {
    /// Appends mono samples, evicting the oldest once the window is full.
    pub fn push<I: IntoIterator<Item = f32>>(&self, samples: I) {
        lock(&self.window).extend(samples);
    }
}

/// Fixed-rate decimated waveform snapshots.
#[derive(Debug)]
pub struct WaveformSampler {
    window: SharedWindow,
    scratch: Vec<f32>,
    points: Vec<i16>,
}

impl WaveformSampler {
    /// Returns an empty sampler and the feed that fills it.
    pub fn new() -> (Self, WaveformFeed) {
        let window = Arc::new(Mutex::new(RollingWindow::new(WAVEFORM_WINDOW)));
        let sampler = Self {
            window: window.clone(),
            scratch: Vec::with_capacity(WAVEFORM_WINDOW),
            points: vec![0; WAVEFORM_POINTS],
        };
        (sampler, WaveformFeed { window })
    }

    /// Builds the next snapshot. Returns `None` until the window is full, and
    /// whenever no new sample arrived since the previous snapshot.
    pub fn tick(&mut self, master_gain: f32) -> Option<&[i16]> {
        {
            let mut window = lock(&self.window);
            if !window.is_full() || !window.has_pending() {
                return None;
            }
            window.copy_latest(WAVEFORM_WINDOW, &mut self.scratch);
            window.mark_consumed();
        }

        for (point, &sample) in self.points.iter_mut().zip(self.scratch.iter().step_by(2)) {
            *point = to_pcm16(sample * master_gain);
        }
        Some(&self.points)
    }
}

/// Scales to 16-bit, truncating toward zero and saturating at the limits.
fn to_pcm16(sample: f32) -> i16 {
    ((sample * 32_767.0) as i32).clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}
