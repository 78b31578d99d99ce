//! Per-channel VU levels computed from the most recent input.
//!
//! Levels follow the same freshness rule as the waveform preview: a tick
//! with no new block since the previous snapshot delivers nothing, so the
//! meter goes quiet rather than holding its last reading while capture
//! stalls.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::{audio::SampleBlock, buffer::RollingWindow};

/// Samples retained per channel.
pub const LEVEL_WINDOW: usize = 4096;
/// Samples the RMS is taken over.
pub const LEVEL_SPAN: usize = 1024;
/// Level mapped to an empty bar.
pub const LEVEL_FLOOR_DB: f64 = -60.0;

type SharedWindows = Arc<Mutex<Vec<RollingWindow>>>;

fn lock(windows: &SharedWindows) -> MutexGuard<'_, Vec<RollingWindow>> {
    match windows.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Producer-side handle appending de-interleaved channels.
#[derive(Debug, Clone)]
pub struct LevelFeed {
    windows: SharedWindows,
}

impl LevelFeed {
    /// Appends every channel of `block`. A change in channel count resets
    /// all windows.
    pub fn push_block(&self, block: &SampleBlock<'_>) {
        let mut windows = lock(&self.windows);
        if windows.len() != block.channels {
            tracing::debug!(
                from = windows.len(),
                to = block.channels,
                "level meter channel count changed"
            );
            *windows = (0..block.channels)
                .map(|_| RollingWindow::new(LEVEL_WINDOW))
                .collect();
        }
        for (channel, window) in windows.iter_mut().enumerate() {
            window.extend(block.channel(channel));
        }
    }
}

/// Fixed-rate VU snapshots, one byte per channel.
#[derive(Debug)]
pub struct LevelMeter {
    windows: SharedWindows,
    scratch: Vec<Vec<f32>>,
    levels: Vec<u8>,
}

impl LevelMeter {
    /// Returns an empty meter and the feed that fills it.
    pub fn new() -> (Self, LevelFeed) {
        let windows = Arc::new(Mutex::new(Vec::new()));
        let meter = Self {
            windows: windows.clone(),
            scratch: Vec::new(),
            levels: Vec::new(),
        };
        (meter, LevelFeed { windows })
    }

    /// Computes the next snapshot, or `None` when some channel has no samples
    /// yet or nothing arrived since the previous snapshot.
    pub fn tick(&mut self, master_gain: f32) -> Option<&[u8]> {
        {
            let mut windows = lock(&self.windows);
            if windows.is_empty() || windows.iter().any(RollingWindow::is_empty) {
                return None;
            }
            if !windows.iter().any(RollingWindow::has_pending) {
                return None;
            }
            self.scratch.resize_with(windows.len(), Vec::new);
            for (window, scratch) in windows.iter_mut().zip(self.scratch.iter_mut()) {
                window.copy_latest(LEVEL_SPAN, scratch);
                window.mark_consumed();
            }
        }

        let gain = f64::from(master_gain);
        self.levels.clear();
        self.levels
            .extend(self.scratch.iter().map(|samples| level_byte(rms(samples) * gain)));
        Some(&self.levels)
    }
}

fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (energy / samples.len() as f64).sqrt()
}

/// Maps an RMS amplitude onto `[-60 dB, 0 dB]` and quantizes to a byte.
pub fn level_byte(rms: f64) -> u8 {
    let db = 20.0 * (rms + 1e-10).log10();
    let normalized = ((db - LEVEL_FLOOR_DB) / -LEVEL_FLOOR_DB).clamp(0.0, 1.0);
    (normalized * 255.0).round() as u8
}
