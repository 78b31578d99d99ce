//! Capture side of the pipeline.
//!
//! Every backend implements [`AudioCapture`] and pushes interleaved `f32`
//! blocks into the [`SampleSink`] handed to [`AudioCapture::start`], from a
//! thread the backend owns. The pipeline never assumes anything else about
//! the backend.

mod push;
mod tone;

pub use push::{PushCapture, PushHandle};
pub use tone::ToneCapture;

use serde::{Deserialize, Serialize};

use crate::Result;

/// One delivery from the capture thread.
#[derive(Debug, Clone, Copy)]
pub struct SampleBlock<'a> {
    /// Interleaved samples in `[-1.0, 1.0]`.
    pub samples: &'a [f32],
    pub channels: usize,
    /// The device flagged this block as silence; its samples are ignored.
    pub silent: bool,
}

impl<'a> SampleBlock<'a> {
    /// # Panics
    ///
    /// Panics if `channels == 0`.
    pub fn new(samples: &'a [f32], channels: usize) -> Self {
        assert!(channels > 0, "SampleBlock needs at least one channel");
        Self {
            samples,
            channels,
            silent: false,
        }
    }

    /// Marks the block as silence; every channel then reads as zeros.
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Complete frames in the block; a trailing partial frame is ignored.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Samples of one channel, zeros for silent blocks.
    pub fn channel(&self, channel: usize) -> impl Iterator<Item = f32> + 'a {
        let silent = self.silent;
        let samples: &'a [f32] = self.samples;
        samples[..self.frames() * self.channels]
            .iter()
            .skip(channel)
            .step_by(self.channels)
            .map(move |&sample| if silent { 0.0 } else { sample })
    }
}

/// Callback receiving every block a backend captures.
pub type SampleSink = Box<dyn FnMut(&SampleBlock<'_>) + Send>;

/// Stream parameters a backend will deliver with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Whether a device plays audio or records it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFlow {
    Render,
    Capture,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub flow: DeviceFlow,
}

/// Capability every capture backend provides.
pub trait AudioCapture: Send {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Selects a device by id. Returns `false` for unknown ids.
    fn set_device(&mut self, id: &str) -> Result<bool>;

    fn current_device(&self) -> Option<DeviceInfo>;

    /// Capture the render mix instead of the device's input side, where the
    /// device supports it. Applied on the next start.
    fn set_loopback(&mut self, loopback: bool);

    /// Format the next [`AudioCapture::start`] will deliver.
    fn format(&self) -> Result<StreamFormat>;

    /// Starts delivering blocks to `sink` from a backend-owned thread.
    fn start(&mut self, sink: SampleSink) -> Result<()>;

    /// Stops delivery. Returns once the sink will not be called again and
    /// has been dropped. Calling it while stopped does nothing.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}
