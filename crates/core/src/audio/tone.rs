use std::{
    f64::consts::TAU,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{clock::StopSignal, config::CaptureConfig, Result, TelemetryError};

use super::{AudioCapture, DeviceFlow, DeviceInfo, SampleBlock, SampleSink, StreamFormat};

const DEVICE_ID: &str = "synthetic-tone";

/// Synthetic backend producing a steady sine at real-time pace.
///
/// Every channel carries the same tone, scaled down by 3 dB per extra
/// channel so VU bars are distinguishable.
#[derive(Debug)]
pub struct ToneCapture {
    config: CaptureConfig,
    loopback: bool,
    worker: Option<Worker>,
}

#[derive(Debug)]
struct Worker {
    stop: Arc<StopSignal>,
    handle: JoinHandle<()>,
}

impl ToneCapture {
    /// Creates a stopped tone backend with loopback enabled.
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            loopback: true,
            worker: None,
        }
    }

    /// Returns the tone settings.
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    fn device(&self) -> DeviceInfo {
        DeviceInfo {
            id: DEVICE_ID.to_string(),
            name: format!("Synthetic {:.0} Hz tone", self.config.tone_hz),
            flow: if self.loopback {
                DeviceFlow::Render
            } else {
                DeviceFlow::Capture
            },
        }
    }
}

impl Default for ToneCapture {
    fn default() -> Self {
        Self::new(CaptureConfig::default())
    }
}

impl AudioCapture for ToneCapture {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![self.device()])
    }

    fn set_device(&mut self, id: &str) -> Result<bool> {
        Ok(id == DEVICE_ID)
    }

    fn current_device(&self) -> Option<DeviceInfo> {
        Some(self.device())
    }

    fn set_loopback(&mut self, loopback: bool) {
        self.loopback = loopback;
    }

    fn format(&self) -> Result<StreamFormat> {
        if self.config.sample_rate == 0 || self.config.channels == 0 {
            return Err(TelemetryError::Capture(format!(
                "unusable tone format {} Hz x {} channels",
                self.config.sample_rate, self.config.channels
            )));
        }
        Ok(StreamFormat {
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
        })
    }

    fn start(&mut self, mut sink: SampleSink) -> Result<()> {
        if self.worker.is_some() {
            return Err(TelemetryError::Capture("tone capture already running".into()));
        }
        let format = self.format()?;
        let config = self.config.clone();
        let stop = Arc::new(StopSignal::new());

        let handle = {
            let stop = stop.clone();
            thread::Builder::new()
                .name("tone-capture".into())
                .spawn(move || {
                    let mut generator = ToneGenerator::new(&config, format);
                    let channels = generator.channels;
                    let block_time = Duration::from_secs_f64(
                        generator.block_frames as f64 / f64::from(format.sample_rate),
                    );
                    tracing::debug!(?format, tone_hz = config.tone_hz, "tone capture running");
                    while !stop.wait_timeout(block_time) {
                        let block = generator.next_block();
                        sink(&SampleBlock::new(block, channels));
                    }
                    tracing::debug!("tone capture finished");
                })?
        };

        self.worker = Some(Worker { stop, handle });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.raise();
            if worker.handle.join().is_err() {
                tracing::error!("tone capture thread panicked");
            }
        }
    }

    fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for ToneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ToneGenerator {
    phase: f64,
    step: f64,
    amplitude: f64,
    channels: usize,
    block_frames: usize,
    buffer: Vec<f32>,
}

impl ToneGenerator {
    fn new(config: &CaptureConfig, format: StreamFormat) -> Self {
        let channels = usize::from(format.channels);
        let block_frames = config.block_frames.max(1);
        Self {
            phase: 0.0,
            step: TAU * f64::from(config.tone_hz) / f64::from(format.sample_rate),
            amplitude: f64::from(config.amplitude),
            channels,
            block_frames,
            buffer: vec![0.0; block_frames * channels],
        }
    }

    fn next_block(&mut self) -> &[f32] {
        for frame in self.buffer.chunks_exact_mut(self.channels) {
            let value = self.amplitude * self.phase.sin();
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = (value * channel_scale(ch)) as f32;
            }
            self.phase = (self.phase + self.step) % TAU;
        }
        &self.buffer
    }
}

/// -3 dB per channel after the first.
fn channel_scale(channel: usize) -> f64 {
    10f64.powf(-3.0 * channel as f64 / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    #[test]
    fn generator_produces_the_configured_tone() {
        let config = CaptureConfig {
            sample_rate: 8_000,
            channels: 2,
            tone_hz: 1_000.0,
            amplitude: 0.5,
            block_frames: 8,
        };
        let mut generator = ToneGenerator::new(
            &config,
            StreamFormat {
                sample_rate: 8_000,
                channels: 2,
            },
        );
        let block = generator.next_block().to_vec();
        assert_eq!(block.len(), 16);
        // 1 kHz at 8 kHz: sample 2 sits at a quarter period.
        assert!((block[4] - 0.5).abs() < 1e-6);
        assert!((block[5] - 0.5 * channel_scale(1) as f32).abs() < 1e-6);
        assert!(block[0].abs() < 1e-6);
    }

    #[test]
    fn delivers_until_stopped() {
        let mut capture = ToneCapture::new(CaptureConfig {
            block_frames: 48,
            ..CaptureConfig::default()
        });
        let blocks = Arc::new(AtomicUsize::new(0));
        let channels = Arc::new(Mutex::new(Vec::new()));

        let sink_blocks = blocks.clone();
        let sink_channels = channels.clone();
        capture
            .start(Box::new(move |block: &SampleBlock<'_>| {
                sink_blocks.fetch_add(1, Ordering::SeqCst);
                sink_channels.lock().unwrap().push(block.channels);
            }))
            .unwrap();
        assert!(capture.is_running());
        assert!(capture.start(Box::new(|_: &SampleBlock<'_>| {})).is_err());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while blocks.load(Ordering::SeqCst) < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        capture.stop();
        assert!(!capture.is_running());

        let seen = blocks.load(Ordering::SeqCst);
        assert!(seen >= 3);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(blocks.load(Ordering::SeqCst), seen, "no delivery after stop");
        assert!(channels.lock().unwrap().iter().all(|&c| c == 2));

        capture.stop();
    }

    #[test]
    fn only_the_synthetic_device_is_selectable() {
        let mut capture = ToneCapture::default();
        assert_eq!(capture.list_devices().unwrap().len(), 1);
        assert!(capture.set_device(DEVICE_ID).unwrap());
        assert!(!capture.set_device("hw:0").unwrap());

        capture.set_loopback(false);
        assert_eq!(capture.current_device().unwrap().flow, DeviceFlow::Capture);
    }
}
