use std::{f64::consts::PI, fmt};

use realfft::num_complex::Complex32;

use crate::{bands::BinMap, config::EngineConfig, fft::FftPlan, Result, TelemetryError};

/// Offset guarding `log10(0)` on band amplitudes.
const AMPLITUDE_EPSILON: f64 = 1e-20;
/// Bands added to both sides of the tilt ratio so the lowest bands are not
/// crushed to zero.
const TILT_OFFSET: f64 = 10.0;

/// Output shaping parameters that may change between frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shaping {
    pub db_floor: f32,
    pub master_gain: f32,
    pub tilt: f32,
    pub clamp_unit: bool,
}

impl From<&EngineConfig> for Shaping {
    fn from(config: &EngineConfig) -> Self {
        Self {
            db_floor: config.db_floor,
            master_gain: config.master_gain,
            tilt: config.tilt,
            clamp_unit: config.clamp_unit,
        }
    }
}

/// Turns one analysis frame into `columns` bytes on a 0–255 scale.
///
/// Output depends only on the frame, the band map and the shaping
/// parameters: the same inputs always produce bit-identical bytes.
pub struct SpectrumTransform {
    plan: Box<dyn FftPlan>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    bins: BinMap,
    shaping: Shaping,
}

impl SpectrumTransform {
    /// Builds a transform around `plan`; the frame length is the plan's size.
    pub fn new(plan: Box<dyn FftPlan>, bins: BinMap, shaping: Shaping) -> Self {
        let size = plan.size();
        Self {
            window: hamming_window(size),
            input: vec![0.0; size],
            spectrum: vec![Complex32::default(); size / 2 + 1],
            plan,
            bins,
            shaping,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.input.len()
    }

    pub fn columns(&self) -> usize {
        self.bins.columns()
    }

    pub fn bins(&self) -> &BinMap {
        &self.bins
    }

    /// Replaces the band map; the output length follows its column count.
    pub fn set_bins(&mut self, bins: BinMap) {
        self.bins = bins;
    }

    /// Replaces the dB shaping parameters.
    pub fn set_shaping(&mut self, shaping: Shaping) {
        self.shaping = shaping;
    }

    /// Transforms `frame` and writes one byte per column into `out`.
    ///
    /// `out` is resized to the column count; with a pre-reserved buffer this
    /// never allocates.
    pub fn process(&mut self, frame: &[f32], out: &mut Vec<u8>) -> Result<()> {
        let size = self.fft_size();
        if frame.len() != size {
            return Err(TelemetryError::msg(format!(
                "frame has {} samples, transform expects {size}",
                frame.len()
            )));
        }

        for ((dst, &sample), &w) in self.input.iter_mut().zip(frame).zip(&self.window) {
            *dst = sample * w;
        }
        self.plan.execute(&mut self.input, &mut self.spectrum)?;

        let columns = self.bins.columns();
        let amp_scale = 2.0 / size as f64;
        let floor = f64::from(self.shaping.db_floor);
        let tilt = f64::from(self.shaping.tilt);
        let gain = f64::from(self.shaping.master_gain);

        out.resize(columns, 0);
        for (b, value) in out.iter_mut().enumerate() {
            let range = self.bins.range(b);
            let count = range.len();
            let sum: f64 = self.spectrum[range]
                .iter()
                .map(|bin| {
                    let (re, im) = (f64::from(bin.re), f64::from(bin.im));
                    (re * re + im * im).sqrt() * amp_scale
                })
                .sum();
            let amplitude = if count > 0 { sum / count as f64 } else { 0.0 };

            let db = 20.0 * (amplitude + AMPLITUDE_EPSILON).log10();
            let clamped = db.max(floor);
            let normalized = (clamped - floor) / -floor;
            let weight = ((b as f64 + TILT_OFFSET) / (columns as f64 + TILT_OFFSET)).powf(tilt);

            let mut shaped = (normalized * weight * gain) as f32;
            if self.shaping.clamp_unit {
                shaped = shaped.clamp(0.0, 1.0);
            }
            *value = quantize(shaped);
        }

        Ok(())
    }
}

impl fmt::Debug for SpectrumTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumTransform")
            .field("fft_size", &self.fft_size())
            .field("columns", &self.columns())
            .field("shaping", &self.shaping)
            .finish()
    }
}

/// `round(v * 255)`, saturating at both ends (NaN maps to 0).
fn quantize(value: f32) -> u8 {
    (value * 255.0).round() as u8
}

/// Returns coefficient `index` of a symmetric Hamming window of `len` points.
pub fn hamming_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    (0.54 - 0.46 * ((2.0 * PI * index as f64) / (len as f64 - 1.0)).cos()) as f32
}

fn hamming_window(len: usize) -> Vec<f32> {
    (0..len).map(|i| hamming_value(i, len)).collect()
}
