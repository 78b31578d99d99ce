//! Real-input FFT capability injected into the spectrum transform.
//!
//! The pipeline only depends on [`FftBackend`]; [`RealFftBackend`] is the
//! default implementation on top of `realfft`.

use std::sync::Arc;

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{Result, TelemetryError};

/// Factory for transform plans of a given size.
pub trait FftBackend: Send + Sync {
    fn plan(&self, size: usize) -> Result<Box<dyn FftPlan>>;

    fn name(&self) -> &str;
}

/// A prepared forward transform for one fixed size.
pub trait FftPlan: Send {
    fn size(&self) -> usize;

    /// Transforms `input` (length `size`, may be used as scratch) into
    /// `output` (length `size / 2 + 1`).
    fn execute(&mut self, input: &mut [f32], output: &mut [Complex32]) -> Result<()>;
}

/// Default backend. Planning happens once per pipeline start, so a fresh
/// planner is used for every plan.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFftBackend;

impl RealFftBackend {
    pub fn new() -> Self {
        Self
    }
}

impl FftBackend for RealFftBackend {
    fn plan(&self, size: usize) -> Result<Box<dyn FftPlan>> {
        if size < 2 {
            return Err(TelemetryError::InvalidConfig(format!(
                "fft size {size} is too small"
            )));
        }
        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(size);
        let scratch = plan.make_scratch_vec();
        Ok(Box::new(RealFftPlan { plan, scratch }))
    }

    fn name(&self) -> &str {
        "realfft"
    }
}

struct RealFftPlan {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
}

impl FftPlan for RealFftPlan {
    fn size(&self) -> usize {
        self.plan.len()
    }

    fn execute(&mut self, input: &mut [f32], output: &mut [Complex32]) -> Result<()> {
        self.plan.process_with_scratch(input, output, &mut self.scratch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_a_pure_bin() {
        let backend = RealFftBackend::new();
        let mut plan = backend.plan(64).unwrap();
        assert_eq!(plan.size(), 64);

        let mut input: Vec<f32> = (0..64)
            .map(|i| (2.0 * std::f32::consts::PI * 8.0 * i as f32 / 64.0).cos())
            .collect();
        let mut output = vec![Complex32::default(); 33];
        plan.execute(&mut input, &mut output).unwrap();

        let peak = output
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 8);
        assert!((output[8].norm() - 32.0).abs() < 1e-3);
    }

    #[test]
    fn wrong_buffer_sizes_are_errors() {
        let backend = RealFftBackend::new();
        let mut plan = backend.plan(16).unwrap();
        let mut input = vec![0.0; 16];
        let mut output = vec![Complex32::default(); 4];
        let err = plan.execute(&mut input, &mut output).unwrap_err();
        assert!(matches!(err, TelemetryError::Fft(_)));
    }

    #[test]
    fn refuses_degenerate_sizes() {
        assert!(RealFftBackend::new().plan(1).is_err());
    }
}
