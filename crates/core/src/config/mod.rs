use std::{
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use serde::{Deserialize, Serialize};

use crate::{Result, TelemetryError};

/// Upper bound for the number of spectrum columns.
pub const MAX_COLUMNS: usize = 256;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub capture: CaptureConfig,
}

impl AppConfig {
    /// Parses a JSON document. Missing fields fall back to their defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let mut config: AppConfig = serde_json::from_str(text)?;
        config.engine.set_columns(config.engine.columns);
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Mutable tunables of the telemetry pipeline.
///
/// `fft_size` and `hop_size` only take effect on the next start. Everything
/// else is picked up by the next transform of a running pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fft_size: usize,
    pub hop_size: usize,
    pub columns: usize,
    /// Negative dB value mapped to zero on the output scale.
    pub db_floor: f32,
    pub master_gain: f32,
    /// Exponent of the per-band tilt curve.
    pub tilt: f32,
    /// Clamp shaped values to `[0, 1]` before quantizing.
    pub clamp_unit: bool,
    /// Capture what a render device plays instead of its microphone side.
    pub loopback: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fft_size: 4096,
            hop_size: 256,
            columns: MAX_COLUMNS,
            db_floor: -80.0,
            master_gain: 1.0,
            tilt: 0.35,
            clamp_unit: true,
            loopback: true,
        }
    }
}

impl EngineConfig {
    /// Sets the FFT frame length. Takes effect at the next start.
    pub fn set_fft_size(&mut self, fft_size: usize) {
        self.fft_size = fft_size;
    }

    /// Sets the samples between successive frames. Takes effect at the next start.
    pub fn set_hop_size(&mut self, hop_size: usize) {
        self.hop_size = hop_size;
    }

    /// Stores the column count clamped to `1..=MAX_COLUMNS`.
    pub fn set_columns(&mut self, columns: usize) {
        self.columns = columns.clamp(1, MAX_COLUMNS);
    }

    /// Returns the column count the pipeline runs with.
    ///
    /// `columns` is a public field, so a config built by hand or deserialized
    /// on its own may hold any value; this is it clamped to `1..=MAX_COLUMNS`.
    pub fn column_count(&self) -> usize {
        self.columns.clamp(1, MAX_COLUMNS)
    }

    /// Sets the level in dB that maps to an empty column.
    pub fn set_db_floor(&mut self, db_floor: f32) {
        self.db_floor = db_floor;
    }

    /// Sets the gain applied to spectrum, waveform and VU values.
    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain;
    }

    /// Sets the exponent of the high-frequency tilt. `0.0` disables it.
    pub fn set_tilt(&mut self, exponent: f32) {
        self.tilt = exponent;
    }

    /// Sets whether shaped values are clamped to `0.0..=1.0` before quantising.
    pub fn set_clamp_unit(&mut self, clamp: bool) {
        self.clamp_unit = clamp;
    }

    /// Sets whether the capture backend should record its output device.
    pub fn set_loopback(&mut self, loopback: bool) {
        self.loopback = loopback;
    }

    /// Sizing view used to allocate buffers and build the band map.
    pub fn band_plan(&self) -> BandPlan {
        BandPlan {
            fft_size: self.fft_size,
            columns: self.column_count(),
            hop_size: self.hop_size,
            db_floor: self.db_floor,
        }
    }

    /// Checks the sizing parameters a pipeline needs to start.
    ///
    /// `hop_size > fft_size` is accepted and simply means frames no longer
    /// overlap.
    pub fn validate(&self) -> Result<()> {
        if self.fft_size < 2 {
            return Err(TelemetryError::InvalidConfig(format!(
                "fft size must be at least 2, got {}",
                self.fft_size
            )));
        }
        if self.hop_size == 0 {
            return Err(TelemetryError::InvalidConfig(
                "hop size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Sizing parameters frozen at start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandPlan {
    pub fft_size: usize,
    pub columns: usize,
    pub hop_size: usize,
    pub db_floor: f32,
}

/// Settings for the synthetic tone capture backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub tone_hz: f32,
    pub amplitude: f32,
    /// Frames delivered per callback.
    pub block_frames: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            tone_hz: 1_000.0,
            amplitude: 0.5,
            block_frames: 480,
        }
    }
}

/// Configuration shared between the control surface and the worker threads.
///
/// Every mutation bumps a generation counter so readers on hot paths can
/// detect changes with a single atomic load.
#[derive(Debug, Default)]
pub struct SharedConfig {
    inner: Mutex<EngineConfig>,
    generation: AtomicU64,
}

impl SharedConfig {
    /// Wraps `config` as generation zero.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Mutex::new(config),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns a copy of the current configuration.
    pub fn snapshot(&self) -> Result<EngineConfig> {
        self.inner
            .lock()
            .map(|config| *config)
            .map_err(|_| TelemetryError::poisoned("engine configuration"))
    }

    /// Applies `change` and publishes a new generation.
    pub fn update<F: FnOnce(&mut EngineConfig)>(&self, change: F) -> Result<()> {
        let mut config = self
            .inner
            .lock()
            .map_err(|_| TelemetryError::poisoned("engine configuration"))?;
        change(&mut config);
        self.generation.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Returns the number of updates applied so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// Cached copy of a [`SharedConfig`] owned by one worker thread.
#[derive(Debug)]
pub struct ConfigView {
    shared: Arc<SharedConfig>,
    seen: u64,
    current: EngineConfig,
}

impl ConfigView {
    /// Returns a view holding the current configuration and generation.
    pub fn new(shared: Arc<SharedConfig>) -> Result<Self> {
        let seen = shared.generation();
        let current = shared.snapshot()?;
        Ok(Self {
            shared,
            seen,
            current,
        })
    }

    /// Returns the cached configuration.
    pub fn current(&self) -> &EngineConfig {
        &self.current
    }

    /// Reloads the cached copy if a newer generation exists. Returns `true`
    /// when the copy changed.
    pub fn refresh(&mut self) -> bool {
        if self.shared.generation() == self.seen {
            return false;
        }
        // Plain data behind the lock, a poisoned guard is still consistent.
        let guard = match self.shared.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.seen = self.shared.generation.load(Ordering::Relaxed);
        let changed = *guard != self.current;
        self.current = *guard;
        changed
    }
}
