//! Core library of the spectrum telemetry pipeline.
//!
//! Raw interleaved audio from a capture backend is cut into overlapping
//! frames, transformed into a banded 0–255 spectrum and handed to consumers
//! through a triple buffer. A fixed-rate thread derives a decimated waveform
//! preview and per-channel VU levels from the same stream. Each module owns
//! one stage; [`pipeline::TelemetryEngine`] wires them together.

pub mod analysis;
pub mod audio;
pub mod bands;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod error;
pub mod fft;
pub mod ingest;
pub mod meter;
pub mod pipeline;
pub mod publish;
pub mod waveform;

pub use analysis::{Shaping, SpectrumTransform};
pub use audio::{
    AudioCapture, DeviceFlow, DeviceInfo, PushCapture, PushHandle, SampleBlock, SampleSink,
    StreamFormat, ToneCapture,
};
pub use bands::BinMap;
pub use config::{AppConfig, BandPlan, CaptureConfig, EngineConfig, MAX_COLUMNS};
pub use error::{Result, TelemetryError};
pub use fft::{FftBackend, FftPlan, RealFftBackend};
pub use ingest::SampleIngest;
pub use meter::LevelMeter;
pub use pipeline::{EngineControls, PipelinePhase, SpectrumReader, TelemetryEngine};
pub use publish::{triple_buffer, Publisher, Reader};
pub use waveform::WaveformSampler;
