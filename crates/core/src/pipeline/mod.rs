//! The telemetry pipeline façade.
//!
//! [`TelemetryEngine`] owns the capture backend and the periodic tick thread.
//! While running, the capture thread drives ingest, transform and publish;
//! the tick thread derives waveform and VU snapshots at a fixed rate.
//! Configuration and observers live behind [`EngineControls`], which can be
//! cloned and used from any thread, including from inside an observer.

mod worker;

use std::{
    fmt,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
};

use crate::{
    analysis::{Shaping, SpectrumTransform},
    audio::{AudioCapture, DeviceInfo, SampleBlock},
    bands::BinMap,
    clock::StopSignal,
    config::{ConfigView, EngineConfig, SharedConfig, MAX_COLUMNS},
    fft::{FftBackend, RealFftBackend},
    ingest::SampleIngest,
    meter::LevelMeter,
    publish::{triple_buffer, Reader},
    waveform::WaveformSampler,
    Result, TelemetryError,
};

use worker::{Producer, Ticker};

/// Consumer half of the spectrum handoff.
pub type SpectrumReader = Reader<Vec<u8>>;

type Observer<T> = Arc<dyn Fn(&[T]) + Send + Sync>;

/// Lifecycle of a [`TelemetryEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Idle,
    Starting,
    Running,
    Stopping,
}

struct ObserverSlot<T> {
    inner: Mutex<Option<Observer<T>>>,
}

impl<T> ObserverSlot<T> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Clones the callback out so it is never invoked under the lock.
    fn get(&self) -> Option<Observer<T>> {
        match self.inner.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set(&self, observer: Option<Observer<T>>) -> Result<()> {
        let mut slot = self
            .inner
            .lock()
            .map_err(|_| TelemetryError::poisoned("observer slot"))?;
        *slot = observer;
        Ok(())
    }
}

pub(crate) struct Observers {
    spectrum: ObserverSlot<u8>,
    waveform: ObserverSlot<i16>,
    vu: ObserverSlot<u8>,
}

impl Observers {
    fn new() -> Self {
        Self {
            spectrum: ObserverSlot::new(),
            waveform: ObserverSlot::new(),
            vu: ObserverSlot::new(),
        }
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("spectrum", &self.spectrum.get().is_some())
            .field("waveform", &self.waveform.get().is_some())
            .field("vu", &self.vu.get().is_some())
            .finish()
    }
}

/// Cloneable control surface: tunables and observer registration.
#[derive(Debug, Clone)]
pub struct EngineControls {
    config: Arc<SharedConfig>,
    observers: Arc<Observers>,
}

impl EngineControls {
    fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(SharedConfig::new(config)),
            observers: Arc::new(Observers::new()),
        }
    }

    /// Current tunables.
    pub fn config(&self) -> Result<EngineConfig> {
        self.config.snapshot()
    }

    /// Takes effect at the next start.
    pub fn set_fft_size(&self, fft_size: usize) -> Result<()> {
        tracing::debug!(fft_size, "fft size set");
        self.config.update(|config| config.set_fft_size(fft_size))
    }

    /// Takes effect at the next start.
    pub fn set_hop_size(&self, hop_size: usize) -> Result<()> {
        tracing::debug!(hop_size, "hop size set");
        self.config.update(|config| config.set_hop_size(hop_size))
    }

    /// Clamped to `1..=256`; a running pipeline switches at the next frame.
    pub fn set_columns(&self, columns: usize) -> Result<()> {
        if columns == 0 || columns > MAX_COLUMNS {
            tracing::warn!(columns, "column count out of range, clamping");
        }
        self.config.update(|config| config.set_columns(columns))
    }

    /// Applies from the next spectrum frame.
    pub fn set_db_floor(&self, db_floor: f32) -> Result<()> {
        self.config.update(|config| config.set_db_floor(db_floor))
    }

    /// Applies from the next spectrum frame and the next tick.
    pub fn set_master_gain(&self, gain: f32) -> Result<()> {
        self.config.update(|config| config.set_master_gain(gain))
    }

    pub fn set_tilt(&self, exponent: f32) -> Result<()> {
        self.config.update(|config| config.set_tilt(exponent))
    }

    pub fn set_clamp_unit(&self, clamp: bool) -> Result<()> {
        self.config.update(|config| config.set_clamp_unit(clamp))
    }

    /// Passed to the capture backend at the next start.
    pub fn set_loopback(&self, loopback: bool) -> Result<()> {
        self.config.update(|config| config.set_loopback(loopback))
    }

    /// Called on the capture thread with one byte per column after every
    /// published frame.
    pub fn set_spectrum_observer<F>(&self, observer: F) -> Result<()>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.observers.spectrum.set(Some(Arc::new(observer)))
    }

    /// Removes the spectrum observer, if any.
    pub fn clear_spectrum_observer(&self) -> Result<()> {
        self.observers.spectrum.set(None)
    }

    /// Called on the tick thread with 1024 16-bit points.
    pub fn set_waveform_observer<F>(&self, observer: F) -> Result<()>
    where
        F: Fn(&[i16]) + Send + Sync + 'static,
    {
        self.observers.waveform.set(Some(Arc::new(observer)))
    }

    /// Removes the waveform observer, if any.
    pub fn clear_waveform_observer(&self) -> Result<()> {
        self.observers.waveform.set(None)
    }

    /// Called on the tick thread with one level byte per channel.
    pub fn set_vu_observer<F>(&self, observer: F) -> Result<()>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.observers.vu.set(Some(Arc::new(observer)))
    }

    /// Removes the VU observer, if any.
    pub fn clear_vu_observer(&self) -> Result<()> {
        self.observers.vu.set(None)
    }
}

struct Session {
    stop: Arc<StopSignal>,
    ticker: JoinHandle<()>,
    reader: Option<SpectrumReader>,
}

/// Owns a capture backend and runs the telemetry pipeline on top of it.
pub struct TelemetryEngine {
    controls: EngineControls,
    capture: Box<dyn AudioCapture>,
    fft: Arc<dyn FftBackend>,
    phase: PipelinePhase,
    session: Option<Session>,
}

impl TelemetryEngine {
    /// Creates an idle engine using the default `realfft` backend.
    pub fn new(capture: Box<dyn AudioCapture>, config: EngineConfig) -> Self {
        Self {
            controls: EngineControls::new(config),
            capture,
            fft: Arc::new(RealFftBackend::new()),
            phase: PipelinePhase::Idle,
            session: None,
        }
    }

    /// Replaces the transform backend. Used by the next start.
    pub fn with_fft_backend(mut self, backend: Arc<dyn FftBackend>) -> Self {
        self.fft = backend;
        self
    }

    /// Returns the control surface shared with every clone of it.
    pub fn controls(&self) -> &EngineControls {
        &self.controls
    }

    /// Returns the current lifecycle phase.
    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    /// Returns `true` between a successful start and the next stop.
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Starts or stops the pipeline. Both directions are idempotent.
    pub fn enable(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            self.start()
        } else {
            self.stop();
            Ok(())
        }
    }

    /// Allocates buffers, builds the band map and starts both threads. On
    /// failure everything is released again and the engine stays idle.
    pub fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        self.phase = PipelinePhase::Starting;
        match self.launch() {
            Ok(session) => {
                self.session = Some(session);
                self.phase = PipelinePhase::Running;
                tracing::info!(fft = self.fft.name(), "telemetry pipeline running");
                Ok(())
            }
            Err(err) => {
                self.phase = PipelinePhase::Idle;
                tracing::warn!(%err, "telemetry pipeline failed to start");
                Err(err)
            }
        }
    }

    fn launch(&mut self) -> Result<Session> {
        let config = self.controls.config()?;
        config.validate()?;

        self.capture.set_loopback(config.loopback);
        let format = self.capture.format()?;
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(TelemetryError::InvalidConfig(format!(
                "capture format {} Hz x {} channels is unusable",
                format.sample_rate, format.channels
            )));
        }
        tracing::debug!(plan = ?config.band_plan(), ?format, "starting pipeline");

        let plan = self.fft.plan(config.fft_size)?;
        if config.columns != config.column_count() {
            tracing::warn!(columns = config.columns, "column count out of range, clamping");
        }
        let bins = BinMap::build(format.sample_rate, config.fft_size, config.column_count());
        let (publisher, reader) = triple_buffer(Vec::with_capacity(MAX_COLUMNS));
        let (waveform_sampler, waveform) = WaveformSampler::new();
        let (meter, levels) = LevelMeter::new();

        let mut producer = Producer {
            ingest: SampleIngest::new(config.fft_size, config.hop_size),
            transform: SpectrumTransform::new(plan, bins, Shaping::from(&config)),
            publisher,
            view: ConfigView::new(self.controls.config.clone())?,
            sample_rate: format.sample_rate,
            waveform,
            levels,
            observers: self.controls.observers.clone(),
        };
        let ticker = Ticker {
            waveform: waveform_sampler,
            meter,
            view: ConfigView::new(self.controls.config.clone())?,
            observers: self.controls.observers.clone(),
        };

        let stop = Arc::new(StopSignal::new());
        let ticker = {
            let stop = stop.clone();
            thread::Builder::new()
                .name("telemetry-tick".into())
                .spawn(move || ticker.run(&stop))?
        };

        let started = self
            .capture
            .start(Box::new(move |block: &SampleBlock<'_>| producer.on_block(block)));
        if let Err(err) = started {
            stop.raise();
            if ticker.join().is_err() {
                tracing::error!("tick thread panicked");
            }
            return Err(err);
        }

        Ok(Session {
            stop,
            ticker,
            reader: Some(reader),
        })
    }

    /// Stops capture and the tick thread. Returns once both have finished
    /// and the run's buffers are released. Does nothing while idle.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.phase = PipelinePhase::Stopping;

        // Dropping the sink releases the producer side.
        self.capture.stop();
        session.stop.raise();
        if session.ticker.join().is_err() {
            tracing::error!("tick thread panicked");
        }
        drop(session.reader);

        self.phase = PipelinePhase::Idle;
        tracing::info!("telemetry pipeline stopped");
    }

    /// Hands out the consumer half of the current run's spectrum handoff.
    /// Available once per run.
    pub fn spectrum_reader(&mut self) -> Option<SpectrumReader> {
        self.session.as_mut().and_then(|session| session.reader.take())
    }

    /// Returns the devices the capture backend offers.
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.capture.list_devices()
    }

    /// Selects a capture device, stopping a running pipeline first. Returns
    /// `false` for unknown ids.
    pub fn set_device(&mut self, id: &str) -> Result<bool> {
        self.stop();
        let selected = self.capture.set_device(id)?;
        if !selected {
            tracing::warn!(id, "unknown capture device");
        }
        Ok(selected)
    }

    /// Returns the selected capture device, if the backend has one.
    pub fn current_device(&self) -> Option<DeviceInfo> {
        self.capture.current_device()
    }
}

impl fmt::Debug for TelemetryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryEngine")
            .field("controls", &self.controls)
            .field("fft", &self.fft.name())
            .field("phase", &self.phase)
            .finish()
    }
}

impl Drop for TelemetryEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{PushCapture, PushHandle, StreamFormat};
    use std::{
        f64::consts::TAU,
        sync::atomic::{AtomicUsize, Ordering},
        time::{Duration, Instant},
    };

    const RATE: u32 = 48_000;
    const BLOCK_FRAMES: usize = 480;

    fn push_engine(columns: usize) -> (TelemetryEngine, PushHandle) {
        let (capture, handle) = PushCapture::new(StreamFormat {
            sample_rate: RATE,
            channels: 2,
        });
        let mut config = EngineConfig::default();
        config.set_columns(columns);
        (TelemetryEngine::new(Box::new(capture), config), handle)
    }

    /// Delivers `seconds` of a stereo sine, right channel at half level.
    fn deliver_sine(handle: &PushHandle, hz: f64, amplitude: f64, seconds: f64) {
        let frames = (f64::from(RATE) * seconds) as usize;
        let step = TAU * hz / f64::from(RATE);
        let mut block = Vec::with_capacity(BLOCK_FRAMES * 2);
        for start in (0..frames).step_by(BLOCK_FRAMES) {
            block.clear();
            for n in start..(start + BLOCK_FRAMES).min(frames) {
                let value = (amplitude * (step * n as f64).sin()) as f32;
                block.extend([value, value * 0.5]);
            }
            assert!(handle.deliver_samples(&block, block.len() / 2, 2, false));
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    fn record_spectrum(engine: &TelemetryEngine) -> Arc<Mutex<Vec<Vec<u8>>>> {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        engine
            .controls()
            .set_spectrum_observer(move |bytes| sink.lock().unwrap().push(bytes.to_vec()))
            .unwrap();
        frames
    }

    #[test]
    fn disable_is_idempotent_from_any_state() {
        let (mut engine, handle) = push_engine(64);
        engine.enable(false).unwrap();
        engine.enable(false).unwrap();
        assert_eq!(engine.phase(), PipelinePhase::Idle);

        engine.enable(true).unwrap();
        engine.enable(true).unwrap();
        assert_eq!(engine.phase(), PipelinePhase::Running);
        assert!(handle.is_attached());

        engine.enable(false).unwrap();
        engine.enable(false).unwrap();
        assert_eq!(engine.phase(), PipelinePhase::Idle);
        assert!(!handle.is_attached());
    }

    #[test]
    fn one_khz_tone_peaks_in_the_band_holding_bin_85() {
        let (mut engine, handle) = push_engine(256);
        let frames = record_spectrum(&engine);
        engine.enable(true).unwrap();

        deliver_sine(&handle, 1_000.0, 0.5, 1.0);

        let last = frames.lock().unwrap().last().cloned().expect("spectrum published");
        assert_eq!(last.len(), 256);
        let peak = (0..last.len()).max_by_key(|&b| last[b]).unwrap();

        let bins = BinMap::build(RATE, 4096, 256);
        assert!(bins.range(peak).contains(&85), "peak band {peak} misses bin 85");
        for (band, &value) in last.iter().enumerate() {
            if band.abs_diff(peak) >= 3 {
                assert!(value < last[peak] / 2, "band {band} = {value}");
            }
        }

        let mut reader = engine.spectrum_reader().expect("reader available once");
        assert!(engine.spectrum_reader().is_none());
        assert!(reader.update());
        assert_eq!(reader.read_buf(), &last);
        assert_eq!(reader.sequence() as usize, frames.lock().unwrap().len());

        engine.enable(false).unwrap();
    }

    #[test]
    fn frames_follow_the_hop_size() {
        let (mut engine, handle) = push_engine(32);
        engine.controls().set_fft_size(1024).unwrap();
        engine.controls().set_hop_size(512).unwrap();
        let frames = record_spectrum(&engine);
        engine.enable(true).unwrap();

        // 4800 samples: 9 complete hops, frames from the second hop on.
        deliver_sine(&handle, 440.0, 0.5, 0.1);
        assert_eq!(frames.lock().unwrap().len(), 8);
        engine.enable(false).unwrap();
    }

    #[test]
    fn runtime_changes_reach_the_next_frame() {
        let (mut engine, handle) = push_engine(64);
        let frames = record_spectrum(&engine);
        engine.enable(true).unwrap();
        deliver_sine(&handle, 1_000.0, 0.5, 0.2);

        engine.controls().set_columns(16).unwrap();
        deliver_sine(&handle, 1_000.0, 0.5, 0.05);
        assert_eq!(frames.lock().unwrap().last().unwrap().len(), 16);

        engine.controls().set_master_gain(0.0).unwrap();
        deliver_sine(&handle, 1_000.0, 0.5, 0.05);
        assert!(frames.lock().unwrap().last().unwrap().iter().all(|&v| v == 0));

        // Sizing is frozen while running.
        engine.controls().set_fft_size(1024).unwrap();
        engine.controls().set_master_gain(1.0).unwrap();
        deliver_sine(&handle, 1_000.0, 0.5, 0.05);
        assert_eq!(frames.lock().unwrap().last().unwrap().len(), 16);
        engine.enable(false).unwrap();
    }

    #[test]
    fn out_of_range_columns_in_a_built_config_are_clamped_at_start() {
        for (columns, expected) in [(0, 1), (1_000, MAX_COLUMNS)] {
            let (capture, handle) = PushCapture::new(StreamFormat {
                sample_rate: RATE,
                channels: 2,
            });
            let config = EngineConfig {
                columns,
                ..EngineConfig::default()
            };
            let mut engine = TelemetryEngine::new(Box::new(capture), config);
            let frames = record_spectrum(&engine);

            engine.enable(true).unwrap();
            deliver_sine(&handle, 1_000.0, 0.5, 0.2);
            engine.enable(false).unwrap();

            let frames = frames.lock().unwrap();
            assert!(!frames.is_empty());
            assert!(frames.iter().all(|frame| frame.len() == expected));
        }
    }

    #[test]
    fn columns_are_clamped_by_the_setter() {
        let (engine, _handle) = push_engine(64);
        engine.controls().set_columns(0).unwrap();
        assert_eq!(engine.controls().config().unwrap().columns, 1);
        engine.controls().set_columns(10_000).unwrap();
        assert_eq!(engine.controls().config().unwrap().columns, MAX_COLUMNS);
    }

    #[test]
    fn waveform_and_vu_arrive_on_the_tick_thread() {
        let (mut engine, handle) = push_engine(64);
        let waveform = Arc::new(Mutex::new(None));
        let levels = Arc::new(Mutex::new(None));
        {
            let waveform = waveform.clone();
            engine
                .controls()
                .set_waveform_observer(move |points| {
                    *waveform.lock().unwrap() = Some(points.to_vec());
                })
                .unwrap();
            let levels = levels.clone();
            engine
                .controls()
                .set_vu_observer(move |bytes| *levels.lock().unwrap() = Some(bytes.to_vec()))
                .unwrap();
        }
        engine.enable(true).unwrap();
        deliver_sine(&handle, 1_000.0, 0.5, 0.1);

        let arrived = || waveform.lock().unwrap().is_some() && levels.lock().unwrap().is_some();
        assert!(wait_for(arrived));
        engine.enable(false).unwrap();

        let points = waveform.lock().unwrap().take().unwrap();
        assert_eq!(points.len(), 1024);
        assert!(points.iter().any(|&p| p > 8_000));

        let levels = levels.lock().unwrap().take().unwrap();
        assert_eq!(levels.len(), 2);
        assert!(levels[0] > levels[1]);
    }

    #[test]
    fn observer_can_unregister_itself() {
        let (mut engine, handle) = push_engine(64);
        let calls = Arc::new(AtomicUsize::new(0));
        let controls = engine.controls().clone();
        {
            let calls = calls.clone();
            engine
                .controls()
                .set_spectrum_observer(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    controls.clear_spectrum_observer().unwrap();
                })
                .unwrap();
        }
        engine.enable(true).unwrap();
        deliver_sine(&handle, 1_000.0, 0.5, 0.5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        engine.enable(false).unwrap();
    }

    #[test]
    fn invalid_sizing_fails_the_start_and_stays_idle() {
        let (mut engine, handle) = push_engine(64);
        engine.controls().set_hop_size(0).unwrap();
        assert!(matches!(
            engine.enable(true),
            Err(TelemetryError::InvalidConfig(_))
        ));
        assert_eq!(engine.phase(), PipelinePhase::Idle);
        assert!(!handle.is_attached());

        engine.controls().set_hop_size(256).unwrap();
        engine.enable(true).unwrap();
        assert_eq!(engine.phase(), PipelinePhase::Running);
    }

    struct RefusingCapture;

    impl AudioCapture for RefusingCapture {
        fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
            Ok(Vec::new())
        }
        fn set_device(&mut self, _id: &str) -> Result<bool> {
            Ok(false)
        }
        fn current_device(&self) -> Option<DeviceInfo> {
            None
        }
        fn set_loopback(&mut self, _loopback: bool) {}
        fn format(&self) -> Result<crate::audio::StreamFormat> {
            Ok(StreamFormat {
                sample_rate: RATE,
                channels: 1,
            })
        }
        fn start(&mut self, _sink: crate::audio::SampleSink) -> Result<()> {
            Err(TelemetryError::Capture("device busy".into()))
        }
        fn stop(&mut self) {}
        fn is_running(&self) -> bool {
            false
        }
    }

    #[test]
    fn refused_capture_releases_the_tick_thread() {
        let mut engine = TelemetryEngine::new(Box::new(RefusingCapture), EngineConfig::default());
        assert!(matches!(engine.enable(true), Err(TelemetryError::Capture(_))));
        assert_eq!(engine.phase(), PipelinePhase::Idle);
        assert!(!engine.is_running());
        assert!(engine.spectrum_reader().is_none());
        engine.enable(false).unwrap();
    }

    #[test]
    fn selecting_a_device_stops_the_pipeline() {
        let (mut engine, handle) = push_engine(64);
        engine.enable(true).unwrap();
        assert!(engine.set_device("external").unwrap());
        assert_eq!(engine.phase(), PipelinePhase::Idle);
        assert!(!handle.is_attached());
        assert!(!engine.set_device("missing").unwrap());
        assert_eq!(engine.list_devices().unwrap().len(), 1);
        assert_eq!(engine.current_device().unwrap().id, "external");
    }

    #[test]
    fn restarts_after_stop() {
        let (mut engine, handle) = push_engine(8);
        let frames = record_spectrum(&engine);
        for _ in 0..2 {
            engine.enable(true).unwrap();
            deliver_sine(&handle, 200.0, 0.5, 0.1);
            engine.enable(false).unwrap();
        }
        assert!(!handle.deliver_samples(&[0.0; 2], 1, 2, false));
        assert!(frames.lock().unwrap().len() > 2);
    }

    #[test]
    fn dropping_a_running_engine_detaches_capture() {
        let (mut engine, handle) = push_engine(64);
        engine.enable(true).unwrap();
        drop(engine);
        assert!(!handle.is_attached());
    }
}
