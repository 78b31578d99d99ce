use std::sync::Arc;

use crate::{
    analysis::{Shaping, SpectrumTransform},
    audio::SampleBlock,
    bands::BinMap,
    clock::{Cadence, StopSignal, TICK_HZ},
    config::{ConfigView, EngineConfig},
    ingest::SampleIngest,
    meter::{LevelFeed, LevelMeter},
    publish::Publisher,
    waveform::{WaveformFeed, WaveformSampler},
};

use super::Observers;

/// State driven by the capture thread, one block at a time.
pub(super) struct Producer {
    pub(super) ingest: SampleIngest,
    pub(super) transform: SpectrumTransform,
    pub(super) publisher: Publisher<Vec<u8>>,
    pub(super) view: ConfigView,
    pub(super) sample_rate: u32,
    pub(super) waveform: WaveformFeed,
    pub(super) levels: LevelFeed,
    pub(super) observers: Arc<Observers>,
}

impl Producer {
    pub(super) fn on_block(&mut self, block: &SampleBlock<'_>) {
        self.waveform.push(block.channel(0));
        self.levels.push_block(block);

        let Self {
            ingest,
            transform,
            publisher,
            view,
            sample_rate,
            observers,
            ..
        } = self;

        ingest.push_block(block, |frame| {
            if view.refresh() {
                apply_config(transform, view.current(), *sample_rate);
            }

            if let Err(err) = transform.process(frame, publisher.write_buf()) {
                tracing::warn!(%err, "dropping spectrum frame");
                return;
            }
            // The observer sees the frame right before readers can pick it up.
            if let Some(observer) = observers.spectrum.get() {
                observer(publisher.write_buf().as_slice());
            }
            if publisher.publish() {
                tracing::trace!("reader skipped a spectrum frame");
            }
        });
    }
}

/// Applies runtime changes to a running transform. Sizing stays frozen until
/// the next start, so a new column count is mapped onto the active FFT size.
fn apply_config(transform: &mut SpectrumTransform, config: &EngineConfig, sample_rate: u32) {
    transform.set_shaping(Shaping::from(config));
    let columns = config.column_count();
    if columns != transform.columns() {
        transform.set_bins(BinMap::build(sample_rate, transform.fft_size(), columns));
        tracing::debug!(columns, "band map rebuilt");
    }
}

/// State of the fixed-rate thread feeding the waveform and VU observers.
pub(super) struct Ticker {
    pub(super) waveform: WaveformSampler,
    pub(super) meter: LevelMeter,
    pub(super) view: ConfigView,
    pub(super) observers: Arc<Observers>,
}

impl Ticker {
    pub(super) fn run(mut self, stop: &StopSignal) {
        let mut cadence = Cadence::from_hz(TICK_HZ);
        tracing::debug!(interval = ?cadence.interval(), "tick thread running");
        while !stop.wait_timeout(cadence.remaining()) {
            cadence.advance();
            self.tick();
        }
        tracing::debug!("tick thread finished");
    }

    fn tick(&mut self) {
        self.view.refresh();
        let gain = self.view.current().master_gain;

        if let Some(points) = self.waveform.tick(gain) {
            if let Some(observer) = self.observers.waveform.get() {
                observer(points);
            }
        }
        if let Some(levels) = self.meter.tick(gain) {
            if let Some(observer) = self.observers.vu.get() {
                observer(levels);
            }
        }
    }
}
