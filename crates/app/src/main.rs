use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicI32, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use clap::{Args, Parser, Subcommand};
use spectrum_telemetry_core::{
    bands::band_centers, AppConfig, AudioCapture, BinMap, TelemetryEngine, ToneCapture, MAX_COLUMNS,
};
use tracing_subscriber::EnvFilter;

fn main() -> spectrum_telemetry_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Live(args) => run_live(args),
        Commands::Bands {
            sample_rate,
            fft_size,
            columns,
        } => print_bands(sample_rate, fft_size, columns),
        Commands::Devices { config } => list_devices(config.as_ref()),
    }
}

fn load_config(path: Option<&PathBuf>) -> spectrum_telemetry_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            AppConfig::load(path)
        }
        None => Ok(AppConfig::default()),
    }
}

fn run_live(args: LiveArgs) -> spectrum_telemetry_core::Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    args.apply(&mut config);
    tracing::info!(seconds = args.seconds, tone_hz = config.capture.tone_hz, "starting live mode");

    let capture = ToneCapture::new(config.capture.clone());
    let mut engine = TelemetryEngine::new(Box::new(capture), config.engine);

    let frames = Arc::new(AtomicU64::new(0));
    let waveform_peak = Arc::new(AtomicI32::new(0));
    let levels = Arc::new(Mutex::new(Vec::new()));
    {
        let frames = frames.clone();
        engine.controls().set_spectrum_observer(move |_| {
            frames.fetch_add(1, Ordering::Relaxed);
        })?;
        let waveform_peak = waveform_peak.clone();
        engine.controls().set_waveform_observer(move |points| {
            let peak = points.iter().map(|&p| i32::from(p).abs()).max().unwrap_or(0);
            waveform_peak.store(peak, Ordering::Relaxed);
        })?;
        let levels = levels.clone();
        engine.controls().set_vu_observer(move |bytes| {
            if let Ok(mut levels) = levels.lock() {
                levels.clear();
                levels.extend_from_slice(bytes);
            }
        })?;
    }

    engine.enable(true)?;
    let mut reader = engine
        .spectrum_reader()
        .ok_or("spectrum reader already taken")?;

    let deadline = Instant::now() + Duration::from_secs_f64(args.seconds.max(0.0));
    while Instant::now() < deadline {
        std::thread::sleep(
            Duration::from_secs(1).min(deadline.saturating_duration_since(Instant::now())),
        );

        reader.update();
        let spectrum = reader.read_buf();
        let peak = (0..spectrum.len()).max_by_key(|&b| spectrum[b]);
        let vu = levels.lock().map(|levels| levels.clone()).unwrap_or_default();
        tracing::info!(
            frames = frames.load(Ordering::Relaxed),
            peak_band = ?peak,
            peak_value = ?peak.map(|b| spectrum[b]),
            waveform_peak = waveform_peak.load(Ordering::Relaxed),
            ?vu,
            "telemetry"
        );
    }

    engine.enable(false)?;
    Ok(())
}

fn print_bands(
    sample_rate: u32,
    fft_size: usize,
    columns: usize,
) -> spectrum_telemetry_core::Result<()> {
    if sample_rate == 0 || fft_size < 2 || columns == 0 || columns > MAX_COLUMNS {
        return Err(spectrum_telemetry_core::TelemetryError::InvalidConfig(format!(
            "cannot map {fft_size}-point FFT at {sample_rate} Hz onto {columns} columns"
        )));
    }
    let map = BinMap::build(sample_rate, fft_size, columns);
    let report = serde_json::json!({
        "sample_rate": sample_rate,
        "fft_size": fft_size,
        "centers_hz": band_centers(columns),
        "bins": map,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn list_devices(config: Option<&PathBuf>) -> spectrum_telemetry_core::Result<()> {
    let config = load_config(config)?;
    let capture = ToneCapture::new(config.capture);
    println!("{}", serde_json::to_string_pretty(&capture.list_devices()?)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Spectrum, waveform and VU telemetry from live audio",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline on the synthetic tone backend and log telemetry.
    Live(LiveArgs),
    /// Print the FFT bin ranges behind each spectrum column as JSON.
    Bands {
        #[arg(long, default_value_t = 48_000)]
        sample_rate: u32,
        #[arg(long, default_value_t = 4096)]
        fft_size: usize,
        #[arg(long, default_value_t = 256)]
        columns: usize,
    },
    /// List the capture devices of the synthetic backend.
    Devices {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct LiveArgs {
    /// How long to run before shutting down.
    #[arg(long, default_value_t = 5.0)]
    seconds: f64,
    /// JSON configuration file; flags below override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Frequency of the synthetic tone.
    #[arg(long)]
    tone: Option<f32>,
    #[arg(long)]
    columns: Option<usize>,
    #[arg(long)]
    fft_size: Option<usize>,
    #[arg(long)]
    hop_size: Option<usize>,
    #[arg(long)]
    gain: Option<f32>,
    #[arg(long, allow_negative_numbers = true)]
    db_floor: Option<f32>,
}

impl LiveArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(tone) = self.tone {
            config.capture.tone_hz = tone;
        }
        if let Some(columns) = self.columns {
            config.engine.set_columns(columns);
        }
        if let Some(fft_size) = self.fft_size {
            config.engine.set_fft_size(fft_size);
        }
        if let Some(hop_size) = self.hop_size {
            config.engine.set_hop_size(hop_size);
        }
        if let Some(gain) = self.gain {
            config.engine.set_master_gain(gain);
        }
        if let Some(db_floor) = self.db_floor {
            config.engine.set_db_floor(db_floor);
        }
    }
}
