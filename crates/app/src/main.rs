use std::path::PathBuf;
use std::sync::Arc;

use bulbdj_core::audio::{CaptureStream, ReadStatus};
use bulbdj_core::{
    AppConfig, AudioFrame, DeliveryWorker, DetectorMode, FixtureBridge, FixtureDispatcher,
    FrameProcessor, InputDevice, LightPipeline, PulsePattern, Sensitivity, SensitivityHandle,
    SyntheticInput,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod sinks;

use sinks::{ConsoleDisplay, SimulatedBridge};

fn main() -> bulbdj_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_live(args),
        Commands::Calibrate(args) => run_calibrate(args),
    }
}

fn run_live(args: RunArgs) -> bulbdj_core::Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(sensitivity) = args.sensitivity {
        config.detector.sensitivity = Some(sensitivity);
    }
    if let Some(mode) = args.mode {
        config.detector.beat_mode = mode == Mode::Beat;
    }
    tracing::info!(?config, fixtures = ?args.fixtures, "starting live mode");

    let bridge = args.fixtures.map(|count| {
        Arc::new(SimulatedBridge::new(count, args.brightness)) as Arc<dyn FixtureBridge>
    });

    let mut pipeline = LightPipeline::new(config, input_device(&args), bridge.clone())?;
    if let Some(seed) = args.seed {
        pipeline.set_dispatcher(FixtureDispatcher::seeded(seed));
    }

    pipeline.start()?;
    let delivery = DeliveryWorker::spawn(
        pipeline.dispatches(),
        bridge,
        Some(Box::new(ConsoleDisplay::default())),
    )?;

    if args.frames.is_none() {
        tracing::info!("press Enter to stop");
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        pipeline.stop();
    } else {
        pipeline.wait();
    }

    delivery.join();
    Ok(())
}

fn run_calibrate(args: CalibrateArgs) -> bulbdj_core::Result<()> {
    let config = load_config(args.config.as_ref())?;
    let pattern = PulsePattern {
        period: args.period,
        tone_hz: args.tone_hz,
        ..Default::default()
    };

    for level in args.levels {
        let sensitivity = Sensitivity::new(level);
        let mut processor = FrameProcessor::new(
            &config,
            SensitivityHandle::new(sensitivity),
            DetectorMode::new(true),
        )?;
        let mut stream = SyntheticInput::new(pattern.clone()).open(&config.audio)?;
        let mut frame = AudioFrame::silent(config.audio.frame_len);

        let mut beats = 0;
        for _ in 0..args.frames {
            if stream.read_frame(&mut frame)? != ReadStatus::Frame {
                break;
            }
            beats += processor.process(&frame)?.beats;
        }

        println!(
            "sensitivity {:>3} (threshold x{:.2}): {beats} beats in {} frames",
            sensitivity.value(),
            sensitivity.threshold_ratio(),
            args.frames
        );
    }
    Ok(())
}

fn input_device(args: &RunArgs) -> Box<dyn InputDevice> {
    #[cfg(feature = "capture")]
    if args.mic {
        use bulbdj_core::audio::CpalInput;
        return match &args.device {
            Some(name) => Box::new(CpalInput::with_device_name(name.as_str())),
            None => Box::new(CpalInput::new()),
        };
    }

    let input = SyntheticInput::new(PulsePattern {
        period: args.period,
        ..Default::default()
    })
    .paced();
    match args.frames {
        Some(limit) => Box::new(input.with_frame_limit(limit)),
        None => Box::new(input),
    }
}

fn load_config(path: Option<&PathBuf>) -> bulbdj_core::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::from_json_file(path),
        None => Ok(AppConfig::default()),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive lights from live audio", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture audio and drive the fixtures (or the console demo) live.
    Run(RunArgs),
    /// Count beats in a synthetic pulse train at several sensitivities.
    Calibrate(CalibrateArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Beat sensitivity, clamped to 0..=100.
    #[arg(short, long, allow_hyphen_values = true)]
    sensitivity: Option<i32>,
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,
    /// Simulate a connected bridge with this many fixtures.
    #[arg(short, long)]
    fixtures: Option<usize>,
    /// Brightness reported by simulated fixtures.
    #[arg(long, default_value_t = 200)]
    brightness: u8,
    /// Seed for the random fixture hues.
    #[arg(long)]
    seed: Option<u64>,
    /// Stop after this many synthetic frames instead of waiting for Enter.
    #[arg(long)]
    frames: Option<usize>,
    /// Frames between synthetic pulses.
    #[arg(long, default_value_t = 20)]
    period: usize,
    /// Capture from the default microphone instead of the synthetic source.
    #[cfg(feature = "capture")]
    #[arg(long)]
    mic: bool,
    /// Input device to open with `--mic`, by name.
    #[cfg(feature = "capture")]
    #[arg(long, requires = "mic")]
    device: Option<String>,
}

#[derive(Args, Debug)]
struct CalibrateArgs {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 50)]
    frames: usize,
    #[arg(long, default_value_t = 10)]
    period: usize,
    #[arg(long, default_value_t = 60.0)]
    tone_hz: f32,
    /// Sensitivity levels to compare.
    #[arg(long, value_delimiter = ',', default_values_t = [0, 50, 100])]
    levels: Vec<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Flash on detected beats.
    Beat,
    /// Follow the spectrum continuously.
    Frequency,
}
