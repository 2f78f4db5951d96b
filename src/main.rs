//! wake-detector binary: reads the shared memory file, opens the audio
//! front end and runs the detection loop until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wake_detector::{DetectionLoop, DetectorConfig, ModelPaths, RuntimeOptions, ShutdownSignal};

/// Echo-suppressed wake word detector for the voice agent
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    after_help = "Wake backends are cargo features: build with `--features vosk` for French \
                  (the default language) or `--features onnx` for English. Without the \
                  matching feature the detector exits at startup with an engine error."
)]
struct Cli {
    /// Shared configuration file written by the host
    #[arg(long, default_value = "memory.json")]
    memory: PathBuf,

    /// File holding the host pid to signal on wake
    #[arg(long, default_value = "/tmp/voice_agent.pid")]
    pid_file: PathBuf,

    /// Directory for the debug WAV recordings
    #[arg(long, default_value = "/tmp")]
    debug_dir: PathBuf,

    /// Vosk model directory (transcript engine)
    #[arg(long, default_value = "model")]
    vosk_model: PathBuf,

    /// openWakeWord feature models and stock classifiers
    #[arg(long, default_value = "models")]
    models_dir: PathBuf,

    /// User-trained keyword classifiers
    #[arg(long, default_value = "custom_models")]
    custom_models: PathBuf,

    /// Minimum interval between two host notifications
    #[arg(long, default_value_t = 2000)]
    cooldown_ms: u64,

    /// Pause after a trigger before buffers are drained
    #[arg(long, default_value_t = 1000)]
    settle_ms: u64,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Record debug audio regardless of the config file
    #[arg(long)]
    debug_audio: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

/// Poll interval while the microphone is disabled.
const IDLE_POLL: Duration = Duration::from_millis(200);

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wake_detector=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(cli: Cli) -> Result<()> {
    let shutdown = ShutdownSignal::new();
    shutdown.install_handler()?;

    let mut config = DetectorConfig::load_or_default(&cli.memory);
    if cli.debug_audio {
        config.debug_audio = true;
    }

    if !config.microphone.enabled {
        warn!("microphone disabled in config, idling until shutdown");
        while !shutdown.is_requested() {
            std::thread::sleep(IDLE_POLL);
        }
        return Ok(());
    }

    let options = RuntimeOptions {
        pid_file: cli.pid_file,
        debug_dir: cli.debug_dir,
        models: ModelPaths {
            vosk_model: cli.vosk_model,
            models_dir: cli.models_dir,
            custom_models: cli.custom_models,
        },
        cooldown: Duration::from_millis(cli.cooldown_ms),
        settle: Duration::from_millis(cli.settle_ms),
    };

    let mut detection =
        DetectionLoop::open(&config, &options).context("failed to start detection loop")?;
    detection.run(&shutdown).context("detection loop stopped")?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    info!(version = env!("CARGO_PKG_VERSION"), "wake-detector starting");

    match run(cli) {
        Ok(()) => {
            info!("wake-detector stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "wake-detector failed");
            ExitCode::FAILURE
        }
    }
}
