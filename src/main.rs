use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};

use framegraph::{
    BackendKind, ExportWorker, FilterGraphRenderer, FrameExchangeQueue, FrameMetadata,
    PipelineSettings, Roi, SettingsStore,
};

#[derive(Parser)]
#[command(name = "framegraph")]
#[command(about = "Push synthetic camera frames through the exchange queue and filter graph")]
#[command(version)]
struct Cli {
    /// Number of frames to produce
    #[arg(short, long, default_value = "120")]
    frames: u32,

    /// Frame width in pixels
    #[arg(long, default_value = "640")]
    width: u32,

    /// Frame height in pixels
    #[arg(long, default_value = "480")]
    height: u32,

    /// Producer interval in milliseconds
    #[arg(long, default_value = "33")]
    interval_ms: u64,

    /// Render backend: auto, gpu or software (overrides the settings file)
    #[arg(short, long, value_parser = parse_backend)]
    backend: Option<BackendKind>,

    /// Pipeline settings file (JSON)
    #[arg(short, long)]
    settings: Option<PathBuf>,
}

fn parse_backend(value: &str) -> Result<BackendKind, String> {
    BackendKind::parse(value).ok_or_else(|| format!("unknown backend '{value}'"))
}

/// Moving diagonal gradient, so consecutive frames differ.
fn synthetic_frame(width: u32, height: u32, tick: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let v = ((x + y + tick * 4) % 256) as u8;
            data.extend_from_slice(&[v, 255 - v, (y % 256) as u8, 255]);
        }
    }
    data
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=framegraph=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => SettingsStore::new(path.clone()).get(),
        None => PipelineSettings::default(),
    };
    if let Some(backend) = cli.backend {
        settings.renderer.backend = backend;
    }

    let queue = Arc::new(FrameExchangeQueue::with_settings(&settings.exchange));

    let mut renderer = FilterGraphRenderer::from_settings(&settings.renderer)?;
    renderer.load_graph()?;
    let exports = renderer.export_reader();

    let mut worker = ExportWorker::spawn(
        "demo",
        Arc::clone(&queue),
        Box::new(move |frame| {
            if let Err(e) = renderer.render_frame(&frame, true) {
                warn!("render failed: {e}");
            }
        }),
    )?;

    let started = Instant::now();
    let producer = {
        let queue = Arc::clone(&queue);
        let (width, height, frames) = (cli.width, cli.height, cli.frames);
        let interval = Duration::from_millis(cli.interval_ms);
        std::thread::Builder::new()
            .name("producer".into())
            .spawn(move || {
                for tick in 0..frames {
                    let pixels = synthetic_frame(width, height, tick);
                    let meta = FrameMetadata::new(width, height)
                        .with_roi(Roi::FULL)
                        .with_timestamp(started.elapsed().as_micros() as u64);
                    queue.push(&pixels, meta, true);
                    std::thread::sleep(interval);
                }
            })?
    };

    if producer.join().is_err() {
        warn!("producer thread panicked");
    }

    // Let the worker drain what is left, bounded by one wait period.
    let drain_deadline = Instant::now() + queue.wait_timeout();
    while !queue.is_empty() && Instant::now() < drain_deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    worker.stop();
    queue.dispose();

    info!(
        delivered = worker.delivered(),
        exported = exports.published(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "pipeline finished"
    );
    if let Some(frame) = exports.latest() {
        info!(
            width = frame.width,
            height = frame.height,
            sequence = frame.sequence,
            "last exported frame"
        );
    }
    println!("{}", serde_json::to_string_pretty(&queue.diagnostics())?);

    Ok(())
}
