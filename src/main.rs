use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Instant};

use clap::Parser;
use serde_json::json;
use ticket_ocr::{CommandEngine, Orientation, ScanConfig, ScanPool, TicketScannerBuilder};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Reads lottery ticket numbers from photos and prints one JSON record per photo.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Photos to scan.
    #[arg(required = true)]
    images: Vec<PathBuf>,
    /// OCR program: reads a PNG on stdin, writes a JSON array of recognitions.
    #[arg(long)]
    engine: PathBuf,
    /// Extra argument passed to the OCR program. Repeatable.
    #[arg(long = "engine-arg")]
    engine_args: Vec<String>,
    /// TOML file overriding the default settings.
    #[arg(long)]
    config: Option<PathBuf>,
    /// EXIF orientation value (1-8) applied instead of the photo's own tag.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=8))]
    orientation: Option<u32>,
    #[arg(long)]
    workers: Option<usize>,
    /// Skip sharpening and use nearest-neighbour warping.
    #[arg(long)]
    low_power: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => match ScanConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
        },
        None => ScanConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.performance.workers = workers;
    }
    let low_power = args.low_power || config.performance.low_power;
    let orientation = args.orientation.and_then(Orientation::from_exif);

    let engine = CommandEngine::new(&args.engine)
        .args(args.engine_args.iter().cloned())
        .timeout(config.ocr.timeout());
    let scanner = match TicketScannerBuilder::new()
        .config(config)
        .engine(Arc::new(engine))
        .low_power(low_power)
        .build()
    {
        Ok(scanner) => scanner,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let pool = match ScanPool::new(scanner) {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("failed to start scan workers: {err}");
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();
    let pending: Vec<_> = args
        .images
        .iter()
        .map(|path| {
            let submitted = std::fs::read(path).map(|bytes| pool.submit(bytes, orientation));
            (path, submitted)
        })
        .collect();

    let mut failures = 0;
    for (path, submitted) in pending {
        let record = match submitted {
            Err(err) => {
                failures += 1;
                json!({ "image": path, "error": format!("failed to read file: {err}") })
            }
            Ok(receiver) => match receiver.recv() {
                Ok(Ok(ticket)) => json!({
                    "image": path,
                    "ticket": ticket,
                    "front": ticket.front_display(),
                    "back": ticket.back_display(),
                    "periods": ticket.period_range(),
                    "complete": ticket.is_complete(),
                }),
                Ok(Err(err)) => {
                    failures += 1;
                    log::warn!("{}: {err}", path.display());
                    json!({ "image": path, "error": err.user_message() })
                }
                Err(_) => {
                    failures += 1;
                    json!({ "image": path, "error": "scan was abandoned" })
                }
            },
        };
        println!("{record}");
    }
    pool.shutdown();
    log::debug!("Scanned {} photos in {:?}", args.images.len(), start.elapsed());

    if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
