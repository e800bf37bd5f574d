//! Dual-cam-capture binary: grab frame pairs from a V4L2 stereo rig.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use dual_cam_capture::config::{CameraConfig, DEFAULT_CONFIG_PATH};
use dual_cam_capture::device::{list_devices, V4l2Driver};
use dual_cam_capture::{CameraDriver, FrameStats, OutputImage, Result, StereoCamera};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dual-cam-capture")]
#[command(author, version, about = "Grab frame pairs from a dual-sensor camera", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Number of frame pairs to grab
    #[arg(short = 'n', long, default_value = "10")]
    frames: u32,

    /// Pause between frame pairs in milliseconds
    #[arg(long, default_value = "0")]
    interval_ms: u64,

    /// List video nodes and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(&args) {
        error!(error = %err, "Capture failed");
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(args: &Args) -> Result<()> {
    if args.list_devices {
        init_tracing("info");
        for node in list_devices() {
            println!(
                "{}: {}",
                node.path.display(),
                node.name.as_deref().unwrap_or("<unknown>")
            );
        }
        return Ok(());
    }

    let config = CameraConfig::load_from(&args.config)?;
    init_tracing(&config.log_level);
    info!(path = %args.config.display(), "Configuration loaded");

    let driver = V4l2Driver::open(&config.v4l2)?;
    let mut camera = StereoCamera::open(driver, &config)?;

    println!("Device: {}", camera.session().driver().capabilities().card);
    println!("Source format: {}", camera.source_format());
    for property in camera.applied_properties() {
        println!("  {property}");
    }

    let mut left = OutputImage::default();
    let mut right = OutputImage::default();
    for index in 0..args.frames {
        let timestamp = Utc::now();
        let stats = camera.grab_left_into(timestamp, &mut left);
        report(index, "left", stats, &left)?;
        let stats = camera.grab_right_into(timestamp, &mut right);
        report(index, "right", stats, &right)?;

        if args.interval_ms > 0 {
            std::thread::sleep(Duration::from_millis(args.interval_ms));
        }
    }

    camera.close()
}

/// Print a grabbed frame; recoverable errors are logged and skipped.
fn report(index: u32, side: &str, result: Result<FrameStats>, image: &OutputImage) -> Result<()> {
    match result {
        Ok(stats) => {
            println!(
                "Frame {index} {side}: seq={} dropped={} {}x{} {} bytes",
                stats.sequence,
                stats.frames_dropped,
                image.width,
                image.height,
                image.data.len()
            );
            Ok(())
        }
        Err(err) if !err.is_fatal() => {
            warn!(side, error = %err, "Skipping frame");
            Ok(())
        }
        Err(err) => Err(err),
    }
}
