//! Infer server binary.
//!
use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use cam_probe::{probe_devices, sensors::V4l2Source, DeviceIndex};
use clap::Parser;
use env_logger::TimestampPrecision;
use infer_server::{
    broadcast_channel,
    capture::{spawn_capture, CaptureSettings},
    endpoints::{router, AppState},
    inferer::{load_font, Inferer},
    meter::spawn_meter_logger,
    nn::{UltrafaceModel, UltrafaceVariant},
    CAPTURE_FORMAT, INFER_FRAMES_CHANNEL,
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the video streams on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Stop probing after this many device indices in a row failed to open
    #[clap(long, default_value = "6")]
    max_consecutive_absent: NonZeroUsize,

    /// Give up on a device that delivers no frame within this many milliseconds while probing
    #[clap(long, default_value = "5000")]
    probe_timeout_ms: u64,

    /// Capture from this device index instead of the first working one
    #[clap(long)]
    device: Option<DeviceIndex>,

    /// Input size of the detection model
    #[clap(long, value_enum, default_value = "320x240")]
    variant: UltrafaceVariant,

    /// Load the ONNX model from this file instead of the download cache
    #[clap(long)]
    model_path: Option<PathBuf>,

    /// TrueType font to label boxes with their confidence
    #[clap(long)]
    font: Option<PathBuf>,

    /// Maximum overlap of two detections before the less confident one is dropped
    #[clap(long, default_value = "0.5")]
    max_iou: f32,

    /// Minimum confidence of a detection
    #[clap(long, default_value = "0.7")]
    min_confidence: f32,

    /// Stop after this many failed captures in a row
    #[clap(long, default_value = "30")]
    max_capture_misses: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    // Find a camera before loading anything heavy
    let max_consecutive_absent = args.max_consecutive_absent;
    let mut source = V4l2Source::new(CAPTURE_FORMAT)
        .with_read_timeout(Duration::from_millis(args.probe_timeout_ms));
    let probe_report =
        tokio::task::spawn_blocking(move || probe_devices(&mut source, max_consecutive_absent))
            .await?;

    let device = match args.device.or_else(|| probe_report.first_working()) {
        Some(device) => device,
        None => bail!(
            "No working capture device found (available: {:?})",
            probe_report.available_ports()
        ),
    };
    log::info!("Using device {}", device);

    let model = match &args.model_path {
        Some(path) => {
            UltrafaceModel::from_path(path, args.variant, args.max_iou, args.min_confidence)?
        }
        None => UltrafaceModel::new(args.variant, args.max_iou, args.min_confidence).await?,
    };
    let font = args.font.as_deref().map(load_font).transpose()?;

    let (raw_tx, _) = broadcast_channel();
    let (detected_tx, _) = broadcast_channel();
    let (infer_tx, infer_rx) = INFER_FRAMES_CHANNEL.split();

    // Run the inference on a separate task
    let inferer = Inferer::new(infer_rx, model, detected_tx.clone(), font);
    tokio::spawn(async move { inferer.run().await });

    let capture = spawn_capture(
        CaptureSettings {
            device,
            max_consecutive_misses: args.max_capture_misses,
        },
        raw_tx.clone(),
        infer_tx,
    );

    spawn_meter_logger();

    // Build HTTP server with endpoints
    let app = router(Arc::new(AppState {
        raw_tx,
        detected_tx,
        device,
        probe_report,
    }));

    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on http://{}", addr);
    let server = axum::Server::bind(&addr).serve(app.into_make_service());

    // Serve until the camera gives up
    tokio::select! {
        result = server => result?,
        result = capture => result??,
    }

    Ok(())
}
