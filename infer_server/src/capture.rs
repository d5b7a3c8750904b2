//! Capture loop on the selected camera.
//!
use anyhow::{anyhow, bail, Result};
use cam_probe::{
    sensors::{device_path, get_capture_fn},
    DeviceIndex,
};
use tokio::task::JoinHandle;

use crate::{
    as_jpeg_stream_item,
    meter::{FrameEvent, METER},
    BroadcastSender, StaticFrameSender, CAPTURE_FORMAT,
};

pub struct CaptureSettings {
    pub device: DeviceIndex,
    /// Give up after this many failed captures in a row.
    pub max_consecutive_misses: usize,
}

/// Capture frames on a blocking thread until the camera stops delivering.
///
/// Every frame is broadcast as-is. A frame is also handed to the inferer if it is idle.
pub fn spawn_capture(
    settings: CaptureSettings,
    raw_tx: BroadcastSender,
    infer_tx: StaticFrameSender,
) -> JoinHandle<Result<()>> {
    tokio::task::spawn_blocking(move || {
        let device_name = device_path(settings.device);
        let capture_fn = get_capture_fn(&device_name, CAPTURE_FORMAT, None, None)
            .map_err(|err| anyhow!("failed to start {}: {}", &device_name, err))?;

        let mut misses = 0;
        loop {
            match capture_fn() {
                Some(frame) => {
                    misses = 0;
                    METER.tick(FrameEvent::Captured);

                    // Fails only when nobody watches the stream
                    raw_tx.send(as_jpeg_stream_item(&frame[..])).ok();

                    match infer_tx.try_send_ref() {
                        Ok(mut slot) => {
                            slot.width = frame.resolution.0;
                            slot.height = frame.resolution.1;
                            slot.jpeg.clear();
                            slot.jpeg.extend_from_slice(&frame[..]);
                        }
                        // The inferer is still busy with earlier frames
                        Err(_) => METER.tick(FrameEvent::Skipped),
                    }
                }
                None => {
                    misses += 1;
                    if misses >= settings.max_consecutive_misses {
                        bail!("{} delivered no frame {} times in a row", &device_name, misses);
                    }
                    log::error!("Unable to capture frame, trying again...");
                }
            }
        }
    })
}
