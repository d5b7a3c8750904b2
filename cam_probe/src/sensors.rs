//! Sensors module.
//!
//! V4L2 cameras via `rscam`, both as a [`VideoSource`] for probing and as a persistent capture
//! function once a device has been picked.
use std::{sync::mpsc, thread, time::Duration};

use rscam::{Camera, Config, Frame, IntervalInfo, ResolutionInfo};
use simple_error::simple_error;

use crate::source::{DeviceIndex, Resolution, VideoSource};
use crate::Error;

pub type CaptureFn = Box<dyn Fn() -> Option<Frame>>;

/// Device node of a capture device index on Linux.
pub fn device_path(index: DeviceIndex) -> String {
    format!("/dev/video{}", index)
}

/// Wait for the first frame of a device at most this long by default.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Video source backed by the V4L2 device nodes `/dev/video*`.
pub struct V4l2Source {
    format: String,
    read_timeout: Duration,
}

impl V4l2Source {
    /// Create a new instance that reads frames in the given fourcc format, e.g. `MJPG`.
    pub fn new(format: &str) -> Self {
        Self {
            format: format.to_owned(),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Give up on a device that has not delivered a frame after `read_timeout`.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

/// Opened V4L2 device.
///
/// `cam` is `None` after a read timed out. The camera then belongs to the stuck capture thread
/// and is closed when that thread finishes.
pub struct V4l2Handle {
    index: DeviceIndex,
    cam: Option<Camera>,
    resolution: Option<Resolution>,
    streaming: bool,
}

/// What a capture thread hands back: the camera, whether it is streaming, and the frame.
type ReadOutcome = (Camera, bool, Result<Frame, String>);

impl VideoSource for V4l2Source {
    type Handle = V4l2Handle;
    type Frame = Frame;

    fn open(&mut self, index: DeviceIndex) -> Result<V4l2Handle, Error> {
        let cam = Camera::new(&device_path(index))?;
        Ok(V4l2Handle {
            index,
            cam: Some(cam),
            resolution: None,
            streaming: false,
        })
    }

    fn read(&mut self, handle: &mut V4l2Handle) -> Option<Frame> {
        let mut cam = handle.cam.take()?;
        let format = self.format.clone();
        let streaming = handle.streaming;

        let outcome = run_with_timeout(self.read_timeout, move || -> ReadOutcome {
            let mut streaming = streaming;
            if !streaming {
                if let Err(err) = start_camera(&mut cam, &format, None, None) {
                    let err = format!("could not start streaming in format {}: {}", &format, err);
                    return (cam, false, Err(err));
                }
                streaming = true;
            }
            let frame = cam.capture().map_err(|err| format!("error capturing frame: {}", err));
            (cam, streaming, frame)
        });

        let (cam, streaming, frame) = match outcome {
            Some(outcome) => outcome,
            None => {
                log::warn!(
                    "Device {} delivered no frame within {:?}",
                    handle.index,
                    self.read_timeout
                );
                return None;
            }
        };
        handle.cam = Some(cam);
        handle.streaming = streaming;

        match frame {
            Ok(frame) => {
                handle.resolution = Some(frame.resolution);
                Some(frame)
            }
            Err(err) => {
                log::debug!("Device {}: {}", handle.index, err);
                None
            }
        }
    }

    fn resolution(&self, handle: &V4l2Handle) -> Resolution {
        handle.resolution.unwrap_or_default()
    }

    fn release(&mut self, handle: V4l2Handle) {
        if let (Some(mut cam), true) = (handle.cam, handle.streaming) {
            if let Err(err) = cam.stop() {
                log::debug!("Error stopping stream: {}", err);
            }
        }
        // Dropping the camera closes the device node
    }
}

/// Run `f` on a helper thread and wait at most `timeout` for its result.
///
/// On timeout the thread is left running and its result is dropped when it arrives. A panic in
/// `f` also yields `None`.
fn run_with_timeout<R, F>(timeout: Duration, f: F) -> Option<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("v4l2-read".to_owned())
        .spawn(move || {
            // The receiver is gone if we timed out
            let _ = tx.send(f());
        });
    if let Err(err) = spawned {
        log::warn!("Could not spawn capture thread: {}", err);
        return None;
    }

    rx.recv_timeout(timeout).ok()
}

/// Get a capture function to a video device on a Linux machine.
///
/// Resolution and frame rate default to the highest ones the device offers for `format`.
pub fn get_capture_fn(
    device_name: &str,
    format: &str,
    resolution: Option<Resolution>,
    frame_rate: Option<(u32, u32)>,
) -> Result<CaptureFn, Error> {
    let mut cam = Camera::new(device_name)?;
    log_supported_formats(&cam, format);

    let resolution = start_camera(&mut cam, format, resolution, frame_rate)?;
    log::info!(
        "Using camera {} at {}x{}",
        device_name,
        resolution.0,
        resolution.1
    );

    let callback = move || cam.capture().ok();
    Ok(Box::new(callback))
}

/// Configure and start streaming, returning the resolution in use.
fn start_camera(
    cam: &mut Camera,
    format: &str,
    resolution: Option<Resolution>,
    frame_rate: Option<(u32, u32)>,
) -> Result<Resolution, Error> {
    let format = format.as_bytes();

    let resolution = match resolution {
        Some(resolution) => resolution,
        None => get_max_resolution(cam, format)?,
    };
    let interval = match frame_rate {
        Some(interval) => interval,
        None => get_max_frame_rate(cam, format, resolution)?,
    };

    cam.start(&Config {
        interval,
        resolution,
        format,
        ..Default::default()
    })?;

    Ok(resolution)
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<Resolution, Error> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    largest_resolution(&resolution_info).ok_or_else(|| simple_error!("No resolution found").into())
}

/// Get the maximum supported frame rate for the given format and resolution.
///
/// The result is a frame interval `(numerator, denominator)` in seconds, as V4L2 expects it.
fn get_max_frame_rate(
    cam: &Camera,
    format: &[u8],
    resolution: Resolution,
) -> Result<(u32, u32), Error> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame intervals: {:?}", &interval_info);
    shortest_interval(&interval_info).ok_or_else(|| simple_error!("No frame rate found").into())
}

fn largest_resolution(resolution_info: &ResolutionInfo) -> Option<Resolution> {
    match resolution_info {
        ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            // Highest resolution in terms of number of pixels
            .max_by_key(|(width, height)| u64::from(*width) * u64::from(*height))
            .copied(),
        ResolutionInfo::Stepwise { max, .. } => Some(*max),
    }
}

fn shortest_interval(interval_info: &IntervalInfo) -> Option<(u32, u32)> {
    match interval_info {
        IntervalInfo::Discretes(intervals) => intervals
            .iter()
            .filter(|(numerator, denominator)| *numerator > 0 && *denominator > 0)
            // a/b < c/d  <=>  a*d < c*b
            .min_by(|(n_a, d_a), (n_b, d_b)| {
                (u64::from(*n_a) * u64::from(*d_b)).cmp(&(u64::from(*n_b) * u64::from(*d_a)))
            })
            .copied(),
        IntervalInfo::Stepwise { min, .. } => Some(*min),
    }
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}
