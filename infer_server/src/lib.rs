//! Run detection on a local webcam and serve the annotated stream in the browser.
pub mod capture;
pub mod endpoints;
pub mod inferer;
pub mod meter;
pub mod nn;
pub mod utils;

use bytes::Bytes;
use thingbuf::mpsc::{StaticChannel, StaticReceiver, StaticSender};
use tokio::sync::broadcast;

/// Pixel format requested from the camera. Frames are forwarded as JPEG without re-encoding.
pub const CAPTURE_FORMAT: &str = "MJPG";

const BROADCAST_CAPACITY: usize = 8;

pub type BroadcastSender = broadcast::Sender<Bytes>;
pub type BroadcastReceiver = broadcast::Receiver<Bytes>;

/// JPEG frame waiting for inference.
#[derive(Clone, Debug, Default)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

pub type StaticFrameSender = StaticSender<RawFrame>;
pub type StaticFrameReceiver = StaticReceiver<RawFrame>;

/// Frames handed from the capture thread to the inferer.
///
/// The capture thread never waits on it: frames arriving while the inferer is busy are dropped.
pub static INFER_FRAMES_CHANNEL: StaticChannel<RawFrame, 2> = StaticChannel::new();

pub fn broadcast_channel() -> (BroadcastSender, BroadcastReceiver) {
    broadcast::channel(BROADCAST_CAPACITY)
}

/// Wrap a JPEG image as one part of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(jpeg: &[u8]) -> Bytes {
    Bytes::from(
        [
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            jpeg,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn jpeg_stream_item_has_part_header_and_trailer() {
        let item = as_jpeg_stream_item(&[0xff, 0xd8, 0xff, 0xd9]);

        assert!(item.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xff\xd8"));
        assert!(item.ends_with(b"\xff\xd9\r\n\r\n"));
    }
}
