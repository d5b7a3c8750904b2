//! Capability interface of a video source.
//!
use crate::Error;

/// Slot number of a capture device, e.g. `2` for `/dev/video2`.
pub type DeviceIndex = u32;

/// Frame size as `(width, height)`.
pub type Resolution = (u32, u32);

/// Minimal set of operations the prober needs from a camera backend.
///
/// Implementations are free to pick their own handle and frame types. A handle returned by
/// [`VideoSource::open`] is always passed back to [`VideoSource::release`] exactly once.
pub trait VideoSource {
    type Handle;
    type Frame;

    /// Open the device at `index`.
    fn open(&mut self, index: DeviceIndex) -> Result<Self::Handle, Error>;

    /// Read a single frame, `None` if the device did not deliver one.
    fn read(&mut self, handle: &mut Self::Handle) -> Option<Self::Frame>;

    /// Frame size the device reports for this handle.
    fn resolution(&self, handle: &Self::Handle) -> Resolution;

    /// Give the device back to the OS.
    fn release(&mut self, handle: Self::Handle);
}
