//! Discover which capture devices on this machine deliver a usable video stream.
pub mod probe;
pub mod sensors;
pub mod sim;
pub mod source;

pub use probe::{probe_devices, ProbeReport, ProbeResult};
pub use source::{DeviceIndex, Resolution, VideoSource};

/// Error type.
pub type Error = Box<dyn std::error::Error>;
