//! Simulated video source to run the prober without camera hardware.
//!
use std::collections::HashMap;

use simple_error::simple_error;

use crate::source::{DeviceIndex, Resolution, VideoSource};
use crate::Error;

/// Behaviour of a simulated device slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SimulatedDevice {
    /// Opens and delivers frames of the given size.
    Working(Resolution),
    /// Opens but never delivers a frame.
    Unreadable,
}

/// Handle to an opened simulated device.
#[derive(Debug)]
pub struct SimulatedHandle {
    index: DeviceIndex,
    device: SimulatedDevice,
}

/// Frame delivered by a working simulated device. Carries no pixel data, so arbitrary
/// resolutions cost nothing to simulate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SimulatedFrame {
    pub index: DeviceIndex,
    pub resolution: Resolution,
}

/// Fixed set of simulated devices. Indices without a device fail to open.
#[derive(Debug, Default)]
pub struct SimulatedSource {
    devices: HashMap<DeviceIndex, SimulatedDevice>,
    opens: usize,
    releases: usize,
}

impl SimulatedSource {
    /// Create a new instance.
    pub fn new(devices: impl IntoIterator<Item = (DeviceIndex, SimulatedDevice)>) -> Self {
        Self {
            devices: devices.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Number of successful `open` calls so far.
    pub fn opens(&self) -> usize {
        self.opens
    }

    /// Number of `release` calls so far.
    pub fn releases(&self) -> usize {
        self.releases
    }

    /// Handles that were opened and not yet released.
    pub fn open_handles(&self) -> usize {
        self.opens - self.releases
    }
}

impl VideoSource for SimulatedSource {
    type Handle = SimulatedHandle;
    type Frame = SimulatedFrame;

    fn open(&mut self, index: DeviceIndex) -> Result<SimulatedHandle, Error> {
        let device = *self
            .devices
            .get(&index)
            .ok_or_else(|| simple_error!("No simulated device at index {}", index))?;
        self.opens += 1;
        Ok(SimulatedHandle { index, device })
    }

    fn read(&mut self, handle: &mut SimulatedHandle) -> Option<SimulatedFrame> {
        match handle.device {
            SimulatedDevice::Working(resolution) => Some(SimulatedFrame {
                index: handle.index,
                resolution,
            }),
            SimulatedDevice::Unreadable => {
                log::debug!("Simulated device {} has no frame", handle.index);
                None
            }
        }
    }

    fn resolution(&self, handle: &SimulatedHandle) -> Resolution {
        match handle.device {
            SimulatedDevice::Working(resolution) => resolution,
            SimulatedDevice::Unreadable => (0, 0),
        }
    }

    fn release(&mut self, _handle: SimulatedHandle) {
        self.releases += 1;
    }
}

#[cfg(test)]
mod test {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::probe::{probe_devices, ProbeResult};

    #[test]
    fn huge_resolutions_are_reported_as_is() {
        let mut source = SimulatedSource::new([
            (0, SimulatedDevice::Working((100_000, 100_000))),
            (1, SimulatedDevice::Working((u32::MAX, u32::MAX))),
        ]);

        let report = probe_devices(&mut source, NonZeroUsize::new(1).expect("non-zero limit"));

        assert_eq!(report.working_ports(), &[0, 1]);
        assert_eq!(report.resolution_of(0), Some((100_000, 100_000)));
        assert_eq!(report.resolution_of(1), Some((u32::MAX, u32::MAX)));
        assert_eq!(report.results()[2], ProbeResult::Absent { index: 2 });
        assert_eq!(source.open_handles(), 0);
    }

    #[test]
    fn frames_carry_index_and_resolution() {
        let mut source = SimulatedSource::new([(3, SimulatedDevice::Working((640, 480)))]);

        let mut handle = source.open(3).expect("device 3 opens");
        let frame = source.read(&mut handle);
        source.release(handle);

        assert_eq!(
            frame,
            Some(SimulatedFrame {
                index: 3,
                resolution: (640, 480)
            })
        );
        assert!(source.open(4).is_err());
        assert_eq!(source.open_handles(), 0);
    }
}
