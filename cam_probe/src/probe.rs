//! Device prober.
//!
//! Walks device indices upwards from 0, tries to open each one and read a single frame, and
//! stops after a run of devices that do not open at all. The scan is bounded: every index costs
//! at most one `open` and one `read`, and the run ends `max_consecutive_absent` indices after the
//! last device that opened.
use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::source::{DeviceIndex, Resolution, VideoSource};

/// Classification of a single device index.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeResult {
    /// Opens and delivers frames.
    Working {
        index: DeviceIndex,
        resolution: Resolution,
    },
    /// Opens but did not deliver a frame.
    PresentUnreadable { index: DeviceIndex },
    /// Does not open.
    Absent { index: DeviceIndex },
}

impl ProbeResult {
    pub fn index(&self) -> DeviceIndex {
        match *self {
            ProbeResult::Working { index, .. }
            | ProbeResult::PresentUnreadable { index }
            | ProbeResult::Absent { index } => index,
        }
    }
}

/// Outcome of one probing run.
///
/// All sequences are in discovery order, i.e. ascending device index. Reports only come out of
/// [`probe_devices`], so they serialize but do not deserialize.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ProbeReport {
    available_ports: Vec<DeviceIndex>,
    working_ports: Vec<DeviceIndex>,
    non_working_ports: Vec<DeviceIndex>,
    results: Vec<ProbeResult>,
}

impl ProbeReport {
    /// Devices that opened, whether or not they delivered a frame.
    pub fn available_ports(&self) -> &[DeviceIndex] {
        &self.available_ports
    }

    /// Devices that delivered a frame.
    pub fn working_ports(&self) -> &[DeviceIndex] {
        &self.working_ports
    }

    /// Devices that did not open.
    pub fn non_working_ports(&self) -> &[DeviceIndex] {
        &self.non_working_ports
    }

    /// Per-index results in probing order.
    pub fn results(&self) -> &[ProbeResult] {
        &self.results
    }

    /// Number of device indices that were tried.
    pub fn attempts(&self) -> usize {
        self.results.len()
    }

    /// Lowest device index that delivered a frame.
    pub fn first_working(&self) -> Option<DeviceIndex> {
        self.working_ports.first().copied()
    }

    /// Resolution a working device reported while probing.
    pub fn resolution_of(&self, index: DeviceIndex) -> Option<Resolution> {
        self.results.iter().find_map(|result| match *result {
            ProbeResult::Working {
                index: i,
                resolution,
            } if i == index => Some(resolution),
            _ => None,
        })
    }

    fn record(&mut self, result: ProbeResult) {
        match result {
            ProbeResult::Working { index, .. } => {
                self.available_ports.push(index);
                self.working_ports.push(index);
            }
            ProbeResult::PresentUnreadable { index } => self.available_ports.push(index),
            ProbeResult::Absent { index } => self.non_working_ports.push(index),
        }
        self.results.push(result);
    }
}

/// Probe devices from index 0 until `max_consecutive_absent` indices in a row fail to open.
///
/// Failing devices are part of the report, not errors. Every handle that was opened has been
/// released when this function returns.
pub fn probe_devices<S: VideoSource>(
    source: &mut S,
    max_consecutive_absent: NonZeroUsize,
) -> ProbeReport {
    let mut report = ProbeReport::default();
    let mut consecutive_absent = 0;
    let mut index: DeviceIndex = 0;

    while consecutive_absent < max_consecutive_absent.get() {
        let result = probe_device(source, index);
        log::debug!("Probed device {}: {:?}", index, &result);

        match result {
            ProbeResult::Absent { .. } => consecutive_absent += 1,
            _ => consecutive_absent = 0,
        }
        report.record(result);
        index += 1;
    }

    log::info!(
        "Probed {} devices: available {:?}, working {:?}, non-working {:?}",
        report.attempts(),
        report.available_ports(),
        report.working_ports(),
        report.non_working_ports()
    );

    report
}

fn probe_device<S: VideoSource>(source: &mut S, index: DeviceIndex) -> ProbeResult {
    let handle = match source.open(index) {
        Ok(handle) => handle,
        Err(err) => {
            log::debug!("Could not open device {}: {}", index, err);
            return ProbeResult::Absent { index };
        }
    };
    let mut device = OpenDevice {
        source,
        handle: Some(handle),
    };

    match device.read() {
        Some(_frame) => ProbeResult::Working {
            index,
            resolution: device.resolution().unwrap_or_default(),
        },
        None => ProbeResult::PresentUnreadable { index },
    }
}

/// Opened device that is released when it goes out of scope.
struct OpenDevice<'a, S: VideoSource> {
    source: &'a mut S,
    handle: Option<S::Handle>,
}

impl<'a, S: VideoSource> OpenDevice<'a, S> {
    fn read(&mut self) -> Option<S::Frame> {
        let handle = self.handle.as_mut()?;
        self.source.read(handle)
    }

    fn resolution(&self) -> Option<Resolution> {
        self.handle
            .as_ref()
            .map(|handle| self.source.resolution(handle))
    }
}

impl<'a, S: VideoSource> Drop for OpenDevice<'a, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.source.release(handle);
        }
    }
}
