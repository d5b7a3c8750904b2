//! Frame throughput of the pipeline.
//!
//! The capture thread and the inferer count frame events into [`METER`]; a logger task turns the
//! counts into rates and resets them.
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

const LOG_PERIOD: Duration = Duration::from_secs(2);

/// Things that happen to a frame on its way through the pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameEvent {
    /// Read from the camera and broadcast on the raw stream.
    Captured,
    /// Not handed to the inferer because it was busy.
    Skipped,
    /// Annotated with detections and broadcast.
    Annotated,
}

impl FrameEvent {
    const COUNT: usize = 3;

    fn slot(self) -> usize {
        match self {
            FrameEvent::Captured => 0,
            FrameEvent::Skipped => 1,
            FrameEvent::Annotated => 2,
        }
    }
}

/// Event counters shared by the capture thread and the inferer.
pub struct Meter {
    counts: [AtomicU64; FrameEvent::COUNT],
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            counts: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    pub fn tick(&self, event: FrameEvent) {
        self.counts[event.slot()].fetch_add(1, Ordering::Relaxed);
    }

    /// Rates over the `elapsed` time since the previous call. Resets the counters.
    pub fn take_rates(&self, elapsed: Duration) -> FrameRates {
        let take = |event: FrameEvent| self.counts[event.slot()].swap(0, Ordering::Relaxed);
        FrameRates::new(
            take(FrameEvent::Captured),
            take(FrameEvent::Skipped),
            take(FrameEvent::Annotated),
            elapsed,
        )
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames per second of each [`FrameEvent`] over one period.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameRates {
    pub captured: f32,
    pub skipped: f32,
    pub annotated: f32,
}

impl FrameRates {
    fn new(captured: u64, skipped: u64, annotated: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f32();
        let per_second = |count: u64| if secs > 0.0 { count as f32 / secs } else { 0.0 };
        Self {
            captured: per_second(captured),
            skipped: per_second(skipped),
            annotated: per_second(annotated),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.captured == 0.0 && self.skipped == 0.0 && self.annotated == 0.0
    }

    /// Share of captured frames that never reached the inferer.
    pub fn skipped_share(&self) -> f32 {
        if self.captured > 0.0 {
            self.skipped / self.captured
        } else {
            0.0
        }
    }
}

impl fmt::Display for FrameRates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "captured {:.2} fps, annotated {:.2} fps, skipped {:.0}%",
            self.captured,
            self.annotated,
            self.skipped_share() * 100.0
        )
    }
}

/// Log the frame rates of [`METER`] every two seconds while frames are flowing.
pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(LOG_PERIOD);
        log_interval.tick().await;
        let mut last = Instant::now();

        loop {
            log_interval.tick().await;
            let now = Instant::now();
            let rates = METER.take_rates(now - last);
            last = now;

            if !rates.is_idle() {
                log::info!("{}", rates);
            }
        }
    })
}
