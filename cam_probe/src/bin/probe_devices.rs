//! List the capture devices that deliver frames.
//!
use std::{num::NonZeroUsize, time::Duration};

use cam_probe::{probe_devices, sensors::V4l2Source, Error, ProbeResult};
use clap::Parser;
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Stop probing after this many device indices in a row failed to open
    #[clap(long, default_value = "6")]
    max_consecutive_absent: NonZeroUsize,

    /// Fourcc pixel format to read test frames in
    #[clap(long, default_value = "MJPG")]
    format: String,

    /// Give up on a device that delivers no frame within this many milliseconds
    #[clap(long, default_value = "5000")]
    read_timeout_ms: u64,
}

fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let mut source = V4l2Source::new(&args.format)
        .with_read_timeout(Duration::from_millis(args.read_timeout_ms));
    let report = probe_devices(&mut source, args.max_consecutive_absent);

    println!("Available ports: {:?}", report.available_ports());
    println!("Working ports: {:?}", report.working_ports());
    println!("Non-working ports: {:?}", report.non_working_ports());

    for result in report.results() {
        match result {
            ProbeResult::Working { index, resolution } => println!(
                "Port {} is working and reads images ({} x {})",
                index, resolution.0, resolution.1
            ),
            ProbeResult::PresentUnreadable { index } => {
                println!("Port {} is present but does not read", index)
            }
            ProbeResult::Absent { .. } => (),
        }
    }

    Ok(())
}
