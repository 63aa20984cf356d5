//! Shows what the earbuds' head tracker reports, and where a source
//! straight ahead would be heard, without playing any audio.

use clap::Parser;
use log::{error, info, warn};
use spatialbuds::{
    args::MonitorArgs,
    buds_reader::BudsReader,
    diagnostics::LogSink,
    gui::{monitor_until_stop, resolve_serial_device, MonitorSnapshot},
    lifecycle::{join_with_timeout, JoinOutcome, StopSignal},
    orientation_channel::orientation_channel,
    sphericalizer::head_relative_direction,
    transport::open_transport,
};
use std::{process::ExitCode, time::Duration};

fn main() -> ExitCode {
    env_logger::init();
    let args = MonitorArgs::parse();

    let mut config = match args.player_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };
    match resolve_serial_device(&mut config.transport) {
        Ok(true) => {}
        Ok(false) => return ExitCode::SUCCESS,
        Err(e) => {
            error!("Could not pick a serial device: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let transport = match open_transport(&config.transport) {
        Ok(transport) => transport,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let link = transport.describe();

    let stop = StopSignal::new();
    if let Err(e) = stop.set_on_interrupt() {
        warn!("Could not install the Ctrl+C handler: {}", e);
    }
    let (producer, mut consumer) = orientation_channel(config.channel_capacity);
    let reader = BudsReader::new(transport, producer, stop.clone(), LogSink);
    let stats = reader.stats();
    let handle = match reader.spawn() {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start reader thread: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let source = config.source_direction;
    let mut snapshot = move || {
        let orientation = consumer.latest();
        MonitorSnapshot {
            link: link.clone(),
            orientation,
            direction: head_relative_direction(&orientation, source),
            reader: stats.snapshot(),
        }
    };

    if args.headless {
        while !stop.is_stopped() {
            stop.wait_until(Duration::from_secs(1), config.poll_interval(), || false);
            let s = snapshot();
            info!(
                "{}  azimuth {:+.1}  elevation {:+.1}  ({} samples, {} rejected)",
                s.orientation, s.direction.azimuth, s.direction.elevation, s.reader.samples, s.reader.rejected
            );
        }
    } else if let Err(e) = monitor_until_stop(&stop, snapshot) {
        error!("Monitor failed: {}", e);
    }

    stop.signal_stop();
    match join_with_timeout(handle, config.shutdown_timeout()) {
        JoinOutcome::Joined(Ok(summary)) => {
            info!("Read {} samples", summary.samples);
            ExitCode::SUCCESS
        }
        JoinOutcome::Joined(Err(e)) => {
            error!("Head tracking link failed: {}", e);
            ExitCode::FAILURE
        }
        JoinOutcome::Panicked => {
            error!("Reader thread panicked");
            ExitCode::FAILURE
        }
        JoinOutcome::TimedOut(_) => {
            warn!("Reader did not exit in time");
            ExitCode::FAILURE
        }
    }
}
