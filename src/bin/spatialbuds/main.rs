//! Plays a WAV file binaurally, steered by the head tracker in a pair of
//! earbuds.

use clap::Parser;
use log::{error, info, warn};
use spatialbuds::{
    args::PlayerArgs,
    gui::resolve_serial_device,
    session::{Session, SessionError},
};
use std::process::ExitCode;

// Example:
// RUST_LOG=info cargo run --bin spatialbuds --
//                            --device  /dev/rfcomm0
//                            --audio   song.wav
//                            --out     out.wav

fn main() -> ExitCode {
    env_logger::init();
    let args = PlayerArgs::parse();

    let mut config = match args.player_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    if args.print_config {
        return match config.to_ron() {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    match resolve_serial_device(&mut config.transport) {
        Ok(true) => {}
        Ok(false) => {
            info!("No device selected");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!("Could not pick a serial device: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let session = match Session::start(config) {
        Ok(session) => session,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // Ctrl+C only sets the stop signal; the session shuts itself down
    if let Err(e) = session.stop_signal().set_on_interrupt() {
        warn!("Could not install the Ctrl+C handler: {}", e);
    }

    match session.run() {
        Ok(report) => {
            info!(
                "Played {} blocks ({} silenced), {} head tracking samples",
                report.playback.blocks, report.playback.silenced, report.reader.samples
            );
            if let Some(e) = report.reader_error {
                warn!("Head tracking ended early: {}", e);
            }
            ExitCode::SUCCESS
        }
        Err(SessionError::Interrupted) => {
            info!("Interrupted before playback began");
            ExitCode::from(130)
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
