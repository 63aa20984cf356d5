//! One run of the player, from loading assets to the last join.
//!
//! [`Session::start`] loads the HRIR set and the music, so that bad files
//! are reported before anything is opened. [`Session::run`] then connects
//! to the earbuds, waits for the first orientation, plays the music through
//! the configured output and shuts everything down again, whichever way
//! playback ended.

use crate::audio_source::{AudioSource, SourceError, WavSource};
use crate::buds_reader::{BudsReader, ReaderSummary};
use crate::config::{ConfigError, OutputConfig, PlayerConfig};
use crate::device::{CpalDevice, DeviceError, OutputDevice, WavFileDevice};
use crate::diagnostics::LogSink;
use crate::lifecycle::{join_with_timeout, JoinOutcome, StopSignal, WaitOutcome};
use crate::orientation_channel::{orientation_channel, OrientationConsumer};
use crate::playback::{PlaybackSummary, Player};
use crate::render_engine::RenderEngine;
use crate::spatializer::{HrirError, HrirSet, Spatializer};
use crate::transport::{open_transport, Transport, TransportError};

use log::{error, info, warn};

use std::{borrow::Cow, fmt, io, time::Duration};

/// Angular resolution of the synthetic HRIR set, in degrees.
const SYNTHETIC_HRIR_STEP: f64 = 5.0;

/// Errors that end a session.
#[derive(Debug)]
pub enum SessionError {
    /// The configuration is unusable.
    Config(ConfigError),
    /// The HRIR set could not be loaded.
    Hrir(HrirError),
    /// The music could not be opened.
    Source(SourceError),
    /// The earbuds could not be reached, or the link failed.
    Transport(TransportError),
    /// The output could not be opened or failed.
    Device(DeviceError),
    /// No orientation arrived within the startup timeout.
    NoData(Duration),
    /// The reader thread could not be started.
    Spawn(io::Error),
    /// The stop signal was set before playback began.
    Interrupted,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use SessionError as SE;
        let msg = match self {
            SE::Config(error) => Cow::from(format!("{}", error)),
            SE::Hrir(error) => Cow::from(format!("failed to load HRIR set: {}", error)),
            SE::Source(error) => Cow::from(format!("failed to open audio: {}", error)),
            SE::Transport(error) => Cow::from(format!("head tracking link: {}", error)),
            SE::Device(error) => Cow::from(format!("audio output: {}", error)),
            SE::NoData(timeout) => Cow::from(format!(
                "no head tracking data received within {:.1} s",
                timeout.as_secs_f64()
            )),
            SE::Spawn(error) => Cow::from(format!("failed to start reader thread: {}", error)),
            SE::Interrupted => Cow::from("stopped before playback began"),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for SessionError {}

impl From<ConfigError> for SessionError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<HrirError> for SessionError {
    fn from(value: HrirError) -> Self {
        Self::Hrir(value)
    }
}

impl From<SourceError> for SessionError {
    fn from(value: SourceError) -> Self {
        Self::Source(value)
    }
}

impl From<TransportError> for SessionError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

impl From<DeviceError> for SessionError {
    fn from(value: DeviceError) -> Self {
        Self::Device(value)
    }
}

/// How a completed session went.
#[derive(Debug)]
pub struct SessionReport {
    /// What playback did
    pub playback: PlaybackSummary,
    /// What the reader did, as of shutdown
    pub reader: ReaderSummary,
    /// The link failure that ended the reader, if one did
    pub reader_error: Option<TransportError>,
}

/// Opens the output `config` names.
pub fn open_output_device(config: &OutputConfig) -> Result<Box<dyn OutputDevice>, DeviceError> {
    let device: Box<dyn OutputDevice> = match config {
        OutputConfig::Device => Box::new(CpalDevice::default_output()?),
        OutputConfig::Wav { path, realtime } => Box::new(WavFileDevice::new(path, *realtime)),
    };
    Ok(device)
}

/// A configured session with its assets loaded.
pub struct Session {
    config: PlayerConfig,
    stop: StopSignal,
    spatializer: HrirSet,
    source: WavSource,
}

impl Session {
    /// Validates `config` and loads the HRIR set (a synthetic one when none
    /// is configured) and the music.
    pub fn start(config: PlayerConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let rate = config.stream.sample_rate;

        let spatializer = match &config.hrir {
            Some(path) => {
                let set = HrirSet::from_path(path)?;
                info!("Loaded {} HRIR measurements from {}", set.len(), path.display());
                set
            }
            None => {
                info!("No HRIR set configured, using a synthetic spherical head");
                HrirSet::synthetic(rate, SYNTHETIC_HRIR_STEP)
            }
        };
        if spatializer.sample_rate() != rate {
            warn!(
                "HRIR set is for {} Hz but the output runs at {} Hz",
                spatializer.sample_rate(),
                rate
            );
        }

        let source = WavSource::open(&config.audio)?;
        info!(
            "Opened {} ({} channels, {} Hz, {} frames)",
            config.audio.display(),
            source.channels(),
            source.sample_rate(),
            source.total_frames()
        );
        if source.sample_rate() != rate {
            warn!(
                "Audio is {} Hz but the output runs at {} Hz; it will play at the wrong speed",
                source.sample_rate(),
                rate
            );
        }

        Ok(Self {
            config,
            stop: StopSignal::new(),
            spatializer,
            source,
        })
    }

    /// The signal that ends this session. Setting it from anywhere winds
    /// everything down.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Connects to the configured transport and output and plays.
    pub fn run(self) -> Result<SessionReport, SessionError> {
        let transport = open_transport(&self.config.transport)?;
        let mut device = open_output_device(&self.config.output)?;
        self.run_with(transport, device.as_mut())
    }

    /// Plays using `transport` for head tracking and `device` for output.
    /// Whatever happens, the stop signal is set, the reader is joined (for
    /// at most the shutdown timeout) and the transport and music are
    /// released before this returns.
    pub fn run_with<T>(
        self,
        transport: T,
        device: &mut dyn OutputDevice,
    ) -> Result<SessionReport, SessionError>
    where
        T: Transport + 'static,
    {
        let Self {
            config,
            stop,
            spatializer,
            source,
        } = self;

        let (producer, consumer) = orientation_channel(config.channel_capacity);
        let reader = BudsReader::new(transport, producer, stop.clone(), LogSink);
        let reader_stats = reader.stats();
        let handle = reader.spawn().map_err(SessionError::Spawn)?;

        let played = play(&config, &stop, device, consumer, source, spatializer);

        stop.signal_stop();
        let reader_error = match join_with_timeout(handle, config.shutdown_timeout()) {
            JoinOutcome::Joined(Ok(_)) => None,
            JoinOutcome::Joined(Err(e)) => Some(e),
            JoinOutcome::Panicked => {
                error!("Reader thread panicked");
                None
            }
            JoinOutcome::TimedOut(_) => {
                warn!(
                    "Reader did not exit within {:?}, leaving it behind",
                    config.shutdown_timeout()
                );
                None
            }
        };

        match played {
            Ok(playback) => Ok(SessionReport {
                playback,
                reader: reader_stats.snapshot(),
                reader_error,
            }),
            // the reader stopping us is the more useful thing to report
            Err(SessionError::Interrupted) => match reader_error {
                Some(e) => Err(SessionError::Transport(e)),
                None => Err(SessionError::Interrupted),
            },
            Err(e) => Err(e),
        }
    }
}

fn play<S, P>(
    config: &PlayerConfig,
    stop: &StopSignal,
    device: &mut dyn OutputDevice,
    consumer: OrientationConsumer,
    source: S,
    spatializer: P,
) -> Result<PlaybackSummary, SessionError>
where
    S: AudioSource + 'static,
    P: Spatializer + 'static,
{
    let timeout = config.startup_timeout();
    info!("Waiting up to {:?} for head tracking data", timeout);
    match stop.wait_until(timeout, config.poll_interval(), || consumer.has_received()) {
        WaitOutcome::Ready => info!("Head tracking data is flowing"),
        WaitOutcome::TimedOut => return Err(SessionError::NoData(timeout)),
        WaitOutcome::Stopped => return Err(SessionError::Interrupted),
    }

    let engine = RenderEngine::new(source, spatializer, consumer, config.source_direction);
    let mut player = Player::new(stop.clone(), config.poll_interval());
    Ok(player.run(device, engine, &config.stream)?)
}
