// Commandline argument parser using clap for SpatialBuds

use crate::config::{ConfigError, OutputConfig, PlayerConfig, SampleFormat, TransportConfig};

use clap::{Args, Parser};

use std::path::PathBuf;

/// Plays music that stays put while your head turns.
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct PlayerArgs {
    /// RON configuration file; command line options override it
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Output sample rate, in Hz. Will often be 44100
    #[arg(short = 's', long = "samp")]
    pub samp_rate: Option<u32>,

    /// Frames rendered per audio callback
    #[arg(short = 'b', long = "block")]
    pub block_size: Option<u32>,

    /// Output channel count
    #[arg(long = "channels")]
    pub channels: Option<u16>,

    /// Output sample format
    #[arg(long = "format", value_enum)]
    pub sample_format: Option<SampleFormat>,

    // head tracking link
    #[command(flatten)]
    pub link: LinkArgs,

    /// HRIR set (RON); a synthetic head is used without one
    #[arg(long = "hrir")]
    pub hrir: Option<PathBuf>,

    /// WAV file to play
    #[arg(short = 'a', long = "audio")]
    pub audio: Option<PathBuf>,

    /// Write the output to this WAV file instead of the audio device
    #[arg(short = 'o', long = "out")]
    pub outfile: Option<PathBuf>,

    /// With --out, render as fast as possible instead of in real time
    #[arg(long = "fast", requires = "outfile")]
    pub fast: bool,

    /// Print the effective configuration and exit
    #[arg(long = "print-config")]
    pub print_config: bool,
}

/// Where head tracking data comes from.
#[derive(Debug, Args, Clone)]
pub struct LinkArgs {
    /// Serial device the earbuds are bound to, e.g. /dev/rfcomm0
    #[arg(short = 'd', long = "device", conflicts_with_all = ["tcp", "dummy"])]
    pub device: Option<PathBuf>,

    /// Serial line speed
    #[arg(long = "baud")]
    pub baud_rate: Option<u32>,

    /// Connect to a TCP bridge at host:port instead of a serial device
    #[arg(long = "tcp", conflicts_with = "dummy")]
    pub tcp: Option<String>,

    /// Simulate a pair of earbuds slowly turning the listener's head
    #[arg(long = "dummy")]
    pub dummy: bool,
}

impl LinkArgs {
    /// Overrides the transport in `config` with whatever was given.
    pub fn apply(&self, config: &mut PlayerConfig) {
        if self.dummy {
            config.transport = match config.transport {
                TransportConfig::Dummy { .. } => config.transport.clone(),
                _ => TransportConfig::Dummy {
                    rate_hz: 50.0,
                    yaw_rate: 20.0,
                    noise: 0.0,
                },
            };
        } else if let Some(address) = &self.tcp {
            config.transport = TransportConfig::Tcp {
                address: address.clone(),
            };
        } else if self.device.is_some() || self.baud_rate.is_some() {
            let (old_path, old_baud) = match &config.transport {
                TransportConfig::Serial { path, baud_rate } => (path.clone(), *baud_rate),
                _ => (PathBuf::new(), 115200),
            };
            config.transport = TransportConfig::Serial {
                path: self.device.clone().unwrap_or(old_path),
                baud_rate: self.baud_rate.unwrap_or(old_baud),
            };
        }
    }
}

/// Reads `config` (or starts from defaults) and applies the overrides.
pub fn load_config(config: &Option<PathBuf>) -> Result<PlayerConfig, ConfigError> {
    match config {
        Some(path) => PlayerConfig::from_path(path),
        None => Ok(PlayerConfig::default()),
    }
}

impl PlayerArgs {
    /// The configuration these arguments describe.
    pub fn player_config(&self) -> Result<PlayerConfig, ConfigError> {
        let mut config = load_config(&self.config)?;
        if let Some(rate) = self.samp_rate {
            config.stream.sample_rate = rate;
        }
        if let Some(block) = self.block_size {
            config.stream.block_size = block;
        }
        if let Some(channels) = self.channels {
            config.stream.channels = channels;
        }
        if let Some(format) = self.sample_format {
            config.stream.sample_format = format;
        }
        self.link.apply(&mut config);
        if let Some(hrir) = &self.hrir {
            config.hrir = Some(hrir.clone());
        }
        if let Some(audio) = &self.audio {
            config.audio = audio.clone();
        }
        if let Some(out) = &self.outfile {
            config.output = OutputConfig::Wav {
                path: out.clone(),
                realtime: !self.fast,
            };
        }
        config.validate()?;
        Ok(config)
    }
}

/// Shows what the earbuds report, without playing anything.
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct MonitorArgs {
    /// RON configuration file; only its transport is used
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    // head tracking link
    #[command(flatten)]
    pub link: LinkArgs,

    /// Log to stderr instead of drawing the live view
    #[arg(long = "headless")]
    pub headless: bool,
}

impl MonitorArgs {
    /// The configuration these arguments describe.
    pub fn player_config(&self) -> Result<PlayerConfig, ConfigError> {
        let mut config = load_config(&self.config)?;
        self.link.apply(&mut config);
        Ok(config)
    }
}
