//! Everything a session is configured with, fixed at process start.
//!
//! A [`PlayerConfig`] is read from a [ron] file in which every field may be
//! left out, then overridden from the command line (see [crate::args]). A
//! complete file looks like this:
//!
//! ```text
//! (
//!     stream: (sample_rate: 48000, block_size: 512, channels: 2, sample_format: f32),
//!     transport: Serial(path: "/dev/rfcomm0", baud_rate: 115200),
//!     hrir: Some("kemar.ron"),
//!     audio: "music.wav",
//!     output: Wav(path: "out.wav", realtime: false),
//!     startup_timeout_ms: 15000,
//!     shutdown_timeout_ms: 5000,
//!     poll_interval_ms: 100,
//!     channel_capacity: 10,
//!     source_direction: (1.0, 0.0, 0.0),
//! )
//! ```

use crate::orientation_channel::DEFAULT_CAPACITY;
use crate::sphericalizer::DEFAULT_SOURCE_VECTOR;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use std::{
    borrow::Cow,
    fmt,
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
    time::Duration,
};

/// Errors raised while reading or checking a configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    IoError(std::io::Error),
    /// The file is not valid RON for a [`PlayerConfig`].
    RonSpannedError(ron::de::SpannedError),
    /// Printing the configuration failed.
    RonError(ron::Error),
    /// A value is out of range.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ConfigError as CE;
        let msg = match self {
            CE::IoError(error) => Cow::from(format!("io error: {}", error)),
            CE::RonSpannedError(error) => Cow::from(format!("ron spanning error: {}", error)),
            CE::RonError(error) => Cow::from(format!("ron error: {}", error)),
            CE::Invalid(what) => Cow::from(format!("invalid configuration: {}", what)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}

/// The sample type handed to the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// 32-bit float
    #[default]
    F32,
    /// 16-bit signed integer
    I16,
}

/// The shape of the output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Frames per second
    pub sample_rate: u32,
    /// Frames per device callback
    pub block_size: u32,
    /// Output channels
    pub channels: u16,
    /// Output sample type
    pub sample_format: SampleFormat,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            block_size: 1024,
            channels: 2,
            sample_format: SampleFormat::F32,
        }
    }
}

impl StreamConfig {
    /// Wall-clock length of one block.
    pub fn block_period(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Where head-tracking bytes come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransportConfig {
    /// A serial device such as a bound RFCOMM channel. An empty path means
    /// "ask the user".
    Serial {
        /// Device path
        path: PathBuf,
        /// Line speed
        baud_rate: u32,
    },
    /// A TCP bridge at `host:port`.
    Tcp {
        /// Address to connect to
        address: String,
    },
    /// Simulated earbuds.
    Dummy {
        /// Frames per second
        rate_hz: f64,
        /// Head rotation, degrees per second
        yaw_rate: f64,
        /// Chance of line noise before each frame
        noise: f64,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Serial {
            path: PathBuf::new(),
            baud_rate: 115200,
        }
    }
}

/// Where rendered audio goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutputConfig {
    /// The system's default audio output.
    Device,
    /// A WAV file.
    Wav {
        /// File to write
        path: PathBuf,
        /// Pace callbacks like a real device would
        realtime: bool,
    },
}

impl Default for OutputConfig {
    #[cfg(feature = "cpal")]
    fn default() -> Self {
        OutputConfig::Device
    }

    #[cfg(not(feature = "cpal"))]
    fn default() -> Self {
        OutputConfig::Wav {
            path: PathBuf::from("spatialbuds.wav"),
            realtime: true,
        }
    }
}

/// A whole session's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Output stream shape
    pub stream: StreamConfig,
    /// Head-tracking link
    pub transport: TransportConfig,
    /// HRIR set to load; a synthetic one is used when absent
    pub hrir: Option<PathBuf>,
    /// The music to play
    pub audio: PathBuf,
    /// Output destination
    pub output: OutputConfig,
    /// How long to wait for the first orientation sample
    pub startup_timeout_ms: u64,
    /// How long to wait for the reader thread at shutdown
    pub shutdown_timeout_ms: u64,
    /// How often the driving loop checks for stop and end of stream
    pub poll_interval_ms: u64,
    /// Pending orientations kept before the oldest are dropped
    pub channel_capacity: usize,
    /// World-frame position of the virtual source
    pub source_direction: [f64; 3],
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            transport: TransportConfig::default(),
            hrir: None,
            audio: PathBuf::new(),
            output: OutputConfig::default(),
            startup_timeout_ms: 15_000,
            shutdown_timeout_ms: 5_000,
            poll_interval_ms: 100,
            channel_capacity: DEFAULT_CAPACITY,
            source_direction: DEFAULT_SOURCE_VECTOR,
        }
    }
}

impl PlayerConfig {
    /// Reads a configuration from the path provided.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let handle = File::open(path).map_err(ConfigError::IoError)?;
        Self::from_file(BufReader::new(handle))
    }

    /// Reads a configuration from the [Read]able object provided.
    pub fn from_file(file: impl Read) -> Result<Self, ConfigError> {
        ron::de::from_reader(file).map_err(ConfigError::RonSpannedError)
    }

    /// The configuration as pretty-printed RON.
    pub fn to_ron(&self) -> Result<String, ConfigError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(ConfigError::RonError)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |what: &str| Err(ConfigError::Invalid(what.to_owned()));
        if self.stream.sample_rate == 0 {
            return invalid("sample rate must be positive");
        }
        if self.stream.block_size == 0 {
            return invalid("block size must be positive");
        }
        if self.stream.channels == 0 {
            return invalid("channel count must be positive");
        }
        if self.poll_interval_ms == 0 {
            return invalid("poll interval must be positive");
        }
        let [x, y, z] = self.source_direction;
        if !(x.is_finite() && y.is_finite() && z.is_finite()) || x * x + y * y + z * z == 0.0 {
            return invalid("source direction must be a non-zero vector");
        }
        if let TransportConfig::Dummy { rate_hz, noise, .. } = self.transport {
            if rate_hz.is_nan() || rate_hz <= 0.0 {
                return invalid("dummy frame rate must be positive");
            }
            if !(0.0..=1.0).contains(&noise) {
                return invalid("dummy noise must be between 0 and 1");
            }
        }
        Ok(())
    }

    /// See [`PlayerConfig::startup_timeout_ms`].
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// See [`PlayerConfig::shutdown_timeout_ms`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// See [`PlayerConfig::poll_interval_ms`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
