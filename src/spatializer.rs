//! Binaural rendering: head-related impulse responses and how they are
//! applied to a mono signal.
//!
//! [`Spatializer`] is the seam the render engine talks to. [`HrirSet`] is
//! the implementation we ship: a table of measured (or synthesized) left
//! and right ear impulse responses, each tagged with the direction it was
//! measured from. HRIR sets are stored with [ron]:
//!
//! ```text
//! (
//!     sample_rate: 44100,
//!     measurements: [
//!         (azimuth: 0.0, elevation: 0.0, left: [1.0, 0.0, ...], right: [1.0, 0.0, ...]),
//!         ...
//!     ],
//! )
//! ```
//!
//! Angles are in degrees; azimuth grows counter-clockwise (towards the left
//! ear) from straight ahead and elevation grows upwards.

use serde::{Deserialize, Serialize};

use std::{
    borrow::Cow,
    fmt,
    fs::File,
    io::{BufReader, Read, Write},
    path::Path,
};

/// How many measurements are blended when a direction falls between them.
const NEIGHBOURS: usize = 3;

/// Directions closer than this (radians) to a measurement use it verbatim.
const EXACT_MATCH: f64 = 1e-6;

/// Why a block could not be spatialized. The render engine answers all of
/// these with a block of silence.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderFault {
    /// The requested direction was not a pair of finite angles.
    InvalidDirection {
        /// Requested azimuth
        azimuth: f64,
        /// Requested elevation
        elevation: f64,
    },
    /// The spatializer has nothing to interpolate from.
    NoMeasurements,
    /// The spatializer produced no channels, or more than two.
    BadChannelCount(usize),
    /// Anything else a spatializer implementation wants to report.
    Other(String),
}

impl fmt::Display for RenderFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use RenderFault as RF;
        let msg = match self {
            RF::InvalidDirection { azimuth, elevation } => Cow::from(format!(
                "invalid direction (azimuth {}, elevation {})",
                azimuth, elevation
            )),
            RF::NoMeasurements => Cow::from("no impulse responses to interpolate"),
            RF::BadChannelCount(n) => Cow::from(format!("spatializer returned {} channels", n)),
            RF::Other(msg) => Cow::from(msg.as_str()),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for RenderFault {}

/// The binaural-rendering collaborator of the render engine.
///
/// Both calls run on the audio thread once per block, so they write into
/// storage the caller owns and keeps between blocks. Once that storage has
/// grown to fit a block, neither call should allocate.
pub trait Spatializer: Send {
    /// A filter matched to one direction.
    type Filter: Default + Send;

    /// Overwrites `filter` with the one for sound arriving from `azimuth`,
    /// `elevation` (degrees).
    fn interpolate(
        &self,
        azimuth: f64,
        elevation: f64,
        filter: &mut Self::Filter,
    ) -> Result<(), RenderFault>;

    /// Filters `mono` into `ears`, leaving one or two output channels
    /// there. Each channel may be longer than the input.
    fn apply(
        &self,
        filter: &Self::Filter,
        mono: &[f32],
        ears: &mut Vec<Vec<f32>>,
    ) -> Result<(), RenderFault>;

    /// The sample rate the filters were made for.
    fn sample_rate(&self) -> u32;
}

/// A pair of ear filters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImpulseResponse {
    /// Left ear taps
    pub left: Vec<f32>,
    /// Right ear taps
    pub right: Vec<f32>,
}

/// One measured direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrirMeasurement {
    /// Azimuth in degrees
    pub azimuth: f64,
    /// Elevation in degrees
    pub elevation: f64,
    /// Left ear taps
    pub left: Vec<f32>,
    /// Right ear taps
    pub right: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HrirFile {
    sample_rate: u32,
    measurements: Vec<HrirMeasurement>,
}

/// Errors raised while loading or saving an [`HrirSet`].
#[derive(Debug)]
pub enum HrirError {
    /// Reading or writing the file failed.
    IoError(std::io::Error),
    /// Serializing the set failed.
    RonError(ron::Error),
    /// The file is not a valid HRIR set.
    RonSpannedError(ron::de::SpannedError),
    /// The set holds no measurements.
    Empty,
    /// A measurement's filters differ in length from the first one's.
    MismatchedLength {
        /// Index of the offending measurement
        index: usize,
        /// Length of every other filter
        expected: usize,
        /// Length found
        found: usize,
    },
}

impl fmt::Display for HrirError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use HrirError as HE;
        let msg = match self {
            HE::IoError(error) => Cow::from(format!("io error: {}", error)),
            HE::RonError(error) => Cow::from(format!("ron error: {}", error)),
            HE::RonSpannedError(error) => Cow::from(format!("ron spanning error: {}", error)),
            HE::Empty => Cow::from("HRIR set has no measurements"),
            HE::MismatchedLength {
                index,
                expected,
                found,
            } => Cow::from(format!(
                "measurement {} has {} taps, expected {}",
                index, found, expected
            )),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for HrirError {}

/// A table of head-related impulse responses.
#[derive(Debug, Clone)]
pub struct HrirSet {
    sample_rate: u32,
    measurements: Vec<HrirMeasurement>,
    directions: Vec<[f64; 3]>,
    taps: usize,
}

fn unit_vector(azimuth: f64, elevation: f64) -> [f64; 3] {
    let (az, el) = (azimuth.to_radians(), elevation.to_radians());
    [el.cos() * az.cos(), el.cos() * az.sin(), el.sin()]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Full linear convolution of `signal` with `taps`, written over `out`.
fn convolve_into(signal: &[f32], taps: &[f32], out: &mut Vec<f32>) {
    out.clear();
    if signal.is_empty() || taps.is_empty() {
        return;
    }
    out.resize(signal.len() + taps.len() - 1, 0.0);
    for (i, &s) in signal.iter().enumerate() {
        if s == 0.0 {
            continue;
        }
        for (o, &t) in out[i..i + taps.len()].iter_mut().zip(taps) {
            *o += s * t;
        }
    }
}

impl HrirSet {
    /// Validates `measurements` and builds a set.
    pub fn new(sample_rate: u32, measurements: Vec<HrirMeasurement>) -> Result<Self, HrirError> {
        let taps = measurements.first().ok_or(HrirError::Empty)?.left.len();
        for (index, m) in measurements.iter().enumerate() {
            for found in [m.left.len(), m.right.len()] {
                if found != taps {
                    return Err(HrirError::MismatchedLength {
                        index,
                        expected: taps,
                        found,
                    });
                }
            }
        }
        let directions = measurements
            .iter()
            .map(|m| unit_vector(m.azimuth, m.elevation))
            .collect();
        Ok(Self {
            sample_rate,
            measurements,
            directions,
            taps,
        })
    }

    /// Reads a set from the path provided.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, HrirError> {
        let handle = File::open(path).map_err(HrirError::IoError)?;
        Self::from_file(BufReader::new(handle))
    }

    /// Reads a set from the [Read]able object provided.
    pub fn from_file(file: impl Read) -> Result<Self, HrirError> {
        let parsed: HrirFile = ron::de::from_reader(file).map_err(HrirError::RonSpannedError)?;
        Self::new(parsed.sample_rate, parsed.measurements)
    }

    /// Writes the set out to the path provided.
    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), HrirError> {
        let mut handle = File::create(path).map_err(HrirError::IoError)?;
        self.to_file(&mut handle)
    }

    /// Writes the set out to the [Write]able object provided.
    pub fn to_file(&self, file: &mut impl Write) -> Result<(), HrirError> {
        let contents = HrirFile {
            sample_rate: self.sample_rate,
            measurements: self.measurements.clone(),
        };
        let text = ron::ser::to_string(&contents).map_err(HrirError::RonError)?;
        file.write_all(text.as_bytes()).map_err(HrirError::IoError)
    }

    /// A spherical-head model: each ear hears the source delayed by the
    /// Woodworth interaural time difference and attenuated by the head's
    /// shadow. Directions are sampled every `step` degrees.
    pub fn synthetic(sample_rate: u32, step: f64) -> Self {
        const HEAD_RADIUS: f64 = 0.0875;
        const SPEED_OF_SOUND: f64 = 343.0;
        const TAPS: usize = 64;

        let step = step.clamp(1.0, 90.0);
        let rate = sample_rate as f64;
        let mut measurements = Vec::new();

        let mut elevation = -40.0;
        while elevation <= 90.0 {
            let mut azimuth = -180.0;
            while azimuth < 180.0 {
                let [_, lateral, _] = unit_vector(azimuth, elevation);
                let theta = lateral.abs().asin();
                let itd = HEAD_RADIUS / SPEED_OF_SOUND * (theta + theta.sin()) * rate;
                let far_gain = 1.0 - 0.6 * lateral.abs();

                let near = Self::delayed_impulse(TAPS, 1.0, 1.0, 0.0);
                // the shadowed ear also loses some high end
                let far = Self::delayed_impulse(TAPS, 1.0 + itd, far_gain, 0.25 * lateral.abs());
                let (left, right) = if lateral >= 0.0 { (near, far) } else { (far, near) };

                measurements.push(HrirMeasurement {
                    azimuth,
                    elevation,
                    left,
                    right,
                });
                azimuth += step;
            }
            elevation += step;
        }

        let directions = measurements
            .iter()
            .map(|m| unit_vector(m.azimuth, m.elevation))
            .collect();
        Self {
            sample_rate,
            measurements,
            directions,
            taps: TAPS,
        }
    }

    /// An impulse of `gain` at fractional position `delay`, optionally
    /// smeared over its neighbours by `smear`.
    fn delayed_impulse(taps: usize, delay: f64, gain: f64, smear: f64) -> Vec<f32> {
        let mut ir = vec![0.0f32; taps];
        let delay = delay.clamp(0.0, (taps - 3) as f64);
        let idx = delay.floor() as usize;
        let frac = delay - idx as f64;
        let mut put = |i: usize, v: f64| {
            if let Some(tap) = ir.get_mut(i) {
                *tap += v as f32;
            }
        };
        for (offset, weight) in [(0, 1.0 - frac), (1, frac)] {
            let v = gain * weight;
            put(idx + offset, v * (1.0 - smear));
            put(idx + offset + 1, v * smear / 2.0);
            if idx + offset > 0 {
                put(idx + offset - 1, v * smear / 2.0);
            } else {
                put(idx + offset, v * smear / 2.0);
            }
        }
        ir
    }

    /// Number of measured directions.
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    /// Always false for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Taps per filter.
    pub fn taps(&self) -> usize {
        self.taps
    }
}

impl HrirSet {
    /// The `NEIGHBOURS` measurements closest to `target`, nearest first, as
    /// (angle, index). Slots past the end of a small set hold `None`.
    fn nearest(&self, target: [f64; 3]) -> [Option<(f64, usize)>; NEIGHBOURS] {
        // largest cosine first; a single pass with insertion into a tiny array
        let mut best: [Option<(f64, usize)>; NEIGHBOURS] = [None; NEIGHBOURS];
        for (index, direction) in self.directions.iter().enumerate() {
            let cos = dot(target, *direction);
            let Some(slot) = best
                .iter()
                .position(|b| b.map_or(true, |(c, _)| cos > c))
            else {
                continue;
            };
            best.copy_within(slot..NEIGHBOURS - 1, slot + 1);
            best[slot] = Some((cos, index));
        }
        best.map(|b| b.map(|(cos, index)| (cos.clamp(-1.0, 1.0).acos(), index)))
    }
}

impl Spatializer for HrirSet {
    type Filter = ImpulseResponse;

    fn interpolate(
        &self,
        azimuth: f64,
        elevation: f64,
        filter: &mut ImpulseResponse,
    ) -> Result<(), RenderFault> {
        if !azimuth.is_finite() || !elevation.is_finite() {
            return Err(RenderFault::InvalidDirection { azimuth, elevation });
        }
        let nearest = self.nearest(unit_vector(azimuth, elevation));
        let (closest_angle, closest) = nearest[0].ok_or(RenderFault::NoMeasurements)?;

        filter.left.clear();
        filter.right.clear();
        if closest_angle < EXACT_MATCH {
            let m = &self.measurements[closest];
            filter.left.extend_from_slice(&m.left);
            filter.right.extend_from_slice(&m.right);
            return Ok(());
        }

        filter.left.resize(self.taps, 0.0);
        filter.right.resize(self.taps, 0.0);
        let total: f64 = nearest.iter().flatten().map(|(angle, _)| 1.0 / angle).sum();
        for (angle, index) in nearest.iter().flatten() {
            let m = &self.measurements[*index];
            let w = (1.0 / angle / total) as f32;
            for (acc, tap) in filter.left.iter_mut().zip(&m.left) {
                *acc += w * tap;
            }
            for (acc, tap) in filter.right.iter_mut().zip(&m.right) {
                *acc += w * tap;
            }
        }
        Ok(())
    }

    fn apply(
        &self,
        filter: &ImpulseResponse,
        mono: &[f32],
        ears: &mut Vec<Vec<f32>>,
    ) -> Result<(), RenderFault> {
        ears.resize_with(2, Vec::new);
        convolve_into(mono, &filter.left, &mut ears[0]);
        convolve_into(mono, &filter.right, &mut ears[1]);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
