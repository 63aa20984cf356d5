//! A stand-in for a pair of earbuds, for running without hardware.
//!
//! [`DummyBuds`] behaves like the real link: it stays silent until it is
//! sent the enable command, then streams spatial frames of a head turning
//! steadily about the vertical axis, now and then with line noise mixed in.

use crate::buds_message_decoder::{encode_spatial_frame, DecodedSample, ENABLE_SPATIAL_COMMAND};
use crate::quaternion::Quaternion;
use crate::transport::{Transport, TransportError, READ_TIMEOUT};

use log::debug;
use rand::prelude::*;
use rand::rngs::StdRng;

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

/// Longest burst of garbage injected in front of a frame.
const MAX_NOISE_BURST: usize = 8;

/// A simulated earbud link. Build one with [`DummyBuds::builder`].
pub struct DummyBuds {
    rng: StdRng,
    period: Duration,
    rate_hz: f64,
    yaw_rate: f64,
    noise: f64,
    realtime: bool,
    max_frames: Option<u64>,
    enabled: bool,
    next_frame: Instant,
    frames_sent: u64,
    pending: VecDeque<u8>,
}

impl DummyBuds {
    /// A builder with 50 frames per second, 20 degrees per second of yaw,
    /// no noise and real-time pacing.
    pub fn builder() -> DummyBudsBuilder {
        DummyBudsBuilder::default()
    }

    /// Number of frames generated so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// The orientation carried by frame number `n`.
    pub fn orientation_at(&self, n: u64) -> Quaternion {
        let t = n as f64 / self.rate_hz;
        Quaternion::from_axis_angle([0.0, 0.0, 1.0], (self.yaw_rate * t).to_radians())
    }

    fn queue_frame(&mut self) {
        if self.noise > 0.0 && self.rng.gen_bool(self.noise) {
            let burst = self.rng.gen_range(1..=MAX_NOISE_BURST);
            for _ in 0..burst {
                self.pending.push_back(self.rng.gen());
            }
        }

        let q = self.orientation_at(self.frames_sent);
        let frame = encode_spatial_frame(&DecodedSample {
            x: q.x as f32,
            y: q.y as f32,
            z: q.z as f32,
            w: q.w as f32,
        });
        self.pending.extend(frame);
        self.frames_sent += 1;
        self.next_frame += self.period;
    }
}

impl Transport for DummyBuds {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.enabled {
            if self.realtime {
                thread::sleep(READ_TIMEOUT);
            }
            return Ok(0);
        }

        if self.pending.is_empty() {
            if self.max_frames.is_some_and(|max| self.frames_sent >= max) {
                return Err(TransportError::Disconnected);
            }
            if self.realtime {
                let now = Instant::now();
                if now < self.next_frame {
                    let wait = self.next_frame - now;
                    if wait > READ_TIMEOUT {
                        thread::sleep(READ_TIMEOUT);
                        return Ok(0);
                    }
                    thread::sleep(wait);
                }
            }
            self.queue_frame();
        }

        let n = buf.len().min(self.pending.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if data == ENABLE_SPATIAL_COMMAND {
            if !self.enabled {
                self.enabled = true;
                self.next_frame = Instant::now();
            }
        } else {
            debug!("Dummy buds ignoring command {:02x?}", data);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("dummy buds ({} Hz)", self.rate_hz)
    }
}

/// Configures a [`DummyBuds`].
#[derive(Debug, Clone)]
pub struct DummyBudsBuilder {
    rate_hz: f64,
    yaw_rate: f64,
    noise: f64,
    seed: Option<u64>,
    realtime: bool,
    max_frames: Option<u64>,
}

impl Default for DummyBudsBuilder {
    fn default() -> Self {
        Self {
            rate_hz: 50.0,
            yaw_rate: 20.0,
            noise: 0.0,
            seed: None,
            realtime: true,
            max_frames: None,
        }
    }
}

impl DummyBudsBuilder {
    /// Frames per second.
    pub fn rate_hz(self, rate_hz: f64) -> Self {
        Self {
            rate_hz: rate_hz.max(0.1),
            ..self
        }
    }

    /// Head rotation speed about the vertical axis, in degrees per second.
    pub fn yaw_rate(self, yaw_rate: f64) -> Self {
        Self { yaw_rate, ..self }
    }

    /// Probability that a frame is preceded by a burst of random bytes.
    pub fn noise(self, noise: f64) -> Self {
        Self {
            noise: noise.clamp(0.0, 1.0),
            ..self
        }
    }

    /// Makes the noise reproducible.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..self
        }
    }

    /// With `false`, frames are produced as fast as they are read.
    pub fn realtime(self, realtime: bool) -> Self {
        Self { realtime, ..self }
    }

    /// Disconnect after this many frames.
    pub fn max_frames(self, max_frames: u64) -> Self {
        Self {
            max_frames: Some(max_frames),
            ..self
        }
    }

    /// Builds the link.
    pub fn build(self) -> DummyBuds {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        DummyBuds {
            rng,
            period: Duration::from_secs_f64(1.0 / self.rate_hz),
            rate_hz: self.rate_hz,
            yaw_rate: self.yaw_rate,
            noise: self.noise,
            realtime: self.realtime,
            max_frames: self.max_frames,
            enabled: false,
            next_frame: Instant::now(),
            frames_sent: 0,
            pending: VecDeque::new(),
        }
    }
}
