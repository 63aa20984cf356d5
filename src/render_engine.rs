//! The per-callback work of the audio path: read a block of music, find out
//! where the listener's head is pointing, and render the block binaurally
//! from the matching direction.
//!
//! Nothing in here blocks. The orientation comes from
//! [`OrientationConsumer::latest`], and every failure of the spatializer is
//! answered with a block of silence so that one bad block never stops
//! playback.

use crate::audio_source::{AudioChunk, AudioSource, SourceError};
use crate::orientation_channel::OrientationConsumer;
use crate::sphericalizer::{head_relative_direction, Direction};
use crate::spatializer::{RenderFault, Spatializer};

use log::{error, warn};

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

/// One rendered block: `frames * channels` interleaved samples.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedBlock {
    /// Interleaved output samples
    pub samples: Vec<f32>,
    /// Frames in the block
    pub frames: usize,
    /// Channels per frame
    pub channels: usize,
    /// The head-relative direction the block was rendered from, if it got
    /// that far
    pub direction: Option<Direction>,
    /// Set when a fault replaced the block with silence
    pub silenced: bool,
}

/// What one call to [`RenderEngine::render`] produced.
#[derive(Debug)]
pub enum RenderStep {
    /// A block to play; more may follow.
    Continue(RenderedBlock),
    /// The source is exhausted. Every later call says the same.
    EndOfStream,
    /// The source failed and cannot continue.
    Fatal(SourceError),
}

/// Whether the device should keep calling back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackFlow {
    /// Keep streaming.
    Continue,
    /// The buffer was filled with silence and there is nothing more to play.
    Complete,
}

#[derive(Debug, Default)]
struct StatsInner {
    rendered: AtomicU64,
    silenced: AtomicU64,
    azimuth: AtomicU64,
    elevation: AtomicU64,
    source_failed: AtomicBool,
}

/// Counters the render engine updates from the audio thread. Cheap to clone
/// and read from anywhere.
#[derive(Debug, Clone, Default)]
pub struct RenderStats {
    inner: Arc<StatsInner>,
}

impl RenderStats {
    /// Blocks rendered, including silenced ones.
    pub fn blocks_rendered(&self) -> u64 {
        self.inner.rendered.load(Ordering::Relaxed)
    }

    /// Blocks replaced with silence because of a render fault.
    pub fn blocks_silenced(&self) -> u64 {
        self.inner.silenced.load(Ordering::Relaxed)
    }

    /// The direction of the most recent block.
    pub fn last_direction(&self) -> Direction {
        Direction {
            azimuth: f64::from_bits(self.inner.azimuth.load(Ordering::Relaxed)),
            elevation: f64::from_bits(self.inner.elevation.load(Ordering::Relaxed)),
        }
    }

    /// Whether the source failed with an error rather than running out.
    pub fn source_failed(&self) -> bool {
        self.inner.source_failed.load(Ordering::Acquire)
    }

    fn record(&self, direction: Option<Direction>, silenced: bool) {
        self.inner.rendered.fetch_add(1, Ordering::Relaxed);
        if silenced {
            self.inner.silenced.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(d) = direction {
            self.inner.azimuth.store(d.azimuth.to_bits(), Ordering::Relaxed);
            self.inner
                .elevation
                .store(d.elevation.to_bits(), Ordering::Relaxed);
        }
    }
}

/// How far one pass of [`RenderEngine::process`] got.
enum Progress {
    Block {
        direction: Option<Direction>,
        silenced: bool,
    },
    EndOfStream,
    Fatal(SourceError),
}

/// Renders a source through a spatializer, steered by head orientation.
///
/// The engine owns every buffer the audio path needs. They grow to fit the
/// first block (or whatever [`RenderEngine::reserve`] asked for) and are
/// reused afterwards, so steady-state rendering does not allocate.
pub struct RenderEngine<S, P: Spatializer> {
    source: S,
    spatializer: P,
    orientation: OrientationConsumer,
    world_vector: [f64; 3],
    chunk: AudioChunk,
    mono: Vec<f32>,
    filter: P::Filter,
    ears: Vec<Vec<f32>>,
    finished: bool,
    faulting: bool,
    stats: RenderStats,
}

impl<S, P> RenderEngine<S, P>
where
    S: AudioSource,
    P: Spatializer,
{
    /// An engine that places `source` at `world_vector` (listener frame at
    /// rest, x ahead, y left, z up).
    pub fn new(
        source: S,
        spatializer: P,
        orientation: OrientationConsumer,
        world_vector: [f64; 3],
    ) -> Self {
        Self {
            chunk: AudioChunk::default(),
            source,
            spatializer,
            orientation,
            world_vector,
            mono: Vec::new(),
            filter: P::Filter::default(),
            ears: vec![Vec::new(), Vec::new()],
            finished: false,
            faulting: false,
            stats: RenderStats::default(),
        }
    }

    /// Grows the working buffers for blocks of `frames` frames ahead of
    /// time, so the first callback does not have to.
    pub fn reserve(&mut self, frames: usize) {
        self.chunk.reserve(frames * self.source.channels());
        self.mono.reserve(frames);
        for ear in &mut self.ears {
            ear.reserve(frames);
        }
    }

    /// A handle onto this engine's counters.
    pub fn stats(&self) -> RenderStats {
        self.stats.clone()
    }

    /// Whether the source has run out (or failed).
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Gives the source back, e.g. to release it at shutdown.
    pub fn into_source(self) -> S {
        self.source
    }

    /// Renders the next `frames` frames for a device with `channels`
    /// channels into a freshly allocated block. The device callback uses
    /// [`RenderEngine::render_into`] instead.
    pub fn render(&mut self, frames: usize, channels: usize) -> RenderStep {
        let channels = channels.max(1);
        let mut samples = vec![0.0; frames * channels];
        match self.process(&mut samples, channels) {
            Progress::Block {
                direction,
                silenced,
            } => RenderStep::Continue(RenderedBlock {
                samples,
                frames,
                channels,
                direction,
                silenced,
            }),
            Progress::EndOfStream => RenderStep::EndOfStream,
            Progress::Fatal(e) => RenderStep::Fatal(e),
        }
    }

    /// Fills `out`, exactly `frames * channels` interleaved samples.
    fn process(&mut self, out: &mut [f32], channels: usize) -> Progress {
        if self.finished {
            return Progress::EndOfStream;
        }
        let frames = out.len() / channels;
        let head = self.orientation.latest();

        match self.source.read_frames(frames, &mut self.chunk) {
            Ok(0) if frames > 0 => {
                self.finished = true;
                return Progress::EndOfStream;
            }
            Ok(_) => {}
            Err(e) => {
                self.finished = true;
                self.stats.inner.source_failed.store(true, Ordering::Release);
                return Progress::Fatal(e);
            }
        }
        self.chunk.pad_to(frames);

        let direction = head_relative_direction(&head, self.world_vector);
        let silenced = match self.spatialize(direction, out, channels) {
            Ok(()) => {
                self.faulting = false;
                false
            }
            Err(fault) => {
                if !self.faulting {
                    warn!("Rendering silence: {}", fault);
                    self.faulting = true;
                }
                out.fill(0.0);
                true
            }
        };

        let direction = direction.is_finite().then_some(direction);
        self.stats.record(direction, silenced);
        Progress::Block {
            direction,
            silenced,
        }
    }

    fn spatialize(
        &mut self,
        direction: Direction,
        out: &mut [f32],
        channels: usize,
    ) -> Result<(), RenderFault> {
        let frames = out.len() / channels;
        self.chunk.downmix_into(&mut self.mono);
        self.mono.truncate(frames);

        if !direction.is_finite() {
            return Err(RenderFault::InvalidDirection {
                azimuth: direction.azimuth,
                elevation: direction.elevation,
            });
        }

        self.spatializer
            .interpolate(direction.azimuth, direction.elevation, &mut self.filter)?;
        self.spatializer
            .apply(&self.filter, &self.mono, &mut self.ears)?;
        let (left, right) = match self.ears.as_slice() {
            [] => return Err(RenderFault::BadChannelCount(0)),
            [mono] => (mono, mono),
            [left, right] => (left, right),
            more => return Err(RenderFault::BadChannelCount(more.len())),
        };

        // shorter results are padded with silence, longer ones cut off
        for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
            let l = left.get(i).copied().unwrap_or(0.0);
            let r = right.get(i).copied().unwrap_or(0.0);
            if channels == 1 {
                frame[0] = (l + r) * 0.5;
            } else {
                frame[0] = l;
                frame[1] = r;
                frame[2..].fill(0.0);
            }
        }
        Ok(())
    }

    /// Fills a device buffer of interleaved `channels`-channel frames. Once
    /// the source is done the buffer is filled with silence and
    /// [`CallbackFlow::Complete`] is returned.
    pub fn render_into(&mut self, out: &mut [f32], channels: usize) -> CallbackFlow {
        let channels = channels.max(1);
        let whole = out.len() / channels * channels;
        let (head, tail) = out.split_at_mut(whole);
        tail.fill(0.0);
        match self.process(head, channels) {
            Progress::Block { .. } => CallbackFlow::Continue,
            Progress::EndOfStream => {
                head.fill(0.0);
                CallbackFlow::Complete
            }
            Progress::Fatal(e) => {
                error!("Audio source failed: {}", e);
                head.fill(0.0);
                CallbackFlow::Complete
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_source::MemorySource;
    use crate::orientation_channel::{orientation_channel, DEFAULT_CAPACITY};
    use crate::quaternion::Quaternion;
    use crate::sphericalizer::DEFAULT_SOURCE_VECTOR;
    use crate::spatializer::HrirSet;

    /// Returns whatever channels it was built with, ignoring direction.
    struct Canned(fn(&[f32]) -> Vec<Vec<f32>>);

    impl Spatializer for Canned {
        type Filter = ();

        fn interpolate(&self, _: f64, _: f64, _: &mut ()) -> Result<(), RenderFault> {
            Ok(())
        }

        fn apply(&self, _: &(), mono: &[f32], ears: &mut Vec<Vec<f32>>) -> Result<(), RenderFault> {
            *ears = (self.0)(mono);
            Ok(())
        }

        fn sample_rate(&self) -> u32 {
            44100
        }
    }

    struct Broken;

    impl Spatializer for Broken {
        type Filter = ();

        fn interpolate(&self, _: f64, _: f64, _: &mut ()) -> Result<(), RenderFault> {
            Err(RenderFault::Other("no data".to_owned()))
        }

        fn apply(&self, _: &(), _: &[f32], _: &mut Vec<Vec<f32>>) -> Result<(), RenderFault> {
            unreachable!()
        }

        fn sample_rate(&self) -> u32 {
            44100
        }
    }

    fn ramp(frames: usize, channels: usize) -> MemorySource {
        let samples = (0..frames * channels).map(|i| (i % 7) as f32 * 0.1).collect();
        MemorySource::new(samples, channels, 44100)
    }

    fn build<P: Spatializer>(
        source: MemorySource,
        spatializer: P,
    ) -> RenderEngine<MemorySource, P> {
        let (_producer, consumer) = orientation_channel(DEFAULT_CAPACITY);
        RenderEngine::new(source, spatializer, consumer, DEFAULT_SOURCE_VECTOR)
    }

    fn expect_block(step: RenderStep) -> RenderedBlock {
        match step {
            RenderStep::Continue(block) => block,
            other => panic!("expected a block, got {:?}", other),
        }
    }

    #[test]
    fn blocks_always_have_the_requested_shape() {
        for frames in [1, 17, 256, 1024] {
            for channels in [1, 2, 3, 6] {
                let source = ramp(frames * 2 + frames / 2 + 1, 2);
                let mut engine = build(source, HrirSet::synthetic(44100, 30.0));
                for _ in 0..3 {
                    let block = expect_block(engine.render(frames, channels));
                    assert_eq!(block.samples.len(), frames * channels);
                    assert_eq!(block.frames, frames);
                    assert_eq!(block.channels, channels);
                }
                assert!(matches!(engine.render(frames, channels), RenderStep::EndOfStream));
            }
        }
    }

    #[test]
    fn identity_orientation_renders_straight_ahead_until_the_end() {
        let (producer, consumer) = orientation_channel(DEFAULT_CAPACITY);
        let mut engine = RenderEngine::new(
            ramp(3 * 64, 1),
            HrirSet::synthetic(44100, 10.0),
            consumer,
            DEFAULT_SOURCE_VECTOR,
        );
        producer.push(Quaternion::IDENTITY);
        let stats = engine.stats();

        for _ in 0..3 {
            let block = expect_block(engine.render(64, 2));
            let d = block.direction.unwrap();
            assert!(d.azimuth.abs() < 1e-9);
            assert!(d.elevation.abs() < 1e-9);
            assert!(!block.silenced);
            // straight ahead, both ears get the same signal
            for frame in block.samples.chunks(2) {
                assert_eq!(frame[0], frame[1]);
            }
        }
        assert!(matches!(engine.render(64, 2), RenderStep::EndOfStream));
        assert!(matches!(engine.render(64, 2), RenderStep::EndOfStream));
        assert!(engine.is_finished());

        let mut out = vec![1.0; 128];
        assert_eq!(engine.render_into(&mut out, 2), CallbackFlow::Complete);
        assert!(out.iter().all(|&s| s == 0.0));

        assert_eq!(stats.blocks_rendered(), 3);
        assert_eq!(stats.blocks_silenced(), 0);
    }

    #[test]
    fn turning_the_head_moves_the_source() {
        let (producer, consumer) = orientation_channel(DEFAULT_CAPACITY);
        let mut engine = RenderEngine::new(
            ramp(1024, 1),
            HrirSet::synthetic(44100, 10.0),
            consumer,
            DEFAULT_SOURCE_VECTOR,
        );
        // looking 90 degrees to the left puts the source on the right
        producer.push(Quaternion::from_axis_angle(
            [0.0, 0.0, 1.0],
            std::f64::consts::FRAC_PI_2,
        ));
        let block = expect_block(engine.render(256, 2));
        assert!((block.direction.unwrap().azimuth + 90.0).abs() < 1e-6);

        let (left, right): (Vec<f32>, Vec<f32>) =
            block.samples.chunks(2).map(|f| (f[0], f[1])).unzip();
        let energy = |v: &[f32]| v.iter().map(|s| s * s).sum::<f32>();
        assert!(energy(&right) > energy(&left));
    }

    #[test]
    fn short_sources_are_padded_with_silence() {
        let mut engine = build(
            MemorySource::new(vec![1.0, 1.0, 1.0], 1, 44100),
            Canned(|mono| vec![mono.to_vec(), mono.to_vec()]),
        );
        let block = expect_block(engine.render(5, 2));
        assert_eq!(
            block.samples,
            vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]
        );
        assert!(matches!(engine.render(5, 2), RenderStep::EndOfStream));
    }

    #[test]
    fn spatializer_output_is_fitted_to_the_block() {
        let mut engine = build(
            ramp(100, 1),
            Canned(|mono| vec![mono[..2].to_vec(), vec![0.5; mono.len() * 3]]),
        );
        let block = expect_block(engine.render(4, 2));
        assert_eq!(block.samples.len(), 8);
        let right: Vec<f32> = block.samples.chunks(2).map(|f| f[1]).collect();
        assert_eq!(right, vec![0.5; 4]);
        let left: Vec<f32> = block.samples.chunks(2).map(|f| f[0]).collect();
        assert_eq!(&left[2..], &[0.0, 0.0]);
    }

    #[test]
    fn single_channel_results_are_duplicated() {
        let mut engine = build(
            MemorySource::new(vec![0.25, -0.5], 1, 44100),
            Canned(|mono| vec![mono.to_vec()]),
        );
        let block = expect_block(engine.render(2, 3));
        assert_eq!(block.samples, vec![0.25, 0.25, 0.0, -0.5, -0.5, 0.0]);
    }

    #[test]
    fn stereo_sources_are_downmixed_and_mono_devices_averaged() {
        let mut engine = build(
            MemorySource::new(vec![1.0, 0.0, 0.5, 0.5], 2, 44100),
            Canned(|mono| vec![mono.to_vec(), vec![0.0; mono.len()]]),
        );
        let block = expect_block(engine.render(2, 1));
        assert_eq!(block.samples, vec![0.25, 0.25]);
    }

    #[test]
    fn faults_become_silence_and_playback_continues() {
        let mut engine = build(ramp(30, 1), Broken);
        let stats = engine.stats();
        for _ in 0..3 {
            let block = expect_block(engine.render(10, 2));
            assert!(block.silenced);
            assert!(block.samples.iter().all(|&s| s == 0.0));
        }
        assert!(matches!(engine.render(10, 2), RenderStep::EndOfStream));
        assert_eq!(stats.blocks_silenced(), 3);

        let mut engine = build(ramp(30, 1), Canned(|_| Vec::new()));
        assert!(expect_block(engine.render(10, 2)).silenced);

        let mut engine = build(ramp(30, 1), Canned(|m| vec![m.to_vec(); 4]));
        assert!(expect_block(engine.render(10, 2)).silenced);
    }

    #[test]
    fn non_finite_orientation_renders_silence() {
        let (producer, consumer) = orientation_channel(DEFAULT_CAPACITY);
        let mut engine = RenderEngine::new(
            ramp(30, 1),
            Canned(|mono| vec![mono.to_vec(), mono.to_vec()]),
            consumer,
            DEFAULT_SOURCE_VECTOR,
        );
        producer.push(Quaternion::new(f64::NAN, 0.0, 0.0, 0.0));
        let block = expect_block(engine.render(10, 2));
        assert!(block.silenced);
        assert!(block.direction.is_none());
    }

    #[test]
    fn render_into_keeps_streaming_until_the_end() {
        let mut engine = build(ramp(10, 1), Canned(|m| vec![m.to_vec(), m.to_vec()]));
        let mut out = vec![9.0; 16];
        assert_eq!(engine.render_into(&mut out, 2), CallbackFlow::Continue);
        assert_eq!(engine.render_into(&mut out, 2), CallbackFlow::Continue);
        // frames 8 and 9 of 10, then padding
        assert!(out[4..].iter().all(|&s| s == 0.0));
        assert_eq!(engine.render_into(&mut out, 2), CallbackFlow::Complete);
    }

    #[test]
    fn steady_state_rendering_reuses_its_buffers() {
        let (producer, consumer) = orientation_channel(DEFAULT_CAPACITY);
        let mut engine = RenderEngine::new(
            ramp(256 * 12, 2),
            HrirSet::synthetic(44100, 5.0),
            consumer,
            DEFAULT_SOURCE_VECTOR,
        );
        engine.reserve(256);
        let mut out = vec![0.0; 256 * 2];

        producer.push(Quaternion::IDENTITY);
        assert_eq!(engine.render_into(&mut out, 2), CallbackFlow::Continue);
        let pointers = (
            engine.mono.as_ptr(),
            engine.filter.left.as_ptr(),
            engine.ears[0].as_ptr(),
            engine.ears[1].as_ptr(),
        );

        for step in 1..10 {
            producer.push(Quaternion::from_axis_angle([0.0, 0.0, 1.0], step as f64 * 0.3));
            assert_eq!(engine.render_into(&mut out, 2), CallbackFlow::Continue);
            assert_eq!(
                (
                    engine.mono.as_ptr(),
                    engine.filter.left.as_ptr(),
                    engine.ears[0].as_ptr(),
                    engine.ears[1].as_ptr(),
                ),
                pointers
            );
        }
        assert_eq!(engine.stats().blocks_silenced(), 0);
    }

    #[test]
    fn render_into_ignores_a_trailing_partial_frame() {
        let mut engine = build(ramp(10, 1), Canned(|m| vec![m.to_vec(), m.to_vec()]));
        let mut out = vec![9.0; 5];
        assert_eq!(engine.render_into(&mut out, 2), CallbackFlow::Continue);
        assert_eq!(out[4], 0.0);
        assert_eq!(out[0], out[1]);
    }

    #[test]
    fn source_rate_differing_from_the_hrir_set_still_renders() {
        let (producer, consumer) = orientation_channel(DEFAULT_CAPACITY);
        let samples = (0..4800).map(|i| ((i % 48) as f32 / 48.0) - 0.5).collect();
        let source = MemorySource::new(samples, 1, 48000);
        let set = HrirSet::synthetic(44100, 10.0);
        assert_ne!(source.sample_rate(), set.sample_rate());

        let mut engine = RenderEngine::new(source, set, consumer, DEFAULT_SOURCE_VECTOR);
        producer.push(Quaternion::from_axis_angle([0.0, 0.0, 1.0], 0.5));
        let mut out = vec![0.0; 480 * 2];
        for _ in 0..10 {
            assert_eq!(engine.render_into(&mut out, 2), CallbackFlow::Continue);
            assert!(out.iter().any(|&s| s != 0.0));
        }
        assert_eq!(engine.render_into(&mut out, 2), CallbackFlow::Complete);
        assert_eq!(engine.stats().blocks_rendered(), 10);
        assert_eq!(engine.stats().blocks_silenced(), 0);
    }
}
