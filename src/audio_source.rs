//! Where the music comes from.
//!
//! An [`AudioSource`] hands out interleaved `f32` frames in chunks. WAV
//! files are read with [hound](https://docs.rs/hound); [`MemorySource`]
//! serves samples already in memory.

use hound::{SampleFormat, WavReader};

use std::{borrow::Cow, fmt, fs::File, io::BufReader, path::Path};

/// Errors raised while opening or reading a source.
#[derive(Debug)]
pub enum SourceError {
    /// The file could not be opened or decoded.
    HoundError(hound::Error),
    /// The file declares a layout we cannot play.
    Unsupported(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            SourceError::HoundError(error) => Cow::from(format!("wav error: {}", error)),
            SourceError::Unsupported(what) => Cow::from(format!("unsupported audio: {}", what)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for SourceError {}

impl From<hound::Error> for SourceError {
    fn from(value: hound::Error) -> Self {
        Self::HoundError(value)
    }
}

/// A block of interleaved samples pulled from a source.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    samples: Vec<f32>,
    channels: usize,
}

impl Default for AudioChunk {
    fn default() -> Self {
        Self {
            samples: Vec::new(),
            channels: 1,
        }
    }
}

impl AudioChunk {
    /// An empty chunk with room for `frames` frames of `channels` channels.
    pub fn with_capacity(frames: usize, channels: usize) -> Self {
        Self {
            samples: Vec::with_capacity(frames * channels),
            channels: channels.max(1),
        }
    }

    /// Builds a chunk out of interleaved samples. A trailing partial frame
    /// is dropped.
    pub fn from_interleaved(mut samples: Vec<f32>, channels: usize) -> Self {
        let channels = channels.max(1);
        samples.truncate(samples.len() / channels * channels);
        Self { samples, channels }
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Channels per frame.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames held.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Empties the chunk and sets its channel count.
    pub fn reset(&mut self, channels: usize) {
        self.samples.clear();
        self.channels = channels.max(1);
    }

    /// Makes room for at least `samples` more interleaved samples.
    pub fn reserve(&mut self, samples: usize) {
        self.samples.reserve(samples);
    }

    /// Appends one interleaved sample.
    pub fn push(&mut self, sample: f32) {
        self.samples.push(sample);
    }

    /// Zero-pads the chunk up to `frames` frames. Never shortens it.
    pub fn pad_to(&mut self, frames: usize) {
        let len = frames * self.channels;
        if self.samples.len() < len {
            self.samples.resize(len, 0.0);
        }
    }

    /// Writes the per-frame mean across channels into `mono`.
    pub fn downmix_into(&self, mono: &mut Vec<f32>) {
        mono.clear();
        if self.channels == 1 {
            mono.extend_from_slice(&self.samples);
            return;
        }
        let scale = 1.0 / self.channels as f32;
        mono.extend(
            self.samples
                .chunks_exact(self.channels)
                .map(|frame| frame.iter().sum::<f32>() * scale),
        );
    }
}

/// Something that can be asked for the next `n` frames of audio.
pub trait AudioSource: Send {
    /// Channels per frame.
    fn channels(&self) -> usize;

    /// Frames per second.
    fn sample_rate(&self) -> u32;

    /// Replaces the contents of `chunk` with up to `frames` frames and
    /// returns how many were read. Fewer than `frames` means the source is
    /// exhausted; zero means it already was.
    fn read_frames(&mut self, frames: usize, chunk: &mut AudioChunk) -> Result<usize, SourceError>;
}

/// A WAV file on disk.
pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    channels: usize,
    sample_rate: u32,
    int_scale: f32,
}

impl WavSource {
    /// Opens the WAV file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(SourceError::Unsupported("zero channels".to_owned()));
        }
        let int_scale = match spec.sample_format {
            SampleFormat::Float => 1.0,
            SampleFormat::Int if (1..=32).contains(&spec.bits_per_sample) => {
                1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32
            }
            SampleFormat::Int => {
                return Err(SourceError::Unsupported(format!(
                    "{} bits per sample",
                    spec.bits_per_sample
                )))
            }
        };
        Ok(Self {
            channels: spec.channels as usize,
            sample_rate: spec.sample_rate,
            int_scale,
            reader,
        })
    }

    /// Length of the file in frames.
    pub fn total_frames(&self) -> usize {
        self.reader.duration() as usize
    }
}

impl AudioSource for WavSource {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frames(&mut self, frames: usize, chunk: &mut AudioChunk) -> Result<usize, SourceError> {
        chunk.reset(self.channels);
        let wanted = frames * self.channels;
        match self.reader.spec().sample_format {
            SampleFormat::Float => {
                for sample in self.reader.samples::<f32>().take(wanted) {
                    chunk.push(sample?);
                }
            }
            SampleFormat::Int => {
                let scale = self.int_scale;
                for sample in self.reader.samples::<i32>().take(wanted) {
                    chunk.push(sample? as f32 * scale);
                }
            }
        }
        Ok(chunk.frames())
    }
}

/// Interleaved samples held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
    position: usize,
}

impl MemorySource {
    /// Serves `samples`, interleaved with `channels` channels.
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate,
            position: 0,
        }
    }
}

impl AudioSource for MemorySource {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frames(&mut self, frames: usize, chunk: &mut AudioChunk) -> Result<usize, SourceError> {
        chunk.reset(self.channels);
        let end = (self.position + frames * self.channels).min(self.samples.len());
        let end = self.position + (end - self.position) / self.channels * self.channels;
        for &sample in &self.samples[self.position..end] {
            chunk.push(sample);
        }
        self.position = end;
        Ok(chunk.frames())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    #[test]
    fn pad_and_downmix() {
        let mut chunk = AudioChunk::from_interleaved(vec![1.0, 3.0, -1.0, 1.0], 2);
        assert_eq!(chunk.frames(), 2);
        chunk.pad_to(4);
        assert_eq!(chunk.frames(), 4);
        chunk.pad_to(1);
        assert_eq!(chunk.frames(), 4);

        let mut mono = Vec::new();
        chunk.downmix_into(&mut mono);
        assert_eq!(mono, vec![2.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn partial_frames_are_dropped() {
        let chunk = AudioChunk::from_interleaved(vec![1.0, 2.0, 3.0], 2);
        assert_eq!(chunk.samples(), &[1.0, 2.0]);
    }

    #[test]
    fn memory_source_runs_out() {
        let mut source = MemorySource::new((0..10).map(|i| i as f32).collect(), 2, 44100);
        let mut chunk = AudioChunk::default();

        assert_eq!(source.read_frames(3, &mut chunk).unwrap(), 3);
        assert_eq!(chunk.samples(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(source.read_frames(3, &mut chunk).unwrap(), 2);
        assert_eq!(chunk.samples(), &[6.0, 7.0, 8.0, 9.0]);
        assert_eq!(source.read_frames(3, &mut chunk).unwrap(), 0);
        assert!(chunk.samples().is_empty());
    }

    #[test]
    fn wav_int_samples_are_scaled() {
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let path = tempfile.path();
        let spec = WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for s in [16384i16, -16384, 0, i16::MIN, 8192, 8192] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let mut source = WavSource::open(path).unwrap();
        assert_eq!(source.channels(), 2);
        assert_eq!(source.sample_rate(), 22050);
        assert_eq!(source.total_frames(), 3);

        let mut chunk = AudioChunk::default();
        assert_eq!(source.read_frames(2, &mut chunk).unwrap(), 2);
        assert_eq!(chunk.samples(), &[0.5, -0.5, 0.0, -1.0]);
        assert_eq!(source.read_frames(2, &mut chunk).unwrap(), 1);
        assert_eq!(chunk.samples(), &[0.25, 0.25]);
        assert_eq!(source.read_frames(2, &mut chunk).unwrap(), 0);
    }

    #[test]
    fn wav_float_samples_pass_through() {
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let path = tempfile.path();
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for s in [0.1f32, -0.7, 0.3] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let mut source = WavSource::open(path).unwrap();
        let mut chunk = AudioChunk::default();
        assert_eq!(source.read_frames(8, &mut chunk).unwrap(), 3);
        assert_eq!(chunk.samples(), &[0.1, -0.7, 0.3]);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            WavSource::open("/nonexistent/music.wav"),
            Err(SourceError::HoundError(_))
        ));
    }
}
