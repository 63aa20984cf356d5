//! Output devices: things that call back periodically for a block of
//! interleaved samples.
//!
//! [`WavFileDevice`] is always available and writes the stream to disk,
//! optionally paced like a sound card. With the `cpal` feature,
//! [`CpalDevice`] plays through the system's default output.

use crate::config::{SampleFormat, StreamConfig};
use crate::render_engine::CallbackFlow;

use hound::{WavSpec, WavWriter};
use log::{debug, error, info};

use std::{
    borrow::Cow,
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

/// What a device calls once per block, with a buffer of
/// `block_size * channels` interleaved samples to fill.
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) -> CallbackFlow + Send>;

/// Errors raised by output devices.
#[derive(Debug)]
pub enum DeviceError {
    /// Writing a WAV file failed.
    HoundError(hound::Error),
    /// There is no usable output device.
    NoDevice,
    /// The device refused the stream.
    Stream(String),
    /// This build cannot open the requested device.
    Unavailable(&'static str),
    /// The thread driving the stream panicked.
    Panicked,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use DeviceError as DE;
        let msg = match self {
            DE::HoundError(error) => Cow::from(format!("wav error: {}", error)),
            DE::NoDevice => Cow::from("no audio output device available"),
            DE::Stream(what) => Cow::from(format!("audio stream error: {}", what)),
            DE::Unavailable(what) => Cow::from(format!("{} is not available in this build", what)),
            DE::Panicked => Cow::from("output thread panicked"),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for DeviceError {}

impl From<hound::Error> for DeviceError {
    fn from(value: hound::Error) -> Self {
        Self::HoundError(value)
    }
}

/// Something that can run a stream of callbacks.
pub trait OutputDevice {
    /// Starts calling `callback` at the rate `config` describes.
    fn open(
        &mut self,
        config: &StreamConfig,
        callback: RenderCallback,
    ) -> Result<Box<dyn ActiveStream>, DeviceError>;
}

/// A running stream.
pub trait ActiveStream {
    /// False once the stream has stopped calling back on its own.
    fn is_active(&self) -> bool;

    /// Why the stream stopped, if it stopped because the device failed
    /// rather than because the callback completed.
    fn failure(&self) -> Option<String> {
        None
    }

    /// Stops the stream and releases the device.
    fn close(self: Box<Self>) -> Result<(), DeviceError>;
}

/// Liveness of a running stream, shared between the thread that calls back
/// and the one that drives it.
#[derive(Debug)]
pub struct StreamStatus {
    active: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl StreamStatus {
    /// A live stream's status.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(true),
            failure: Mutex::new(None),
        })
    }

    /// Whether the stream is still calling back.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The callback has nothing more to play.
    pub fn finish(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// The device failed underneath the stream. Only the first failure is
    /// kept.
    pub fn fail(&self, what: impl fmt::Display) {
        error!("Audio stream error: {}", what);
        if let Ok(mut failure) = self.failure.lock() {
            failure.get_or_insert_with(|| what.to_string());
        }
        self.finish();
    }

    /// The failure reported through [`StreamStatus::fail`], if any.
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|f| f.clone())
    }
}

/// Writes the stream to a WAV file.
#[derive(Debug, Clone)]
pub struct WavFileDevice {
    path: PathBuf,
    realtime: bool,
}

impl WavFileDevice {
    /// Writes to `path`. With `realtime`, callbacks are paced at the
    /// stream's block period; otherwise they run back to back.
    pub fn new(path: impl Into<PathBuf>, realtime: bool) -> Self {
        Self {
            path: path.into(),
            realtime,
        }
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

impl OutputDevice for WavFileDevice {
    fn open(
        &mut self,
        config: &StreamConfig,
        mut callback: RenderCallback,
    ) -> Result<Box<dyn ActiveStream>, DeviceError> {
        let spec = match config.sample_format {
            SampleFormat::F32 => WavSpec {
                channels: config.channels,
                sample_rate: config.sample_rate,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            },
            SampleFormat::I16 => WavSpec {
                channels: config.channels,
                sample_rate: config.sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            },
        };
        let mut writer = WavWriter::create(&self.path, spec)?;
        info!("Writing output to {}", self.path.display());

        let status = StreamStatus::new();
        let cancel = Arc::new(AtomicBool::new(false));
        let thread_status = status.clone();
        let thread_cancel = cancel.clone();
        let format = config.sample_format;
        let period = config.block_period();
        let realtime = self.realtime;
        let mut buffer = vec![0.0f32; config.block_size as usize * config.channels as usize];

        let handle = thread::Builder::new()
            .name("wav-output".to_owned())
            .spawn(move || {
                let mut deadline = Instant::now();
                let mut blocks = 0u64;
                let result = loop {
                    if thread_cancel.load(Ordering::Acquire) {
                        break Ok(());
                    }
                    if callback(&mut buffer) == CallbackFlow::Complete {
                        break Ok(());
                    }
                    let written: Result<(), hound::Error> = match format {
                        SampleFormat::F32 => buffer.iter().try_for_each(|&s| writer.write_sample(s)),
                        SampleFormat::I16 => buffer
                            .iter()
                            .try_for_each(|&s| writer.write_sample(to_i16(s))),
                    };
                    if let Err(e) = written {
                        break Err(e);
                    }
                    blocks += 1;
                    if realtime {
                        deadline += period;
                        let now = Instant::now();
                        if deadline > now {
                            spin_sleep::sleep(deadline - now);
                        }
                    }
                };
                match &result {
                    Ok(()) => thread_status.finish(),
                    Err(e) => thread_status.fail(e),
                }
                debug!("Output thread wrote {} blocks", blocks);
                // a failed write still leaves a readable header behind
                result.and(writer.finalize())
            })
            .map_err(|e| DeviceError::Stream(e.to_string()))?;

        Ok(Box::new(WavStream {
            handle,
            status,
            cancel,
        }))
    }
}

struct WavStream {
    handle: JoinHandle<Result<(), hound::Error>>,
    status: Arc<StreamStatus>,
    cancel: Arc<AtomicBool>,
}

impl ActiveStream for WavStream {
    fn is_active(&self) -> bool {
        self.status.is_active()
    }

    fn failure(&self) -> Option<String> {
        self.status.failure()
    }

    fn close(self: Box<Self>) -> Result<(), DeviceError> {
        self.cancel.store(true, Ordering::Release);
        match self.handle.join() {
            Ok(result) => Ok(result?),
            Err(_) => Err(DeviceError::Panicked),
        }
    }
}

/// Placeholder for builds without the `cpal` feature: opening it fails.
#[cfg(not(feature = "cpal"))]
#[derive(Debug, Default)]
pub struct CpalDevice;

#[cfg(not(feature = "cpal"))]
impl CpalDevice {
    /// Always fails; rebuild with `--features cpal`.
    pub fn default_output() -> Result<Self, DeviceError> {
        Err(DeviceError::Unavailable("audio device output"))
    }
}

#[cfg(not(feature = "cpal"))]
impl OutputDevice for CpalDevice {
    fn open(
        &mut self,
        _config: &StreamConfig,
        _callback: RenderCallback,
    ) -> Result<Box<dyn ActiveStream>, DeviceError> {
        Err(DeviceError::Unavailable("audio device output"))
    }
}

#[cfg(feature = "cpal")]
pub use self::cpal_device::CpalDevice;

#[cfg(feature = "cpal")]
mod cpal_device {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    /// The system's default audio output.
    pub struct CpalDevice {
        device: cpal::Device,
    }

    impl CpalDevice {
        /// Picks the default output device of the default host.
        pub fn default_output() -> Result<Self, DeviceError> {
            let host = cpal::default_host();
            let device = host.default_output_device().ok_or(DeviceError::NoDevice)?;
            if let Ok(name) = device.name() {
                info!("Using audio device {}", name);
            }
            Ok(Self { device })
        }
    }

    struct CpalStream {
        stream: cpal::Stream,
        status: Arc<StreamStatus>,
    }

    impl ActiveStream for CpalStream {
        fn is_active(&self) -> bool {
            self.status.is_active()
        }

        fn failure(&self) -> Option<String> {
            self.status.failure()
        }

        fn close(self: Box<Self>) -> Result<(), DeviceError> {
            self.stream
                .pause()
                .map_err(|e| DeviceError::Stream(e.to_string()))?;
            drop(self.stream);
            Ok(())
        }
    }

    impl OutputDevice for CpalDevice {
        fn open(
            &mut self,
            config: &StreamConfig,
            mut callback: RenderCallback,
        ) -> Result<Box<dyn ActiveStream>, DeviceError> {
            let stream_config = cpal::StreamConfig {
                channels: config.channels,
                sample_rate: cpal::SampleRate(config.sample_rate),
                buffer_size: cpal::BufferSize::Fixed(config.block_size),
            };
            let status = StreamStatus::new();
            let callback_status = status.clone();
            let error_status = status.clone();
            let on_error = move |err: cpal::StreamError| error_status.fail(err);
            let stream_error = |e: cpal::BuildStreamError| DeviceError::Stream(e.to_string());

            let stream = match config.sample_format {
                SampleFormat::F32 => self
                    .device
                    .build_output_stream(
                        &stream_config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            if !callback_status.is_active() {
                                data.fill(0.0);
                                return;
                            }
                            if callback(data) == CallbackFlow::Complete {
                                callback_status.finish();
                            }
                        },
                        on_error,
                        None,
                    )
                    .map_err(stream_error)?,
                SampleFormat::I16 => {
                    let mut scratch = vec![0.0f32; config.block_size as usize * config.channels as usize];
                    self.device
                        .build_output_stream(
                            &stream_config,
                            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                                if !callback_status.is_active() {
                                    data.fill(0);
                                    return;
                                }
                                scratch.resize(data.len(), 0.0);
                                if callback(&mut scratch) == CallbackFlow::Complete {
                                    callback_status.finish();
                                }
                                for (out, &s) in data.iter_mut().zip(&scratch) {
                                    *out = to_i16(s);
                                }
                            },
                            on_error,
                            None,
                        )
                        .map_err(stream_error)?
                }
            };

            stream
                .play()
                .map_err(|e| DeviceError::Stream(e.to_string()))?;
            debug!("Audio stream started");

            Ok(Box::new(CpalStream { stream, status }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;
    use std::time::Duration;

    fn counting_callback(blocks: usize) -> RenderCallback {
        let mut calls = 0;
        Box::new(move |buf: &mut [f32]| {
            if calls == blocks {
                buf.fill(0.0);
                return CallbackFlow::Complete;
            }
            calls += 1;
            buf.fill(0.5);
            CallbackFlow::Continue
        })
    }

    fn stream_config(format: SampleFormat) -> StreamConfig {
        StreamConfig {
            sample_rate: 8000,
            block_size: 16,
            channels: 2,
            sample_format: format,
        }
    }

    fn wait_inactive(stream: &dyn ActiveStream) {
        let started = Instant::now();
        while stream.is_active() {
            assert!(started.elapsed() < Duration::from_secs(5));
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn wav_device_writes_every_block_until_complete() {
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let mut device = WavFileDevice::new(tempfile.path(), false);
        let stream = device
            .open(&stream_config(SampleFormat::F32), counting_callback(3))
            .unwrap();
        wait_inactive(stream.as_ref());
        stream.close().unwrap();

        let mut reader = WavReader::open(tempfile.path()).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 8000);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 3 * 16 * 2);
        assert!(samples.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn wav_device_writes_i16() {
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let mut device = WavFileDevice::new(tempfile.path(), false);
        let stream = device
            .open(&stream_config(SampleFormat::I16), counting_callback(1))
            .unwrap();
        wait_inactive(stream.as_ref());
        stream.close().unwrap();

        let mut reader = WavReader::open(tempfile.path()).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![16383; 32]);
    }

    #[test]
    fn closing_a_paced_stream_stops_it_early() {
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let mut device = WavFileDevice::new(tempfile.path(), true);
        // 16 frames at 8 kHz is a 2 ms block, so this would take 20 s
        let stream = device
            .open(&stream_config(SampleFormat::F32), counting_callback(10_000))
            .unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(stream.is_active());
        stream.close().unwrap();

        let reader = WavReader::open(tempfile.path()).unwrap();
        assert!(reader.duration() > 0);
        assert!(reader.duration() < 10_000 * 16);
    }

    #[test]
    fn unwritable_path_fails_to_open() {
        let mut device = WavFileDevice::new("/nonexistent/dir/out.wav", false);
        assert!(matches!(
            device.open(&stream_config(SampleFormat::F32), counting_callback(1)),
            Err(DeviceError::HoundError(_))
        ));
    }

    #[test]
    fn stream_status_keeps_the_first_failure() {
        let status = StreamStatus::new();
        assert!(status.is_active());
        assert_eq!(status.failure(), None);

        let callback_side = status.clone();
        thread::spawn(move || {
            callback_side.fail("device unplugged");
            callback_side.fail("device still unplugged");
        })
        .join()
        .unwrap();

        assert!(!status.is_active());
        assert_eq!(status.failure().as_deref(), Some("device unplugged"));
    }

    #[test]
    fn finishing_is_not_a_failure() {
        let status = StreamStatus::new();
        status.finish();
        assert!(!status.is_active());
        assert_eq!(status.failure(), None);
    }

    #[test]
    fn clipping_to_i16() {
        assert_eq!(to_i16(2.0), 32767);
        assert_eq!(to_i16(-2.0), -32768);
        assert_eq!(to_i16(0.0), 0);
    }
}
