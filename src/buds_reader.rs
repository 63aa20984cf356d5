//! The thread that turns the earbuds' byte stream into orientations.
//!
//! A [`BudsReader`] owns its transport. It asks the earbuds to start
//! streaming, then reads with a short timeout so that it notices the stop
//! signal promptly, feeds everything it reads through a
//! [`BudsFrameDecoder`] and pushes each decoded orientation into the
//! orientation channel. When it exits, for whatever reason, it closes the
//! transport and sets the stop signal so the rest of the session winds down
//! with it.

use crate::buds_message_decoder::{BudsFrameDecoder, ENABLE_SPATIAL_COMMAND};
use crate::diagnostics::{CountingSink, DiagnosticSink, LogSink};
use crate::lifecycle::StopSignal;
use crate::orientation_channel::OrientationProducer;
use crate::transport::{Transport, TransportError};

use log::{debug, error, info, warn};

use std::{
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

/// Bytes requested per read.
const READ_CHUNK: usize = 256;

/// Totals for one reader run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReaderSummary {
    /// Bytes read from the transport
    pub bytes: u64,
    /// Orientations decoded and pushed
    pub samples: u64,
    /// Frames rejected by validation
    pub rejected: u64,
    /// Times the decoder skipped bytes to find a frame marker
    pub resyncs: u64,
}

#[derive(Debug, Default)]
struct Counters {
    bytes: AtomicU64,
    samples: AtomicU64,
    rejected: AtomicU64,
    resyncs: AtomicU64,
}

/// Live counters of a running reader, readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct ReaderStats {
    counters: Arc<Counters>,
}

impl ReaderStats {
    /// The counters as they are right now.
    pub fn snapshot(&self) -> ReaderSummary {
        let c = &self.counters;
        ReaderSummary {
            bytes: c.bytes.load(Ordering::Relaxed),
            samples: c.samples.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            resyncs: c.resyncs.load(Ordering::Relaxed),
        }
    }

    fn publish(&self, summary: &ReaderSummary) {
        let c = &self.counters;
        c.bytes.store(summary.bytes, Ordering::Relaxed);
        c.samples.store(summary.samples, Ordering::Relaxed);
        c.rejected.store(summary.rejected, Ordering::Relaxed);
        c.resyncs.store(summary.resyncs, Ordering::Relaxed);
    }
}

/// Reads head-tracking frames from a transport until told to stop.
pub struct BudsReader<T, D = LogSink> {
    transport: T,
    producer: OrientationProducer,
    stop: StopSignal,
    sink: CountingSink<D>,
    decoder: BudsFrameDecoder,
    stats: ReaderStats,
}

impl<T, D> BudsReader<T, D>
where
    T: Transport,
    D: DiagnosticSink,
{
    /// A reader that will push into `producer` and report discarded bytes
    /// to `sink`.
    pub fn new(transport: T, producer: OrientationProducer, stop: StopSignal, sink: D) -> Self {
        Self {
            transport,
            producer,
            stop,
            sink: CountingSink::new(sink),
            decoder: BudsFrameDecoder::new(),
            stats: ReaderStats::default(),
        }
    }

    /// A handle onto this reader's counters.
    pub fn stats(&self) -> ReaderStats {
        self.stats.clone()
    }

    /// Runs until the stop signal is set or the transport fails. The
    /// transport is closed and the stop signal set on the way out.
    pub fn run(mut self) -> Result<ReaderSummary, TransportError> {
        info!("Reading head tracking from {}", self.transport.describe());
        // No acknowledgement comes back, so a failed send only shows up as
        // silence from the earbuds.
        match self.transport.write_all(&ENABLE_SPATIAL_COMMAND) {
            Ok(()) => debug!("Sent spatial data enable command"),
            Err(e) => warn!("Failed to send spatial data enable command: {}", e),
        }

        let result = self.read_until_stopped();

        self.transport.close();
        self.stop.signal_stop();

        let summary = self.stats.snapshot();
        info!(
            "Reader exiting: {} bytes, {} samples, {} rejected frames, {} resyncs",
            summary.bytes, summary.samples, summary.rejected, summary.resyncs
        );
        result.map(|()| summary)
    }

    fn read_until_stopped(&mut self) -> Result<(), TransportError> {
        let mut buf = [0u8; READ_CHUNK];
        let mut summary = ReaderSummary::default();

        while !self.stop.is_stopped() {
            let n = match self.transport.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => n,
                Err(e) => {
                    error!("Lost connection to {}: {}", self.transport.describe(), e);
                    return Err(e);
                }
            };

            summary.bytes += n as u64;
            self.decoder.extend(&buf[..n]);
            let producer = &self.producer;
            summary.samples += self
                .decoder
                .decode_available(&mut self.sink, |sample| producer.push(sample.orientation()))
                as u64;
            summary.rejected = self.sink.rejected_frames;
            summary.resyncs = self.sink.resyncs;
            self.stats.publish(&summary);
        }
        Ok(())
    }
}

impl<T, D> BudsReader<T, D>
where
    T: Transport + 'static,
    D: DiagnosticSink + Send + 'static,
{
    /// Runs the reader on its own thread.
    pub fn spawn(self) -> io::Result<JoinHandle<Result<ReaderSummary, TransportError>>> {
        thread::Builder::new()
            .name("buds-reader".to_owned())
            .spawn(move || self.run())
    }
}
