//! Where the decoder and the reader report what they threw away.
//!
//! Nothing reported here is an error: malformed frames and desynchronized
//! bytes are recovered from on the spot. The events exist so that an
//! operator, or a test, can see how noisy the link is.

use crate::buds_message_decoder::FrameRejection;
use log::{debug, trace, warn};

/// Something the decoder discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    /// `skipped` bytes in front of a frame marker were dropped.
    Resync {
        /// How many bytes were skipped
        skipped: usize,
    },
    /// The whole buffer held no frame marker and was cleared.
    BufferDiscarded {
        /// How many bytes were dropped
        len: usize,
    },
    /// A frame started with the marker but carried a message id other than
    /// the spatial one.
    UnexpectedMessageId {
        /// The id that arrived
        id: u8,
    },
    /// A frame failed validation for another reason.
    Rejected(FrameRejection),
}

/// Receives [`DecoderEvent`]s.
pub trait DiagnosticSink {
    /// Records one event.
    fn report(&mut self, event: DecoderEvent);
}

/// Forwards events to the [`log`] facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&mut self, event: DecoderEvent) {
        match event {
            DecoderEvent::Resync { skipped } => {
                debug!("Skipping {} invalid byte(s) before frame marker", skipped)
            }
            DecoderEvent::BufferDiscarded { len } => {
                debug!("No frame marker in {} buffered byte(s), discarding", len)
            }
            DecoderEvent::UnexpectedMessageId { id } => {
                warn!("Valid frame marker, but unexpected message id {:#04x}", id)
            }
            DecoderEvent::Rejected(reason) => trace!("Dropped frame: {}", reason),
        }
    }
}

impl DiagnosticSink for Vec<DecoderEvent> {
    fn report(&mut self, event: DecoderEvent) {
        self.push(event);
    }
}

/// Tallies events by kind, and optionally passes them on to another sink.
#[derive(Debug, Default, Clone)]
pub struct CountingSink<S = LogSink> {
    /// Number of resync events
    pub resyncs: u64,
    /// Bytes dropped by resyncs and discarded buffers
    pub skipped_bytes: u64,
    /// Frames that failed validation, unexpected ids included
    pub rejected_frames: u64,
    inner: S,
}

impl<S: DiagnosticSink> CountingSink<S> {
    /// Wraps `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            resyncs: 0,
            skipped_bytes: 0,
            rejected_frames: 0,
            inner,
        }
    }
}

impl<S: DiagnosticSink> DiagnosticSink for CountingSink<S> {
    fn report(&mut self, event: DecoderEvent) {
        match &event {
            DecoderEvent::Resync { skipped } => {
                self.resyncs += 1;
                self.skipped_bytes += *skipped as u64;
            }
            DecoderEvent::BufferDiscarded { len } => self.skipped_bytes += *len as u64,
            DecoderEvent::UnexpectedMessageId { .. } | DecoderEvent::Rejected(_) => {
                self.rejected_frames += 1
            }
        }
        self.inner.report(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_sink_tallies_and_forwards() {
        let mut sink = CountingSink::new(Vec::new());
        sink.report(DecoderEvent::Resync { skipped: 3 });
        sink.report(DecoderEvent::BufferDiscarded { len: 30 });
        sink.report(DecoderEvent::UnexpectedMessageId { id: 0x11 });
        sink.report(DecoderEvent::Rejected(FrameRejection::BadPayloadLength(3)));

        assert_eq!(sink.resyncs, 1);
        assert_eq!(sink.skipped_bytes, 33);
        assert_eq!(sink.rejected_frames, 2);
        assert_eq!(sink.inner.len(), 4);
    }
}
