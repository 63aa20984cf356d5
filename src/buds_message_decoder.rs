//! Decodes the earbuds' head-tracking frames out of a raw byte stream.
//!
//! Every spatial frame is exactly [`FRAME_LEN`] bytes, little-endian:
//!
//! ```text
//! [0xFE] [0x27] [len lo] [len hi] [0xA8] [x: f32] [y: f32] [z: f32] [w: f32] [crc lo] [crc hi]
//! ```
//!
//! where `len` is always 17 (sub-message id plus four floats) and the CRC
//! covers the 21 bytes before it. The link gives no guarantees about
//! message boundaries, so [`BudsFrameDecoder`] resynchronizes on the marker
//! byte and throws away anything it cannot use.

use crate::crc::crc16;
use crate::diagnostics::{DecoderEvent, DiagnosticSink};
use crate::quaternion::Quaternion;

use nom::{
    combinator::map,
    number::complete::{le_f32, le_u16, u8},
    sequence::tuple,
    IResult,
};

use std::borrow::Cow;
use std::fmt;

/// Total length of a spatial frame, in bytes.
pub const FRAME_LEN: usize = 23;
/// First byte of every frame sent by the earbuds.
pub const MARKER: u8 = 0xFE;
/// Message id of spatial frames.
pub const SPATIAL_MESSAGE_ID: u8 = 0x27;
/// Declared payload length of spatial frames: sub-message id plus four floats.
pub const SPATIAL_PAYLOAD_LEN: u16 = 17;
/// Sub-message id carried by head-tracking frames.
pub const SPATIAL_SUB_MESSAGE_ID: u8 = 0xA8;
/// First byte of every command sent to the earbuds.
pub const COMMAND_PREAMBLE: u8 = 0xAA;
/// Asks the earbuds to start streaming head-tracking frames.
pub const ENABLE_SPATIAL_COMMAND: [u8; 5] = [COMMAND_PREAMBLE, 0xA8, 0x01, 0x00, 0x01];

const CRC_OFFSET: usize = FRAME_LEN - 2;

/// One head orientation, exactly as the earbuds sent it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedSample {
    /// Quaternion i component
    pub x: f32,
    /// Quaternion j component
    pub y: f32,
    /// Quaternion k component
    pub z: f32,
    /// Quaternion scalar component
    pub w: f32,
}

impl DecodedSample {
    /// The sample as an orientation. The components are widened but never
    /// renormalized.
    pub fn orientation(&self) -> Quaternion {
        Quaternion::new(self.w as f64, self.x as f64, self.y as f64, self.z as f64)
    }
}

/// Why a 23-byte window did not yield a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRejection {
    /// The first byte was not [`MARKER`].
    BadMarker(u8),
    /// The message id was not [`SPATIAL_MESSAGE_ID`].
    UnexpectedMessageId(u8),
    /// The declared payload length was not [`SPATIAL_PAYLOAD_LEN`].
    BadPayloadLength(u16),
    /// The sub-message id was not [`SPATIAL_SUB_MESSAGE_ID`].
    BadSubMessageId(u8),
    /// The trailing checksum did not match the frame contents.
    ChecksumMismatch {
        /// Checksum computed over the frame
        expected: u16,
        /// Checksum carried by the frame
        actual: u16,
    },
}

impl fmt::Display for FrameRejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use FrameRejection as FR;
        let msg = match self {
            FR::BadMarker(b) => Cow::from(format!("bad marker {:#04x}", b)),
            FR::UnexpectedMessageId(id) => Cow::from(format!("unexpected message id {:#04x}", id)),
            FR::BadPayloadLength(len) => Cow::from(format!("bad payload length {}", len)),
            FR::BadSubMessageId(id) => Cow::from(format!("bad sub-message id {:#04x}", id)),
            FR::ChecksumMismatch { expected, actual } => Cow::from(format!(
                "checksum mismatch: expected {:#06x}, got {:#06x}",
                expected, actual
            )),
        };

        write!(f, "{}", msg)
    }
}

/// The fields of a frame, before any of them has been checked.
#[derive(Debug, Clone, Copy)]
struct RawFields {
    marker: u8,
    message_id: u8,
    payload_len: u16,
    sub_message_id: u8,
    x: f32,
    y: f32,
    z: f32,
    w: f32,
    crc: u16,
}

fn parse_raw_fields(input: &[u8]) -> IResult<&[u8], RawFields> {
    map(
        tuple((u8, u8, le_u16, u8, le_f32, le_f32, le_f32, le_f32, le_u16)),
        |(marker, message_id, payload_len, sub_message_id, x, y, z, w, crc)| RawFields {
            marker,
            message_id,
            payload_len,
            sub_message_id,
            x,
            y,
            z,
            w,
            crc,
        },
    )(input)
}

/// Validates one frame, checking marker, message id, payload length,
/// sub-message id and checksum in that order.
pub fn parse_frame(frame: &[u8; FRAME_LEN]) -> Result<DecodedSample, FrameRejection> {
    // A 23-byte array always holds every field, so the layout parse cannot
    // run out of input.
    let (_, fields) = parse_raw_fields(frame).map_err(|_| FrameRejection::BadMarker(frame[0]))?;

    if fields.marker != MARKER {
        return Err(FrameRejection::BadMarker(fields.marker));
    }
    if fields.message_id != SPATIAL_MESSAGE_ID {
        return Err(FrameRejection::UnexpectedMessageId(fields.message_id));
    }
    if fields.payload_len != SPATIAL_PAYLOAD_LEN {
        return Err(FrameRejection::BadPayloadLength(fields.payload_len));
    }
    if fields.sub_message_id != SPATIAL_SUB_MESSAGE_ID {
        return Err(FrameRejection::BadSubMessageId(fields.sub_message_id));
    }

    let expected = crc16(&frame[..CRC_OFFSET]);
    if fields.crc != expected {
        return Err(FrameRejection::ChecksumMismatch {
            expected,
            actual: fields.crc,
        });
    }

    Ok(DecodedSample {
        x: fields.x,
        y: fields.y,
        z: fields.z,
        w: fields.w,
    })
}

/// Encodes a spatial frame the way the earbuds do.
pub fn encode_spatial_frame(sample: &DecodedSample) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = MARKER;
    frame[1] = SPATIAL_MESSAGE_ID;
    frame[2..4].copy_from_slice(&SPATIAL_PAYLOAD_LEN.to_le_bytes());
    frame[4] = SPATIAL_SUB_MESSAGE_ID;
    for (i, component) in [sample.x, sample.y, sample.z, sample.w].iter().enumerate() {
        let start = 5 + i * 4;
        frame[start..start + 4].copy_from_slice(&component.to_le_bytes());
    }
    let crc = crc16(&frame[..CRC_OFFSET]);
    frame[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
    frame
}

/// Encodes a host-to-earbuds command: preamble, message id, little-endian
/// payload length, payload.
pub fn encode_command(message_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut command = Vec::with_capacity(4 + payload.len());
    command.push(COMMAND_PREAMBLE);
    command.push(message_id);
    command.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    command.extend_from_slice(payload);
    command
}

/// The outcome of one [`BudsFrameDecoder::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodeStep {
    /// Not enough buffered bytes for a frame; feed more data.
    Incomplete,
    /// A frame was consumed and produced a sample.
    Sample(DecodedSample),
    /// A frame was consumed and rejected.
    Rejected(FrameRejection),
}

/// Accumulates received bytes and carves frames out of them.
///
/// The buffer only grows at the tail, through [`extend`](Self::extend), and
/// only shrinks from the front, when bytes are skipped or a frame is
/// consumed. Consumed bytes are never scanned twice.
#[derive(Debug, Default)]
pub struct BudsFrameDecoder {
    buffer: Vec<u8>,
}

impl BudsFrameDecoder {
    /// An empty decoder.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(512),
        }
    }

    /// Appends freshly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes waiting to be decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Makes one decoding attempt.
    pub fn step(&mut self, sink: &mut dyn DiagnosticSink) -> DecodeStep {
        if self.buffer.len() < FRAME_LEN {
            return DecodeStep::Incomplete;
        }

        let Some(marker_idx) = self.buffer.iter().position(|&b| b == MARKER) else {
            sink.report(DecoderEvent::BufferDiscarded {
                len: self.buffer.len(),
            });
            self.buffer.clear();
            return DecodeStep::Incomplete;
        };

        if marker_idx > 0 {
            self.buffer.drain(..marker_idx);
            sink.report(DecoderEvent::Resync {
                skipped: marker_idx,
            });
            if self.buffer.len() < FRAME_LEN {
                return DecodeStep::Incomplete;
            }
        }

        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(&self.buffer[..FRAME_LEN]);
        self.buffer.drain(..FRAME_LEN);

        match parse_frame(&frame) {
            Ok(sample) => DecodeStep::Sample(sample),
            Err(reason) => {
                sink.report(match reason {
                    FrameRejection::UnexpectedMessageId(id) => {
                        DecoderEvent::UnexpectedMessageId { id }
                    }
                    other => DecoderEvent::Rejected(other),
                });
                DecodeStep::Rejected(reason)
            }
        }
    }

    /// Steps until the buffer holds no complete frame, handing every sample
    /// to `on_sample`. Returns the number of samples produced.
    pub fn decode_available<F>(&mut self, sink: &mut dyn DiagnosticSink, mut on_sample: F) -> usize
    where
        F: FnMut(DecodedSample),
    {
        let mut produced = 0;
        loop {
            match self.step(sink) {
                DecodeStep::Incomplete => return produced,
                DecodeStep::Sample(sample) => {
                    produced += 1;
                    on_sample(sample);
                }
                DecodeStep::Rejected(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: DecodedSample = DecodedSample {
        x: 0.125,
        y: -0.25,
        z: 0.5,
        w: 0.8185,
    };

    fn decode_all(bytes: &[u8]) -> (Vec<DecodedSample>, Vec<DecoderEvent>) {
        let mut decoder = BudsFrameDecoder::new();
        let mut events = Vec::new();
        let mut samples = Vec::new();
        decoder.extend(bytes);
        decoder.decode_available(&mut events, |s| samples.push(s));
        (samples, events)
    }

    #[test]
    fn well_formed_frame_round_trips_exactly() {
        let frame = encode_spatial_frame(&SAMPLE);
        assert_eq!(parse_frame(&frame), Ok(SAMPLE));
    }

    #[test]
    fn known_frame_layout() {
        let frame = encode_spatial_frame(&DecodedSample {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        });
        assert_eq!(&frame[..5], &[0xFE, 0x27, 0x11, 0x00, 0xA8]);
        assert_eq!(&frame[17..21], &1.0f32.to_le_bytes());
        let crc = crc16(&frame[..21]);
        assert_eq!(frame[21], (crc & 0xFF) as u8);
        assert_eq!(frame[22], (crc >> 8) as u8);
    }

    #[test]
    fn every_single_byte_corruption_is_rejected() {
        let frame = encode_spatial_frame(&SAMPLE);
        for idx in 0..FRAME_LEN {
            let mut corrupted = frame;
            corrupted[idx] ^= 0x5A;
            assert!(parse_frame(&corrupted).is_err(), "byte {idx} accepted");
        }
    }

    #[test]
    fn validation_order() {
        let mut frame = encode_spatial_frame(&SAMPLE);
        frame[1] = 0x61;
        frame[2] = 3;
        assert_eq!(
            parse_frame(&frame),
            Err(FrameRejection::UnexpectedMessageId(0x61))
        );

        let mut frame = encode_spatial_frame(&SAMPLE);
        frame[2] = 3;
        frame[4] = 0x00;
        assert_eq!(parse_frame(&frame), Err(FrameRejection::BadPayloadLength(3)));

        let mut frame = encode_spatial_frame(&SAMPLE);
        frame[4] = 0x00;
        assert_eq!(parse_frame(&frame), Err(FrameRejection::BadSubMessageId(0x00)));

        let mut frame = encode_spatial_frame(&SAMPLE);
        frame[0] = 0x00;
        assert_eq!(parse_frame(&frame), Err(FrameRejection::BadMarker(0x00)));
    }

    #[test]
    fn checksum_mismatch_reports_both_values() {
        let mut frame = encode_spatial_frame(&SAMPLE);
        frame[10] ^= 0x01;
        let expected = crc16(&frame[..21]);
        let actual = u16::from_le_bytes([frame[21], frame[22]]);
        assert_eq!(
            parse_frame(&frame),
            Err(FrameRejection::ChecksumMismatch { expected, actual })
        );
    }

    #[test]
    fn enable_command_encoding() {
        assert_eq!(encode_command(0xA8, &[0x01]), ENABLE_SPATIAL_COMMAND.to_vec());
    }

    #[test]
    fn waits_for_a_full_frame() {
        let frame = encode_spatial_frame(&SAMPLE);
        let mut decoder = BudsFrameDecoder::new();
        let mut events = Vec::new();

        decoder.extend(&frame[..10]);
        assert_eq!(decoder.step(&mut events), DecodeStep::Incomplete);
        assert_eq!(decoder.buffered(), 10);

        decoder.extend(&frame[10..]);
        assert_eq!(decoder.step(&mut events), DecodeStep::Sample(SAMPLE));
        assert_eq!(decoder.buffered(), 0);
        assert!(events.is_empty());
    }

    #[test]
    fn garbage_then_frame_resyncs_once() {
        let mut bytes = vec![0x00; 22];
        bytes.extend_from_slice(&encode_spatial_frame(&SAMPLE));

        let (samples, events) = decode_all(&bytes);

        assert_eq!(samples, vec![SAMPLE]);
        assert_eq!(events, vec![DecoderEvent::Resync { skipped: 22 }]);
    }

    #[test]
    fn garbage_is_consumed_without_rescanning() {
        let mut decoder = BudsFrameDecoder::new();
        let mut events = Vec::new();
        let mut bytes = vec![0x13; 7];
        bytes.extend_from_slice(&encode_spatial_frame(&SAMPLE));
        decoder.extend(&bytes);

        assert_eq!(decoder.step(&mut events), DecodeStep::Sample(SAMPLE));
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.step(&mut events), DecodeStep::Incomplete);
        assert_eq!(events, vec![DecoderEvent::Resync { skipped: 7 }]);
    }

    #[test]
    fn buffer_without_marker_is_discarded() {
        let (samples, events) = decode_all(&[0x42; 40]);
        assert!(samples.is_empty());
        assert_eq!(events, vec![DecoderEvent::BufferDiscarded { len: 40 }]);
    }

    #[test]
    fn short_buffer_without_marker_is_kept() {
        let mut decoder = BudsFrameDecoder::new();
        decoder.extend(&[0x42; 5]);
        assert_eq!(decoder.step(&mut Vec::new()), DecodeStep::Incomplete);
        assert_eq!(decoder.buffered(), 5);
    }

    #[test]
    fn rejected_frame_is_consumed_and_next_frame_decodes() {
        let mut bad = encode_spatial_frame(&SAMPLE);
        bad[21] ^= 0xFF;
        let mut bytes = bad.to_vec();
        bytes.extend_from_slice(&encode_spatial_frame(&SAMPLE));

        let mut decoder = BudsFrameDecoder::new();
        let mut events = Vec::new();
        decoder.extend(&bytes);

        assert!(matches!(
            decoder.step(&mut events),
            DecodeStep::Rejected(FrameRejection::ChecksumMismatch { .. })
        ));
        assert_eq!(decoder.buffered(), FRAME_LEN);
        assert_eq!(decoder.step(&mut events), DecodeStep::Sample(SAMPLE));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn unexpected_message_id_is_reported() {
        let mut frame = encode_spatial_frame(&SAMPLE);
        frame[1] = 0x61;
        let (samples, events) = decode_all(&frame);
        assert!(samples.is_empty());
        assert_eq!(events, vec![DecoderEvent::UnexpectedMessageId { id: 0x61 }]);
    }

    #[test]
    fn back_to_back_frames_split_across_reads() {
        let frames: Vec<u8> = (0..4)
            .flat_map(|i| {
                encode_spatial_frame(&DecodedSample {
                    x: i as f32,
                    ..SAMPLE
                })
            })
            .collect();

        let mut decoder = BudsFrameDecoder::new();
        let mut events = Vec::new();
        let mut samples = Vec::new();
        for chunk in frames.chunks(9) {
            decoder.extend(chunk);
            decoder.decode_available(&mut events, |s| samples.push(s.x));
        }

        assert_eq!(samples, vec![0.0, 1.0, 2.0, 3.0]);
        assert!(events.is_empty());
    }

    #[test]
    fn orientation_is_not_renormalized() {
        let sample = DecodedSample {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 2.0,
        };
        assert_eq!(sample.orientation(), Quaternion::new(2.0, 0.0, 0.0, 0.0));
    }
}
