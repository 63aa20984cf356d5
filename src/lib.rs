//! SpatialBuds plays music through a pair of head-tracking earbuds so that
//! the music seems to come from a fixed point in the room: turn your head
//! to the left and the sound moves to your right ear, as a real
//! loudspeaker would.
//!
//! The earbuds stream their orientation as small binary frames over a
//! Bluetooth serial link. The host side looks like this:
//!
//! ```text
//!  transport ──bytes──> buds_reader ──quaternions──> orientation_channel
//!  (serial / tcp)       (crc, decoder)                        │ latest
//!                                                             v
//!  audio_source ──frames──> render_engine ──blocks──> device (sound card / WAV)
//!                           (sphericalizer, spatializer)
//! ```
//!
//! The reader runs on its own thread and the render engine runs inside the
//! device's callback; the only things they share are the orientation
//! channel and the [stop signal](lifecycle::StopSignal). A
//! [`Session`](session::Session) wires everything together, and the
//! `spatialbuds` and `monitor` binaries put a command line on top.

#![warn(missing_docs)]
pub mod args;
pub mod audio_source;
pub mod buds_message_decoder;
pub mod buds_reader;
pub mod config;
pub mod crc;
pub mod device;
pub mod diagnostics;
pub mod dummy_buds;
pub mod gui;
pub mod lifecycle;
pub mod orientation_channel;
pub mod playback;
pub mod quaternion;
pub mod render_engine;
pub mod session;
pub mod spatializer;
pub mod sphericalizer;
pub mod transport;
