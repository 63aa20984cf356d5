//! Drives a render engine through an output device, from opening the
//! stream to closing it again.

use crate::audio_source::AudioSource;
use crate::config::StreamConfig;
use crate::device::{DeviceError, OutputDevice};
use crate::lifecycle::StopSignal;
use crate::render_engine::RenderEngine;
use crate::spatializer::Spatializer;

use log::{debug, info, warn};

use std::{thread, time::Duration};

/// Where the render loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Nothing opened yet.
    #[default]
    Idle,
    /// The device is calling back for audio.
    Streaming,
    /// The source ran out; the stream is being closed.
    Draining,
    /// Done. Terminal.
    Stopped,
}

/// What moves the render loop between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The device stream was opened.
    StreamStarted,
    /// The source has no more audio.
    EndOfStream,
    /// The device stream was closed.
    StreamClosed,
    /// The stop signal was observed.
    Stop,
}

impl PlaybackState {
    /// The state after `event`. Events that do not apply leave the state
    /// unchanged.
    pub fn next(self, event: PlaybackEvent) -> Self {
        use PlaybackEvent as PE;
        use PlaybackState as PS;
        match (self, event) {
            (_, PE::Stop) => PS::Stopped,
            (PS::Idle, PE::StreamStarted) => PS::Streaming,
            (PS::Streaming, PE::EndOfStream) => PS::Draining,
            (PS::Streaming | PS::Draining, PE::StreamClosed) => PS::Stopped,
            (state, _) => state,
        }
    }
}

/// Why playback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The whole source was played.
    EndOfStream,
    /// The stop signal was set.
    Stopped,
    /// The source failed part way through.
    SourceFailed,
}

/// What a finished [`Player::run`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackSummary {
    /// Why it ended
    pub reason: EndReason,
    /// Blocks handed to the device
    pub blocks: u64,
    /// Of those, blocks replaced with silence
    pub silenced: u64,
}

/// Runs one stream from start to finish.
#[derive(Debug)]
pub struct Player {
    stop: StopSignal,
    poll_interval: Duration,
    state: PlaybackState,
}

impl Player {
    /// A player that checks `stop` and the stream every `poll_interval`.
    pub fn new(stop: StopSignal, poll_interval: Duration) -> Self {
        Self {
            stop,
            poll_interval,
            state: PlaybackState::Idle,
        }
    }

    /// The current state.
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    fn advance(&mut self, event: PlaybackEvent) {
        let next = self.state.next(event);
        if next != self.state {
            debug!("Playback {:?} -> {:?} on {:?}", self.state, next, event);
        }
        self.state = next;
    }

    /// Opens a stream on `device` fed by `engine` and blocks until the
    /// source runs out or the stop signal is set. The stream is closed
    /// before returning, which also drops the engine and its source.
    pub fn run<S, P>(
        &mut self,
        device: &mut dyn OutputDevice,
        mut engine: RenderEngine<S, P>,
        config: &StreamConfig,
    ) -> Result<PlaybackSummary, DeviceError>
    where
        S: AudioSource + 'static,
        P: Spatializer + 'static,
    {
        let stats = engine.stats();
        if self.stop.is_stopped() {
            self.advance(PlaybackEvent::Stop);
            return Ok(PlaybackSummary {
                reason: EndReason::Stopped,
                blocks: 0,
                silenced: 0,
            });
        }

        engine.reserve(config.block_size as usize);
        let channels = config.channels as usize;
        let callback = Box::new(move |buf: &mut [f32]| engine.render_into(buf, channels));
        let stream = match device.open(config, callback) {
            Ok(stream) => stream,
            Err(e) => {
                self.advance(PlaybackEvent::Stop);
                return Err(e);
            }
        };
        self.advance(PlaybackEvent::StreamStarted);
        info!(
            "Streaming {} Hz, {} channels, {} frames per block",
            config.sample_rate, config.channels, config.block_size
        );

        let mut reason = EndReason::EndOfStream;
        let mut lost = None;
        while self.state == PlaybackState::Streaming {
            if self.stop.is_stopped() {
                reason = EndReason::Stopped;
                self.advance(PlaybackEvent::Stop);
            } else if !stream.is_active() {
                match stream.failure() {
                    Some(what) => {
                        warn!("Output device failed: {}", what);
                        lost = Some(DeviceError::Stream(what));
                        self.advance(PlaybackEvent::Stop);
                    }
                    None => self.advance(PlaybackEvent::EndOfStream),
                }
            } else {
                thread::sleep(self.poll_interval);
            }
        }

        let closed = stream.close();
        self.advance(PlaybackEvent::StreamClosed);
        closed?;
        if let Some(e) = lost {
            return Err(e);
        }

        if stats.source_failed() {
            warn!("Playback ended early: the audio source failed");
            reason = EndReason::SourceFailed;
        }
        let summary = PlaybackSummary {
            reason,
            blocks: stats.blocks_rendered(),
            silenced: stats.blocks_silenced(),
        };
        info!(
            "Playback finished ({:?}): {} blocks, {} silenced",
            summary.reason, summary.blocks, summary.silenced
        );
        Ok(summary)
    }
}
