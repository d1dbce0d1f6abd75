// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Audio side of the compositor: source selection and clocking.
//!
//! Video leads, audio follows. Each tick the [AudioEngine] advances the
//! audio clock towards `video_pts × sample_rate / fps` in whole encoder
//! frames, never past it, picking the sample source from the current
//! [AudioMode]:
//!
//! - `Primary` plays the live feed out of a private jitter queue,
//! - `Grace` plays silence for a while after a primary drop, so a short
//!   hiccup does not blast unrelated fallback audio at the listener,
//! - `Fallback` plays the looping file.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use crate::{config::Config, handoff::HandoffBuffer};

/// Samples per encoded AAC frame.
pub const AUDIO_FRAME_SAMPLES: usize = 1024;

/// FIFO of interleaved float samples, counted in per-channel frames.
#[derive(Debug)]
pub struct SampleQueue {
    samples: VecDeque<f32>,
    channels: usize,
}

impl SampleQueue {
    pub fn new(channels: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            channels,
        }
    }

    pub fn push(&mut self, samples: &[f32]) {
        self.samples.extend(samples.iter().copied());
    }

    /// Queued length in per-channel sample frames.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Dequeue exactly `frames` frames, or nothing at all.
    pub fn take_exact(&mut self, frames: usize) -> Option<Vec<f32>> {
        let wanted = frames * self.channels;
        if self.samples.len() < wanted {
            return None;
        }
        Some(self.samples.drain(..wanted).collect())
    }

    /// Dequeue up to `frames` frames, zero-padding the tail.
    pub fn take_padded(&mut self, frames: usize) -> Vec<f32> {
        let wanted = frames * self.channels;
        let available = self.samples.len().min(wanted);
        let mut out: Vec<f32> = self.samples.drain(..available).collect();
        out.resize(wanted, 0.0);
        out
    }

    /// Drop the oldest samples until at most `max_frames` remain. Returns
    /// the number of dropped frames.
    pub fn trim_oldest_to(&mut self, max_frames: usize) -> usize {
        let max_samples = max_frames * self.channels;
        let excess = self.samples.len().saturating_sub(max_samples);
        self.samples.drain(..excess);
        excess / self.channels
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Which source feeds the output audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    Primary,
    /// Primary dropped at `since`; output is silence until the grace
    /// period elapses or the primary returns.
    Grace { since: Instant },
    Fallback,
}

/// Mode change of one tick, for event reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioTransition {
    PrimaryResumed,
    GraceEntered,
    FallbackEntered,
}

impl AudioMode {
    /// Advance the mode for one tick.
    pub fn advance(
        &mut self,
        primary_available: bool,
        now: Instant,
        grace_period: Duration,
    ) -> Option<AudioTransition> {
        match (*self, primary_available) {
            (AudioMode::Fallback, true) | (AudioMode::Grace { .. }, true) => {
                *self = AudioMode::Primary;
                Some(AudioTransition::PrimaryResumed)
            }
            (AudioMode::Primary, false) => {
                *self = AudioMode::Grace { since: now };
                Some(AudioTransition::GraceEntered)
            }
            (AudioMode::Grace { since }, false)
                if now.duration_since(since) > grace_period =>
            {
                *self = AudioMode::Fallback;
                Some(AudioTransition::FallbackEntered)
            }
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AudioMode::Primary => "primary",
            AudioMode::Grace { .. } => "grace",
            AudioMode::Fallback => "fallback",
        }
    }
}

/// One encoder-frame worth of samples with its output timestamp.
#[derive(Debug)]
pub struct AudioFrame {
    /// Timestamp in samples since start.
    pub pts: u64,
    pub samples: Vec<f32>,
}

/// Mode machine, both sample reservoirs and the audio clock.
#[derive(Debug)]
pub struct AudioEngine {
    mode: AudioMode,
    /// Private reservoir of primary audio, drained out of the shared
    /// queue each tick and trimmed to the jitter budget.
    primary: SampleQueue,
    /// Audio decoded alongside the fallback video.
    fallback: SampleQueue,
    /// Samples emitted since start.
    audio_pts: u64,
    sample_rate: u64,
    fps: u64,
    channels: usize,
    jitter_frames: usize,
    grace_period: Duration,
}

impl AudioEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            mode: AudioMode::Fallback,
            primary: SampleQueue::new(config.channels as usize),
            fallback: SampleQueue::new(config.channels as usize),
            audio_pts: 0,
            sample_rate: u64::from(config.sample_rate),
            fps: u64::from(config.fps),
            channels: config.channels as usize,
            jitter_frames: config.jitter_frames(),
            grace_period: config.grace_period,
        }
    }

    pub fn mode(&self) -> AudioMode {
        self.mode
    }

    pub fn audio_pts(&self) -> u64 {
        self.audio_pts
    }

    /// Advance the mode machine. Every switch into `Primary` and every
    /// grace entry starts the next fallback span with a fresh queue.
    pub fn on_tick(&mut self, primary_available: bool, now: Instant) -> Option<AudioTransition> {
        let transition = self.mode.advance(primary_available, now, self.grace_period);
        if matches!(
            transition,
            Some(AudioTransition::PrimaryResumed) | Some(AudioTransition::GraceEntered)
        ) {
            self.fallback.clear();
        }
        transition
    }

    /// Queue audio decoded alongside the fallback video. Outside of
    /// fallback spans the samples are dropped right away: every path back
    /// into `Fallback` starts with a cleared queue, so queueing them
    /// would only grow a buffer nothing ever plays.
    pub fn push_fallback(&mut self, samples: &[f32]) {
        if self.mode == AudioMode::Fallback {
            self.fallback.push(samples);
        }
    }

    /// Move everything out of the shared queue into the private one, then
    /// trim the private queue to the jitter budget, oldest first. Burst
    /// deliveries thus settle into a bounded delay instead of growing.
    pub fn absorb_primary(&mut self, handoff: &HandoffBuffer) {
        if self.mode != AudioMode::Primary {
            return;
        }
        let drained = handoff.drain_audio();
        self.primary.push(&drained);
        let dropped = self.primary.trim_oldest_to(self.jitter_frames);
        if dropped > 0 {
            debug!("trimmed {dropped} frames of primary audio over the jitter budget");
        }
    }

    /// Emit encoder frames until the audio clock saturates
    /// `video_pts × sample_rate / fps` without passing it.
    ///
    /// `Primary` emits full frames off the jitter queue. A partially
    /// filled frame is never zero-padded — that would put a click at the
    /// splice — the loop stops instead and catches up once the rest of
    /// the burst arrives. An entirely empty queue means the feed carries
    /// no audio right now, so whole frames of silence keep the cadence.
    /// `Grace` emits silence and flushes both primary queues so no stale
    /// audio leaks into a reconnect. `Fallback` pads its tail — the
    /// looping file has no continuity to preserve.
    pub fn emit_due(&mut self, video_pts: u64, handoff: &HandoffBuffer) -> Vec<AudioFrame> {
        let target = video_pts * self.sample_rate / self.fps;
        let frame = AUDIO_FRAME_SAMPLES as u64;

        let mut due = Vec::new();
        while self.audio_pts + frame <= target {
            let samples = match self.mode {
                AudioMode::Primary => {
                    if let Some(samples) = self.primary.take_exact(AUDIO_FRAME_SAMPLES) {
                        samples
                    } else if self.primary.frames() == 0 {
                        self.silence()
                    } else {
                        break;
                    }
                }
                AudioMode::Grace { .. } => {
                    self.primary.clear();
                    drop(handoff.drain_audio());
                    self.silence()
                }
                AudioMode::Fallback => self.fallback.take_padded(AUDIO_FRAME_SAMPLES),
            };
            due.push(AudioFrame {
                pts: self.audio_pts,
                samples,
            });
            self.audio_pts += frame;
        }
        due
    }

    fn silence(&self) -> Vec<f32> {
        vec![0.0; AUDIO_FRAME_SAMPLES * self.channels]
    }
}
