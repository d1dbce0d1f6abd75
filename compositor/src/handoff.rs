// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! The one structure shared between the ingestion thread and the
//! compositor.
//!
//! A single mutex guards a latest-frame cell, a bounded audio queue and
//! the connection state. Every operation is a short copy; nothing ever
//! waits on a condition inside the lock, the compositor paces itself on
//! its own clock.

use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use crate::{config::Config, sources::VideoFrame};

#[derive(Debug)]
struct Shared {
    video: VideoFrame,
    /// True while `video` holds a frame of the current primary session.
    /// Not cleared on read — the compositor may copy the same frame again.
    has_video: bool,
    connected: bool,
    audio: VecDeque<f32>,
    last_activity: Instant,
}

/// Latest-video cell plus bounded audio queue between ingestion and
/// compositor.
#[derive(Debug)]
pub struct HandoffBuffer {
    shared: Mutex<Shared>,
    audio_capacity: usize,
}

impl HandoffBuffer {
    pub fn new(config: &Config) -> Self {
        Self {
            shared: Mutex::new(Shared {
                video: VideoFrame::black(config.width, config.height),
                has_video: false,
                connected: false,
                audio: VecDeque::new(),
                last_activity: Instant::now(),
            }),
            audio_capacity: config.handoff_audio_capacity(),
        }
    }

    /// Overwrite the latest frame. An unread previous frame is dropped.
    pub fn publish_video(&self, frame: &VideoFrame) {
        let mut shared = self.shared.lock();
        shared.video.copy_from(frame);
        shared.has_video = true;
        shared.last_activity = Instant::now();
    }

    /// Append decoded samples. When the queue would exceed its capacity
    /// the oldest samples are dropped first.
    pub fn publish_audio(&self, samples: &[f32]) {
        let mut shared = self.shared.lock();
        shared.audio.extend(samples.iter().copied());
        let len = shared.audio.len();
        if len > self.audio_capacity {
            shared.audio.drain(..len - self.audio_capacity);
        }
        shared.last_activity = Instant::now();
    }

    /// Copy the latest frame into `dst` if the session is connected and
    /// has published one. The frame stays available for further reads.
    pub fn try_take_video(&self, dst: &mut VideoFrame) -> bool {
        let shared = self.shared.lock();
        if !(shared.connected && shared.has_video) {
            return false;
        }
        dst.copy_from(&shared.video);
        true
    }

    /// Move all queued audio out, leaving the queue empty.
    pub fn drain_audio(&self) -> Vec<f32> {
        let mut shared = self.shared.lock();
        shared.audio.drain(..).collect()
    }

    /// Update the session state. Both directions start from a clean
    /// buffer: the frame cell is invalidated, the audio queue emptied and
    /// the activity clock reset.
    pub fn mark_connected(&self, connected: bool) {
        let mut shared = self.shared.lock();
        shared.connected = connected;
        shared.has_video = false;
        shared.audio.clear();
        shared.last_activity = Instant::now();
    }

    pub fn connected(&self) -> bool {
        self.shared.lock().connected
    }

    /// Time since the ingestion worker last deposited a frame or samples.
    pub fn last_activity_age(&self) -> Duration {
        self.shared.lock().last_activity.elapsed()
    }

    #[cfg(test)]
    fn queued_audio(&self) -> usize {
        self.shared.lock().audio.len()
    }
}
