// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Immutable configuration of one compositor instance.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

/// Container format the encoded output is muxed into.
///
/// The codecs are fixed (H.264 video, AAC audio); only the container
/// around them is selectable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Flv,
    Mpegts,
    Matroska,
}

impl Container {
    pub(crate) fn mux_description(self) -> &'static str {
        match self {
            Container::Flv => "flvmux name=mux streamable=true",
            Container::Mpegts => "mpegtsmux name=mux",
            Container::Matroska => "matroskamux name=mux streamable=true",
        }
    }
}

/// Where the muxed output bytes are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SinkDescriptor {
    /// Standard output of the process, for piping into a downstream
    /// publisher.
    #[default]
    Stdout,
    File(PathBuf),
    Rtmp(String),
}

impl SinkDescriptor {
    pub(crate) fn sink_description(&self) -> String {
        match self {
            SinkDescriptor::Stdout => "fdsink fd=1 sync=false".to_string(),
            SinkDescriptor::File(path) => {
                format!(r#"filesink location="{}" sync=false"#, path.display())
            }
            SinkDescriptor::Rtmp(location) => {
                format!(r#"rtmpsink location="{location}" sync=false"#)
            }
        }
    }
}

/// Everything a compositor instance needs to know, fixed for its whole
/// lifetime.
#[derive(Debug, Clone)]
pub struct Config {
    /// Descriptor of the live network source.
    pub primary_url: String,
    /// Local media file played on loop while the primary is absent.
    pub fallback_path: PathBuf,
    /// Opaque identifier attached to every status event.
    pub stream_id: String,

    /// Output picture width in pixels.
    pub width: u32,
    /// Output picture height in pixels.
    pub height: u32,
    /// Output frame rate.
    pub fps: u32,
    /// Target video bitrate in bits per second.
    pub video_bitrate: u64,
    /// Target audio bitrate in bits per second.
    pub audio_bitrate: u64,
    /// Output audio sample rate in Hz.
    pub sample_rate: u32,
    /// Output audio channel count. Stereo only.
    pub channels: u32,

    /// How long after a primary drop the audio stays silent before the
    /// fallback audio is unmuted.
    pub grace_period: Duration,
    /// Maximum primary-source inactivity before the session is dropped.
    pub stall_timeout: Duration,
    /// Pause between primary reconnect attempts.
    pub retry_delay: Duration,
    /// Maximum amount of primary audio the compositor keeps queued before
    /// trimming the oldest samples.
    pub jitter_budget: Duration,

    pub container: Container,
    pub sink: SinkDescriptor,
}

impl Config {
    /// Configuration with all defaults filled in, matching a plain
    /// `<primary_url>` invocation.
    pub fn new(primary_url: impl Into<String>) -> Self {
        Self {
            primary_url: primary_url.into(),
            fallback_path: PathBuf::from("background.mp4"),
            stream_id: String::new(),
            width: 1280,
            height: 720,
            fps: 30,
            video_bitrate: 4_000_000,
            audio_bitrate: 128_000,
            sample_rate: 48_000,
            channels: 2,
            grace_period: Duration::from_secs(5),
            stall_timeout: Duration::from_secs(2),
            retry_delay: Duration::from_millis(500),
            jitter_budget: Duration::from_millis(300),
            container: Container::default(),
            sink: SinkDescriptor::default(),
        }
    }

    /// # Errors
    ///
    /// Fails on a configuration no encoder session can be built from:
    /// missing primary URL, zero rates, or odd output dimensions (the
    /// output pixel format subsamples chroma by two).
    pub fn validate(&self) -> Result<()> {
        if self.primary_url.is_empty() {
            bail!("primary source URL must not be empty");
        }
        if self.width == 0 || self.height == 0 {
            bail!("output geometry must not be zero");
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            bail!(
                "output geometry {}x{} must have even dimensions",
                self.width,
                self.height
            );
        }
        if self.fps == 0 {
            bail!("output frame rate must not be zero");
        }
        if self.sample_rate == 0 {
            bail!("output sample rate must not be zero");
        }
        if self.channels != 2 {
            bail!("only stereo output is supported");
        }
        Ok(())
    }

    /// Duration of one output video frame.
    pub(crate) fn frame_duration(&self) -> Duration {
        Duration::from_secs(1) / self.fps
    }

    /// Byte size of one raw I420 output frame.
    pub(crate) fn frame_len(&self) -> usize {
        let (width, height) = (self.width as usize, self.height as usize);
        width * height + 2 * ((width / 2) * (height / 2))
    }

    /// Jitter budget in per-channel sample frames.
    pub(crate) fn jitter_frames(&self) -> usize {
        (u128::from(self.sample_rate) * self.jitter_budget.as_millis() / 1000) as usize
    }

    /// Capacity of the shared audio queue in interleaved samples,
    /// two seconds at the output rate.
    pub(crate) fn handoff_audio_capacity(&self) -> usize {
        (self.sample_rate * self.channels * 2) as usize
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_plain_invocation() {
        let config = Config::new("srt://127.0.0.1:5000");
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 720);
        assert_eq!(config.fps, 30);
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.channels, 2);
        assert_eq!(config.fallback_path, PathBuf::from("background.mp4"));
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert_eq!(config.stall_timeout, Duration::from_secs(2));
        assert_eq!(config.retry_delay, Duration::from_millis(500));
        assert_eq!(config.jitter_budget, Duration::from_millis(300));
        assert_eq!(config.container, Container::Flv);
        assert_eq!(config.sink, SinkDescriptor::Stdout);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_missing_url() {
        assert!(Config::new("").validate().is_err());
    }

    #[test]
    fn rejects_odd_geometry() {
        let mut config = Config::new("srt://127.0.0.1:5000");
        config.width = 1279;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_mono_output() {
        let mut config = Config::new("srt://127.0.0.1:5000");
        config.channels = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn derived_sizes() {
        let config = Config::new("srt://127.0.0.1:5000");
        assert_eq!(config.frame_len(), 1280 * 720 * 3 / 2);
        assert_eq!(config.jitter_frames(), 48_000 * 300 / 1000);
        assert_eq!(config.handoff_audio_capacity(), 48_000 * 2 * 2);
        assert_eq!(config.frame_duration(), Duration::from_nanos(33_333_333));
    }
}
