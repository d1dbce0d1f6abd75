// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

/// The configuration document of one compositor worker.
///
/// Loaded from a JSON file with `SRT_COMPOSITOR`-prefixed environment
/// overrides, or assembled from the legacy positional form
/// `<primary_url> [fallback_path]`.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    #[serde(alias = "srt_url")]
    pub primary_url: String,
    #[serde(default = "default_fallback_path", alias = "bg_file")]
    pub fallback_path: PathBuf,
    #[serde(default)]
    pub stream_id: String,
    #[serde(default = "default_width")]
    pub out_width: u32,
    #[serde(default = "default_height")]
    pub out_height: u32,
    #[serde(default = "default_fps")]
    pub out_fps: u32,
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: u64,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: u64,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Grace period in seconds before fallback audio is unmuted.
    #[serde(default = "default_bg_unmute_delay")]
    pub bg_unmute_delay: f64,
    #[serde(default = "default_primary_timeout_us")]
    pub primary_timeout_us: u64,
    #[serde(default = "default_primary_retry_us")]
    pub primary_retry_us: u64,
    #[serde(default = "default_primary_audio_jitter_ms")]
    pub primary_audio_jitter_ms: u64,
}

fn default_fallback_path() -> PathBuf {
    PathBuf::from("background.mp4")
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_fps() -> u32 {
    30
}

fn default_video_bitrate() -> u64 {
    4_000_000
}

fn default_audio_bitrate() -> u64 {
    128_000
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_bg_unmute_delay() -> f64 {
    5.0
}

fn default_primary_timeout_us() -> u64 {
    2_000_000
}

fn default_primary_retry_us() -> u64 {
    500_000
}

fn default_primary_audio_jitter_ms() -> u64 {
    300
}

impl Settings {
    pub fn load(file_name: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::new(file_name, FileFormat::Json))
            .add_source(
                Environment::with_prefix("SRT_COMPOSITOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// The legacy positional invocation: everything defaulted except the
    /// primary URL and optionally the fallback file.
    pub fn from_legacy(primary_url: String, fallback_path: Option<String>) -> Self {
        Self {
            primary_url,
            fallback_path: fallback_path
                .map_or_else(default_fallback_path, PathBuf::from),
            stream_id: String::new(),
            out_width: default_width(),
            out_height: default_height(),
            out_fps: default_fps(),
            video_bitrate: default_video_bitrate(),
            audio_bitrate: default_audio_bitrate(),
            sample_rate: default_sample_rate(),
            bg_unmute_delay: default_bg_unmute_delay(),
            primary_timeout_us: default_primary_timeout_us(),
            primary_retry_us: default_primary_retry_us(),
            primary_audio_jitter_ms: default_primary_audio_jitter_ms(),
        }
    }

    pub fn into_config(self) -> compositor::Config {
        let mut config = compositor::Config::new(self.primary_url);
        config.fallback_path = self.fallback_path;
        config.stream_id = self.stream_id;
        config.width = self.out_width;
        config.height = self.out_height;
        config.fps = self.out_fps;
        config.video_bitrate = self.video_bitrate;
        config.audio_bitrate = self.audio_bitrate;
        config.sample_rate = self.sample_rate;
        config.grace_period = Duration::from_secs_f64(self.bg_unmute_delay.max(0.0));
        config.stall_timeout = Duration::from_micros(self.primary_timeout_us);
        config.retry_delay = Duration::from_micros(self.primary_retry_us);
        config.jitter_budget = Duration::from_millis(self.primary_audio_jitter_ms);
        config
    }
}
