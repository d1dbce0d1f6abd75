// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use anyhow::{Context, Result};
use std::{
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use crate::{
    config::Config,
    sources::{DecodePipeline, MediaItem, MediaSource},
};

/// Live network source for the primary feed.
///
/// Tuned for latency, not completeness: buffering is disabled, the queues
/// leak downstream and the video appsink keeps only the newest frame, so a
/// slow consumer sees the latest picture instead of a growing backlog.
pub struct NetworkSource {
    decode: DecodePipeline,
}

impl NetworkSource {
    /// Connect to the primary feed and wait for its first video frame.
    ///
    /// Returns within the configured stall timeout even if the remote
    /// never responds, and within one wait slice of `stop` being set. The
    /// error downcasts to [`SourceError`](crate::sources::SourceError) so
    /// the caller can tell cancellation from a failed connect.
    ///
    /// # Errors
    ///
    /// This fails if the URL cannot be reached or decoded, delivers no
    /// video stream, or takes longer than the open timeout. All of these
    /// are retried by the ingestion worker.
    pub fn open(config: &Config, stop: &Arc<AtomicBool>) -> Result<NetworkSource> {
        trace!("open( {} )", config.primary_url);

        let description = format!(
            r#"
            uridecodebin
                name=dec
                uri="{uri}"
                use-buffering=false

            dec.
            ! queue
                max-size-buffers=2
                leaky=downstream
            ! videoconvert
            ! videoscale
            ! video/x-raw,format=I420,width={width},height={height},pixel-aspect-ratio=1/1
            ! appsink
                name=video_sink
                max-buffers=1
                drop=true
                sync=false

            dec.
            ! queue
                max-size-buffers=16
                leaky=downstream
            ! audioconvert
            ! audioresample
            ! audio/x-raw,format=F32LE,layout=interleaved,rate={rate},channels={channels}
            ! appsink
                name=audio_sink
                max-buffers=128
                drop=true
                sync=false
            "#,
            uri = config.primary_url,
            width = config.width,
            height = config.height,
            rate = config.sample_rate,
            channels = config.channels,
        );

        let mut decode =
            DecodePipeline::build(&description).context("failed to create primary source")?;
        decode.start().context("failed to start primary source")?;
        decode.wait_first_video(config.stall_timeout, Some(stop))?;

        Ok(Self { decode })
    }
}

impl MediaSource for NetworkSource {
    fn read_one(&mut self, timeout: Duration) -> Result<MediaItem> {
        self.decode.pull(timeout)
    }

    fn close(self) {}
}
