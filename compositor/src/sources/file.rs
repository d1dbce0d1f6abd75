// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use anyhow::{Context, Result};
use std::time::Duration;

use crate::{
    config::Config,
    sources::{DecodePipeline, MediaItem, MediaSource},
};

/// Looping file source providing the fallback picture and sound.
///
/// Decoding runs ahead of the consumer only as far as the appsink queues
/// allow, so a file decodes at the pace it is being read, not at full
/// speed.
pub struct FileSource {
    decode: DecodePipeline,
}

impl FileSource {
    /// Open the fallback file and wait for its first video frame.
    ///
    /// # Errors
    ///
    /// This fails if the file cannot be read or decoded, or contains no
    /// video stream. Fallback failures at this point are fatal for the
    /// compositor, there is nothing left to put on screen.
    pub fn open(config: &Config) -> Result<FileSource> {
        trace!("open( {:?} )", config.fallback_path);

        let description = format!(
            r#"
            filesrc
                location="{location}"
            ! decodebin
                name=dec

            dec.
            ! queue
                max-size-time=2000000000
            ! videoconvert
            ! videoscale
            ! video/x-raw,format=I420,width={width},height={height},pixel-aspect-ratio=1/1
            ! appsink
                name=video_sink
                max-buffers=4
                sync=false

            dec.
            ! queue
                max-size-time=2000000000
            ! audioconvert
            ! audioresample
            ! audio/x-raw,format=F32LE,layout=interleaved,rate={rate},channels={channels}
            ! appsink
                name=audio_sink
                max-buffers=64
                sync=false
            "#,
            location = config.fallback_path.display(),
            width = config.width,
            height = config.height,
            rate = config.sample_rate,
            channels = config.channels,
        );

        let mut decode =
            DecodePipeline::build(&description).context("failed to create fallback source")?;
        decode
            .start()
            .context("failed to start fallback source")?;
        decode
            .wait_first_video(config.stall_timeout, None)
            .with_context(|| {
                format!(
                    "fallback file {:?} did not deliver video",
                    config.fallback_path
                )
            })?;

        Ok(Self { decode })
    }
}

impl MediaSource for FileSource {
    fn read_one(&mut self, timeout: Duration) -> Result<MediaItem> {
        self.decode.pull(timeout)
    }

    fn loop_reset(&mut self) -> Result<()> {
        trace!("loop_reset()");
        self.decode.rewind()
    }

    fn close(self) {}
}
