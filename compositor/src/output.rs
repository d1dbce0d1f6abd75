// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Encoded output: H.264 + AAC, muxed and written to the configured sink.
//!
//! The compositor pushes raw frames and sample blocks into two `appsrc`
//! elements with explicit timestamps; x264 and the AAC encoder run inside
//! the pipeline with their own worker threads.

use anyhow::{anyhow, Context, Result};
use byte_slice_cast::AsByteSlice;
use gst::prelude::*;
use gst_app::AppSrc;

use crate::{config::Config, sources::VideoFrame};

/// How long the final mux gets to flush and write its trailer.
const FINISH_TIMEOUT: gst::ClockTime = gst::ClockTime::from_seconds(5);

/// Encoder, muxer and byte sink in one pipeline, fed by the compositor.
pub struct Output {
    pipeline: gst::Pipeline,
    video_src: AppSrc,
    audio_src: AppSrc,
    fps: u64,
    sample_rate: u64,
    channels: u64,
}

impl Output {
    /// Create the output pipeline and start it.
    ///
    /// # Errors
    ///
    /// This can fail for the following reasons:
    /// - An encoder or mux element cannot be created for `GStreamer`.
    /// - The appsrc elements cannot be found in the parsed pipeline.
    /// - The pipeline refuses to start, e.g. the sink cannot be opened.
    pub fn create(config: &Config) -> Result<Output> {
        trace!("create( {}x{} )", config.width, config.height);

        let description = format!(
            r#"
            appsrc
                name=video_in
                format=time
                block=true
            ! videoconvert
            ! x264enc speed-preset=ultrafast tune=zerolatency bitrate={video_kbit} key-int-max={keyint} bframes=0 threads=4
            ! video/x-h264,profile=main
            ! h264parse
            ! mux.

            appsrc
                name=audio_in
                format=time
                block=true
            ! audioconvert
            ! audioresample
            ! fdkaacenc bitrate={audio_bitrate}
            ! audio/mpeg,mpegversion=4
            ! aacparse
            ! mux.

            {mux}
            ! {sink}
            "#,
            video_kbit = config.video_bitrate / 1000,
            keyint = config.fps * 2,
            audio_bitrate = config.audio_bitrate,
            mux = config.container.mux_description(),
            sink = config.sink.sink_description(),
        );

        let pipeline = gst::parse_launch(&description)
            .context("failed to create output pipeline. Is a gst plugin missing?")?
            .downcast::<gst::Pipeline>()
            .map_err(|_| anyhow!("output description is not a pipeline"))?;

        let video_src = pipeline
            .by_name("video_in")
            .context("no 'video_in' in output pipeline")?
            .downcast::<AppSrc>()
            .map_err(|_| anyhow!("'video_in' is not an appsrc"))?;
        video_src.set_caps(Some(
            &gst::Caps::builder("video/x-raw")
                .field("format", "I420")
                .field("width", config.width as i32)
                .field("height", config.height as i32)
                .field("framerate", gst::Fraction::new(config.fps as i32, 1))
                .build(),
        ));
        // about one frame of backlog before pushes block
        video_src.set_max_bytes(config.frame_len() as u64 * 2);

        let audio_src = pipeline
            .by_name("audio_in")
            .context("no 'audio_in' in output pipeline")?
            .downcast::<AppSrc>()
            .map_err(|_| anyhow!("'audio_in' is not an appsrc"))?;
        audio_src.set_caps(Some(
            &gst::Caps::builder("audio/x-raw")
                .field("format", "F32LE")
                .field("layout", "interleaved")
                .field("rate", config.sample_rate as i32)
                .field("channels", config.channels as i32)
                .build(),
        ));
        audio_src.set_max_bytes(u64::from(config.sample_rate * config.channels) * 4);

        pipeline
            .set_state(gst::State::Playing)
            .context("unable to start output pipeline")?;

        Ok(Self {
            pipeline,
            video_src,
            audio_src,
            fps: u64::from(config.fps),
            sample_rate: u64::from(config.sample_rate),
            channels: u64::from(config.channels),
        })
    }

    /// Encode one video frame with the given frame-count timestamp.
    pub fn push_video(&self, frame: &VideoFrame, pts_frames: u64) -> Result<()> {
        let pts = scale(pts_frames, gst::ClockTime::SECOND.nseconds(), self.fps);
        let duration = scale(1, gst::ClockTime::SECOND.nseconds(), self.fps);

        let buffer = fill_buffer(frame.data(), pts, duration)?;
        self.video_src
            .push_buffer(buffer)
            .map_err(|err| anyhow!("video push rejected: {err:?}"))?;
        Ok(())
    }

    /// Encode one block of interleaved samples with the given
    /// sample-count timestamp.
    pub fn push_audio(&self, samples: &[f32], pts_samples: u64) -> Result<()> {
        let frames = samples.len() as u64 / self.channels;
        let pts = scale(
            pts_samples,
            gst::ClockTime::SECOND.nseconds(),
            self.sample_rate,
        );
        let duration = scale(frames, gst::ClockTime::SECOND.nseconds(), self.sample_rate);

        let buffer = fill_buffer(samples.as_byte_slice(), pts, duration)?;
        self.audio_src
            .push_buffer(buffer)
            .map_err(|err| anyhow!("audio push rejected: {err:?}"))?;
        Ok(())
    }

    /// Fetch a pending pipeline error, e.g. a sink write failure.
    /// Drains the bus as a side effect so the unwatched queue stays
    /// empty over long sessions.
    pub fn take_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(message) = bus.pop() {
            if let gst::MessageView::Error(err) = message.view() {
                return Some(format!("{} ({:?})", err.error(), err.debug()));
            }
        }
        None
    }

    /// Flush the encoders and write the container trailer.
    pub fn finish(self) -> Result<()> {
        trace!("finish()");

        let _ = self.video_src.end_of_stream();
        let _ = self.audio_src.end_of_stream();

        let mut result = Ok(());
        if let Some(bus) = self.pipeline.bus() {
            match bus.timed_pop_filtered(
                FINISH_TIMEOUT,
                &[gst::MessageType::Eos, gst::MessageType::Error],
            ) {
                Some(message) => {
                    if let gst::MessageView::Error(err) = message.view() {
                        result = Err(anyhow!("output flush failed: {}", err.error()));
                    }
                }
                None => warn!("output did not finish within {FINISH_TIMEOUT}, closing anyway"),
            }
        }

        self.pipeline
            .set_state(gst::State::Null)
            .context("unable to shut down output pipeline")?;
        result
    }
}

// substitute for gst_util_uint64_scale
fn scale(val: u64, num: u64, denom: u64) -> u64 {
    val * num / denom
}

fn fill_buffer(data: &[u8], pts: u64, duration: u64) -> Result<gst::Buffer> {
    let mut buffer =
        gst::Buffer::with_size(data.len()).context("unable to allocate output buffer")?;
    let buffer_ref = buffer.make_mut();
    buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts));
    buffer_ref.set_duration(gst::ClockTime::from_nseconds(duration));
    buffer_ref
        .copy_from_slice(0, data)
        .map_err(|_| anyhow!("output buffer size mismatch"))?;
    Ok(buffer)
}
