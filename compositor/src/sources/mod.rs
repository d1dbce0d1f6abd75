// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Media input façade.
//!
//! Both inputs — the looping fallback file and the live primary feed —
//! decode behind the same interface. Scaling to the output geometry and
//! resampling to the output rate happen inside the decode pipeline, so
//! consumers only ever see raw I420 frames at the output size and
//! interleaved stereo float samples at the output rate.

use anyhow::{anyhow, bail, Context, Result};
use byte_slice_cast::AsSliceOf;
use gst::prelude::*;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

mod file;
mod network;

pub use file::*;
pub use network::*;

/// Slice length of a single bus/appsink wait, so cancellation and deadlines
/// stay prompt even while a source produces nothing.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Byte size of one raw I420 frame at the given geometry.
pub fn frame_len(width: u32, height: u32) -> usize {
    let (width, height) = (width as usize, height as usize);
    width * height + 2 * ((width / 2) * (height / 2))
}

/// One raw video frame in the output pixel format at the output geometry.
///
/// Carries no timestamp; the compositor assigns output timestamps when
/// encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    data: Vec<u8>,
}

impl VideoFrame {
    /// A black frame (I420 limited range).
    pub fn black(width: u32, height: u32) -> Self {
        let luma = (width * height) as usize;
        let mut data = vec![16u8; frame_len(width, height)];
        for byte in &mut data[luma..] {
            *byte = 128;
        }
        Self { data }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Overwrite this frame with the content of `other`. Both frames must
    /// share the output geometry.
    pub fn copy_from(&mut self, other: &VideoFrame) {
        self.data.copy_from_slice(&other.data);
    }
}

/// A block of interleaved stereo float samples at the output rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub samples: Vec<f32>,
}

/// One read result off a source.
#[derive(Debug)]
pub enum MediaItem {
    Video(VideoFrame),
    Audio(AudioBlock),
    /// The source delivered its last frame. Files can be rewound with
    /// [`MediaSource::loop_reset`]; network sources are done for good.
    EndOfStream,
    /// Nothing arrived within the read timeout.
    Idle,
}

/// Connect failures, distinguishable for retry policy and tests.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source did not deliver video within the open timeout")]
    ConnectTimeout,
    #[error("cannot open source: {0}")]
    Connect(String),
    #[error("source has no video stream")]
    NoVideo,
    #[error("open cancelled by shutdown")]
    Cancelled,
}

/// Common capability set of the fallback file and the primary network feed.
///
/// A source is owned and used by exactly one thread.
pub trait MediaSource {
    /// Pull the next decoded item, waiting at most `timeout`. Audio is
    /// drained ahead of video so bursty audio never queues behind a
    /// blocking video wait.
    fn read_one(&mut self, timeout: Duration) -> Result<MediaItem>;

    /// Rewind to the first frame and flush decoder state.
    fn loop_reset(&mut self) -> Result<()> {
        bail!("this source cannot restart");
    }

    /// Tear the source down.
    fn close(self);
}

/// The decode machinery shared by both source flavors: a pipeline ending in
/// one video and one audio appsink, pulled synchronously by the owner.
pub(crate) struct DecodePipeline {
    pipeline: gst::Pipeline,
    video_sink: gst_app::AppSink,
    audio_sink: gst_app::AppSink,
    /// Items decoded while waiting for the first video frame, replayed in
    /// order by `pull`.
    pending: VecDeque<MediaItem>,
}

impl DecodePipeline {
    /// Parse `description` and fetch the two appsinks, which the
    /// description must name `video_sink` and `audio_sink`.
    pub(crate) fn build(description: &str) -> Result<Self> {
        let pipeline = gst::parse_launch(description)
            .context("failed to parse source pipeline. Is a gst plugin missing?")?
            .downcast::<gst::Pipeline>()
            .map_err(|_| anyhow!("source description is not a pipeline"))?;

        let video_sink = pipeline
            .by_name("video_sink")
            .context("no 'video_sink' in source pipeline")?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| anyhow!("'video_sink' is not an appsink"))?;
        let audio_sink = pipeline
            .by_name("audio_sink")
            .context("no 'audio_sink' in source pipeline")?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| anyhow!("'audio_sink' is not an appsink"))?;

        Ok(Self {
            pipeline,
            video_sink,
            audio_sink,
            pending: VecDeque::new(),
        })
    }

    pub(crate) fn start(&self) -> Result<()> {
        self.pipeline
            .set_state(gst::State::Playing)
            .context("unable to start source pipeline")?;
        Ok(())
    }

    /// Wait until the source proves it can deliver video, draining any
    /// audio decoded on the way into the pending queue.
    ///
    /// Returns within `timeout` even if the remote never responds, and
    /// within one wait slice of `stop` being set.
    pub(crate) fn wait_first_video(
        &mut self,
        timeout: Duration,
        stop: Option<&Arc<AtomicBool>>,
    ) -> Result<(), SourceError> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(stop) = stop {
                if stop.load(Ordering::Relaxed) {
                    return Err(SourceError::Cancelled);
                }
            }
            if let Some(message) = self.pop_error() {
                return Err(SourceError::Connect(message));
            }

            while let Some(sample) = self.audio_sink.try_pull_sample(gst::ClockTime::ZERO) {
                match audio_item(&sample) {
                    Ok(item) => self.pending.push_back(item),
                    Err(err) => warn!("discarding undecodable audio sample: {err:#}"),
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SourceError::ConnectTimeout);
            }
            let slice = clock_time(remaining.min(WAIT_SLICE));
            if let Some(sample) = self.video_sink.try_pull_sample(slice) {
                match video_item(&sample) {
                    Ok(item) => {
                        self.pending.push_back(item);
                        return Ok(());
                    }
                    Err(err) => warn!("discarding undecodable video sample: {err:#}"),
                }
            } else if self.video_sink.is_eos() {
                return Err(SourceError::NoVideo);
            }
        }
    }

    /// Pull one decoded item: pending replays first, then queued audio,
    /// then video with the given timeout.
    pub(crate) fn pull(&mut self, timeout: Duration) -> Result<MediaItem> {
        if let Some(item) = self.pending.pop_front() {
            return Ok(item);
        }

        if let Some(message) = self.pop_error() {
            bail!("source pipeline failed: {message}");
        }

        if let Some(sample) = self.audio_sink.try_pull_sample(gst::ClockTime::ZERO) {
            return audio_item(&sample);
        }

        if let Some(sample) = self.video_sink.try_pull_sample(clock_time(timeout)) {
            return video_item(&sample);
        }

        if self.video_sink.is_eos() {
            Ok(MediaItem::EndOfStream)
        } else {
            Ok(MediaItem::Idle)
        }
    }

    /// Flush-seek back to the start, resetting decoder and EOS state.
    pub(crate) fn rewind(&mut self) -> Result<()> {
        self.pending.clear();
        self.pipeline
            .seek_simple(
                gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                gst::ClockTime::ZERO,
            )
            .context("unable to seek source back to start")?;
        Ok(())
    }

    /// Drain the bus, reporting the first error. Draining keeps the
    /// unwatched bus queue from growing over a long session.
    fn pop_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(message) = bus.pop() {
            if let gst::MessageView::Error(err) = message.view() {
                return Some(format!("{} ({:?})", err.error(), err.debug()));
            }
        }
        None
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        if let Err(err) = self.pipeline.set_state(gst::State::Null) {
            warn!("unable to shut down source pipeline: {err}");
        }
    }
}

fn clock_time(duration: Duration) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(duration.as_nanos() as u64)
}

fn video_item(sample: &gst::Sample) -> Result<MediaItem> {
    let buffer = sample.buffer().context("video sample has no buffer")?;
    let map = buffer
        .map_readable()
        .context("unable to map video buffer")?;
    Ok(MediaItem::Video(VideoFrame::from_bytes(
        map.as_slice().to_vec(),
    )))
}

fn audio_item(sample: &gst::Sample) -> Result<MediaItem> {
    let buffer = sample.buffer().context("audio sample has no buffer")?;
    let map = buffer
        .map_readable()
        .context("unable to map audio buffer")?;
    let samples = map
        .as_slice()
        .as_slice_of::<f32>()
        .context("audio buffer is not float samples")?
        .to_vec();
    Ok(MediaItem::Audio(AudioBlock { samples }))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn black_frame_has_i420_layout() {
        let frame = VideoFrame::black(4, 2);
        assert_eq!(frame.data().len(), frame_len(4, 2));
        assert_eq!(&frame.data()[..8], &[16; 8]);
        assert_eq!(&frame.data()[8..], &[128; 4]);
    }

    #[test]
    fn copy_from_replaces_content() {
        let mut dst = VideoFrame::black(4, 2);
        let src = VideoFrame::from_bytes(vec![7; frame_len(4, 2)]);
        dst.copy_from(&src);
        assert_eq!(dst, src);
    }
}
