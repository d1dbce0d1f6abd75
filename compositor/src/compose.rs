// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! The paced output loop.
//!
//! One iteration — a tick — emits exactly one encoded video frame and
//! however much audio the video clock is owed. The primary feed only ever
//! enters through the handoff buffer, so a tick never waits on the
//! network; when the loop falls behind it catches up by skipping the
//! pacing sleep, never by dropping or doubling output frames.

use anyhow::{bail, Context, Result};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::{
    audio::{AudioEngine, AudioTransition},
    config::Config,
    events::{Event, EventSink},
    handoff::HandoffBuffer,
    ingest::IngestWorker,
    output::Output,
    sources::{FileSource, MediaItem, MediaSource, VideoFrame},
};

/// Upper bound of fallback reads per tick, so a corrupt file cannot turn
/// the decode pump into a hot loop.
const MAX_PUMP_READS: usize = 8;

/// How long one fallback pull may wait for the decoder.
const PUMP_READ_TIMEOUT: Duration = Duration::from_millis(2);

/// Sleep granularity of the pacing clock; remainders below this are spun
/// away by starting the next tick early.
const MIN_SLEEP: Duration = Duration::from_millis(1);

/// The failover compositor: one instance per output stream.
pub struct Compositor {
    config: Arc<Config>,
    events: Arc<EventSink>,
    stop: Arc<AtomicBool>,
}

impl Compositor {
    pub fn new(config: Config, events: Arc<EventSink>, stop: Arc<AtomicBool>) -> Self {
        Self {
            config: Arc::new(config),
            events,
            stop,
        }
    }

    /// Run until `stop` is set or a fatal error occurs.
    ///
    /// Opens the fallback source and the encoder, spawns the ingestion
    /// worker, runs the tick loop on the calling thread and tears
    /// everything down afterwards, flushing the encoder on a best-effort
    /// basis even when failing.
    ///
    /// # Errors
    ///
    /// Fatal are: invalid configuration, an unreadable fallback source, an
    /// encoder or sink that cannot be opened, and any encode or sink-write
    /// failure at steady state. Every fatal error is also reported as an
    /// `error` event before this returns.
    pub fn run(self) -> Result<()> {
        let result = self.run_inner();
        if let Err(ref err) = result {
            self.events.emit(Event::Error {
                message: format!("{err:#}"),
            });
        }
        result
    }

    fn run_inner(&self) -> Result<()> {
        self.config.validate().context("invalid configuration")?;

        let mut fallback =
            FileSource::open(&self.config).context("cannot open fallback source")?;
        self.events.emit(Event::BgOpened);

        let output = Output::create(&self.config).context("cannot open output")?;
        self.events.emit(Event::OutputReady {
            resolution: format!("{}x{}", self.config.width, self.config.height),
            fps: self.config.fps,
            vbr: self.config.video_bitrate,
            abr: self.config.audio_bitrate,
        });

        let handoff = Arc::new(HandoffBuffer::new(&self.config));
        let ingest = IngestWorker::spawn(
            self.config.clone(),
            handoff.clone(),
            self.events.clone(),
            self.stop.clone(),
        );

        self.events.emit(Event::Running);
        info!(
            "compositor running: {}x{}@{} to {:?}",
            self.config.width, self.config.height, self.config.fps, self.config.sink
        );

        let mut audio = AudioEngine::new(&self.config);
        let result = self.run_loop(&mut fallback, &output, &handoff, &mut audio);
        self.events.emit(Event::Stopped);

        // tear down: the worker first, then flush the encoder
        self.stop.store(true, Ordering::Relaxed);
        ingest.join();
        fallback.close();

        match output.finish() {
            Ok(()) => result,
            Err(finish_err) => match result {
                // a loop failure outranks a failing flush
                Err(_) => {
                    warn!("output flush after failure also failed: {finish_err:#}");
                    result
                }
                Ok(()) => Err(finish_err),
            },
        }
    }

    fn run_loop(
        &self,
        fallback: &mut FileSource,
        output: &Output,
        handoff: &HandoffBuffer,
        audio: &mut AudioEngine,
    ) -> Result<()> {
        let frame_duration = self.config.frame_duration();
        let fps = u64::from(self.config.fps);

        let mut out_frame = VideoFrame::black(self.config.width, self.config.height);
        let mut fallback_frame: Option<VideoFrame> = None;
        let mut fallback_failing = false;
        let mut video_pts: u64 = 0;
        let mut primary_on_screen = false;

        while !self.stop.load(Ordering::Relaxed) {
            let tick_start = Instant::now();

            self.pump_fallback(fallback, &mut fallback_frame, audio, &mut fallback_failing);

            let primary_available = handoff.try_take_video(&mut out_frame);

            if primary_available != primary_on_screen {
                self.events.emit(if primary_available {
                    Event::VideoPrimary
                } else {
                    Event::VideoFallback
                });
                primary_on_screen = primary_available;
            }

            if !primary_available {
                if let Some(frame) = &fallback_frame {
                    out_frame.copy_from(frame);
                }
                // neither source has delivered yet: repeat the previous
                // output frame rather than skip the tick
            }
            output
                .push_video(&out_frame, video_pts)
                .context("failed to encode video frame")?;
            video_pts += 1;

            match audio.on_tick(primary_available, Instant::now()) {
                Some(AudioTransition::PrimaryResumed) => self.events.emit(Event::PrimaryActive),
                Some(AudioTransition::GraceEntered) => self.events.emit(Event::GraceEntered),
                Some(AudioTransition::FallbackEntered) => self.events.emit(Event::FallbackAudioOn),
                None => {}
            }

            audio.absorb_primary(handoff);
            for frame in audio.emit_due(video_pts, handoff) {
                output
                    .push_audio(&frame.samples, frame.pts)
                    .context("failed to encode audio frame")?;
            }

            if let Some(message) = output.take_error() {
                bail!("output pipeline failed: {message}");
            }

            if video_pts % fps == 0 {
                self.events.emit(Event::Stats {
                    fps: self.config.fps,
                    primary_connected: handoff.connected(),
                    audio_mode: audio.mode().name(),
                });
            }

            let elapsed = tick_start.elapsed();
            if frame_duration > elapsed + MIN_SLEEP {
                std::thread::sleep(frame_duration - elapsed);
            }
        }

        Ok(())
    }

    /// Decode fallback media until one new video frame arrives, looping
    /// the file on EOS. Audio produced on the way lands in the fallback
    /// queue. Never fatal: a broken fallback degrades the output, it does
    /// not stop it.
    fn pump_fallback(
        &self,
        source: &mut FileSource,
        cache: &mut Option<VideoFrame>,
        audio: &mut AudioEngine,
        failing: &mut bool,
    ) {
        for _ in 0..MAX_PUMP_READS {
            match source.read_one(PUMP_READ_TIMEOUT) {
                Ok(MediaItem::Video(frame)) => {
                    *cache = Some(frame);
                    *failing = false;
                    return;
                }
                Ok(MediaItem::Audio(block)) => audio.push_fallback(&block.samples),
                Ok(MediaItem::Idle) => return,
                Ok(MediaItem::EndOfStream) => {
                    if let Err(err) = source.loop_reset() {
                        self.note_fallback_failure(failing, &err);
                        return;
                    }
                }
                Err(err) => {
                    self.note_fallback_failure(failing, &err);
                    if let Err(reset_err) = source.loop_reset() {
                        warn!("fallback reset after failure failed: {reset_err:#}");
                    }
                    return;
                }
            }
        }
    }

    fn note_fallback_failure(&self, failing: &mut bool, err: &anyhow::Error) {
        warn!("fallback source failed: {err:#}");
        if !*failing {
            self.events.emit(Event::Warn {
                message: format!("fallback source failing: {err:#}"),
            });
            *failing = true;
        }
    }
}
