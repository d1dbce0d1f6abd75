// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Ingestion worker owning the primary source lifecycle.
//!
//! Everything about the live feed — connecting, reading, stall detection,
//! reconnecting — happens on this thread. The compositor only ever sees
//! the handoff buffer, so a primary source in any state of misbehavior
//! can never delay a tick.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use crate::{
    config::Config,
    events::{DropReason, Event, EventSink},
    handoff::HandoffBuffer,
    sources::{MediaItem, MediaSource, NetworkSource, SourceError},
};

/// How many slices a reconnect pause is cut into, so a shutdown request
/// interrupts the pause almost immediately.
const RETRY_SLICES: u32 = 10;

/// Handle of the ingestion thread.
pub struct IngestWorker {
    handle: JoinHandle<()>,
}

impl IngestWorker {
    /// Spawn the worker. It runs until `stop` is set.
    pub fn spawn(
        config: Arc<Config>,
        handoff: Arc<HandoffBuffer>,
        events: Arc<EventSink>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let handle = std::thread::Builder::new()
            .name("ingest".into())
            .spawn(move || {
                Ingest {
                    config,
                    handoff,
                    events,
                    stop,
                }
                .run();
            })
            .expect("failed to spawn ingest thread");

        Self { handle }
    }

    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("ingest thread panicked");
        }
    }
}

struct Ingest {
    config: Arc<Config>,
    handoff: Arc<HandoffBuffer>,
    events: Arc<EventSink>,
    stop: Arc<AtomicBool>,
}

impl Ingest {
    fn run(&self) {
        debug!("ingest worker up, primary {}", self.config.primary_url);

        let mut source: Option<NetworkSource> = None;
        let read_slice = self.config.retry_delay / RETRY_SLICES;

        while !self.stop.load(Ordering::Relaxed) {
            let Some(active) = source.as_mut() else {
                source = self.connect();
                continue;
            };

            match active.read_one(read_slice) {
                Ok(MediaItem::Video(frame)) => self.handoff.publish_video(&frame),
                Ok(MediaItem::Audio(block)) => self.handoff.publish_audio(&block.samples),
                Ok(MediaItem::Idle) => {}
                Ok(MediaItem::EndOfStream) => {
                    self.disconnect(&mut source, DropReason::ReadError);
                    continue;
                }
                Err(err) => {
                    warn!("primary read failed: {err:#}");
                    self.disconnect(&mut source, DropReason::ReadError);
                    continue;
                }
            }

            if self.handoff.last_activity_age() > self.config.stall_timeout {
                self.disconnect(&mut source, DropReason::Timeout);
            }
        }

        if let Some(active) = source.take() {
            active.close();
            self.handoff.mark_connected(false);
        }
        debug!("ingest worker down");
    }

    /// One connect attempt. On failure the reconnect pause runs here, in
    /// slices, so the loop above retries immediately after.
    fn connect(&self) -> Option<NetworkSource> {
        match NetworkSource::open(&self.config, &self.stop) {
            Ok(source) => {
                self.handoff.mark_connected(true);
                self.events.emit(Event::PrimaryConnected);
                info!("primary connected");
                Some(source)
            }
            Err(err) => {
                if matches!(
                    err.downcast_ref::<SourceError>(),
                    Some(SourceError::Cancelled)
                ) {
                    return None;
                }
                self.events.emit(Event::PrimaryConnectFailed {
                    message: format!("{err:#}"),
                });
                debug!("primary connect failed: {err:#}");

                let slice = self.config.retry_delay / RETRY_SLICES;
                for _ in 0..RETRY_SLICES {
                    if self.stop.load(Ordering::Relaxed) {
                        break;
                    }
                    std::thread::sleep(slice);
                }
                None
            }
        }
    }

    fn disconnect(&self, source: &mut Option<NetworkSource>, reason: DropReason) {
        if let Some(active) = source.take() {
            active.close();
        }
        self.handoff.mark_connected(false);
        self.events.emit(Event::PrimaryDropped { reason });
        info!("primary dropped: {reason:?}");
    }
}
