// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Structured status events.
//!
//! Everything the compositor wants a supervisor to know goes through one
//! [EventSink] as a single JSON document per line, carrying the event name,
//! a unix timestamp and the configured stream identifier. Human-readable
//! diagnostics use the logger instead.

use parking_lot::Mutex;
use serde::Serialize;
use std::{
    io::Write,
    time::{SystemTime, UNIX_EPOCH},
};

/// Why the ingestion worker dropped its primary session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    ReadError,
    Timeout,
}

/// Status events emitted over the lifetime of a compositor instance.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Started,
    BgOpened,
    OutputReady {
        resolution: String,
        fps: u32,
        vbr: u64,
        abr: u64,
    },
    Running,
    PrimaryConnected,
    PrimaryConnectFailed {
        message: String,
    },
    PrimaryDropped {
        reason: DropReason,
    },
    PrimaryActive,
    GraceEntered,
    FallbackAudioOn,
    VideoPrimary,
    VideoFallback,
    Stats {
        fps: u32,
        primary_connected: bool,
        audio_mode: &'static str,
    },
    Stopped,
    Done,
    Warn {
        message: String,
    },
    Error {
        message: String,
    },
}

#[derive(Serialize)]
struct Record<'a> {
    #[serde(flatten)]
    event: &'a Event,
    ts: u64,
    stream_id: &'a str,
}

/// Serializes [Event]s onto a byte sink, one JSON document per line.
pub struct EventSink {
    stream_id: String,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl EventSink {
    pub fn new(stream_id: impl Into<String>, sink: Box<dyn Write + Send>) -> Self {
        Self {
            stream_id: stream_id.into(),
            sink: Mutex::new(sink),
        }
    }

    /// Event sink on standard error, leaving standard output free for the
    /// media stream.
    pub fn stderr(stream_id: impl Into<String>) -> Self {
        Self::new(stream_id, Box::new(std::io::stderr()))
    }

    /// Write one event line. A failing event sink never brings the stream
    /// down, the line is dropped instead.
    pub fn emit(&self, event: Event) {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        let record = Record {
            event: &event,
            ts,
            stream_id: &self.stream_id,
        };

        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(err) => {
                error!("unable to serialize event {event:?}: {err}");
                return;
            }
        };

        let mut sink = self.sink.lock();
        if writeln!(sink, "{line}").and_then(|()| sink.flush()).is_err() {
            debug!("event sink rejected {line}");
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    /// In-memory sink capturing emitted lines for assertions.
    #[derive(Clone, Default)]
    pub(crate) struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        pub(crate) fn lines(&self) -> Vec<serde_json::Value> {
            let bytes = self.0.lock();
            String::from_utf8(bytes.clone())
                .unwrap()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn capturing_sink(stream_id: &str) -> (EventSink, Capture) {
        let capture = Capture::default();
        let sink = EventSink::new(stream_id, Box::new(capture.clone()));
        (sink, capture)
    }

    #[test]
    fn plain_event_shape() {
        let (sink, capture) = capturing_sink("stream-1");
        sink.emit(Event::Started);

        let lines = capture.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["event"], "started");
        assert_eq!(lines[0]["stream_id"], "stream-1");
        assert!(lines[0]["ts"].is_u64());
    }

    #[test]
    fn event_specific_fields() {
        let (sink, capture) = capturing_sink("s");
        sink.emit(Event::PrimaryDropped {
            reason: DropReason::Timeout,
        });
        sink.emit(Event::OutputReady {
            resolution: "1280x720".into(),
            fps: 30,
            vbr: 4_000_000,
            abr: 128_000,
        });
        sink.emit(Event::Stats {
            fps: 30,
            primary_connected: false,
            audio_mode: "fallback",
        });

        let lines = capture.lines();
        assert_eq!(lines[0]["event"], "primary_dropped");
        assert_eq!(lines[0]["reason"], "timeout");
        assert_eq!(lines[1]["event"], "output_ready");
        assert_eq!(lines[1]["resolution"], "1280x720");
        assert_eq!(lines[1]["vbr"], 4_000_000);
        assert_eq!(lines[2]["event"], "stats");
        assert_eq!(lines[2]["primary_connected"], false);
        assert_eq!(lines[2]["audio_mode"], "fallback");
    }

    #[test]
    fn every_event_name_is_snake_case() {
        let (sink, capture) = capturing_sink("s");
        sink.emit(Event::PrimaryConnectFailed {
            message: "unreachable".into(),
        });
        sink.emit(Event::GraceEntered);
        sink.emit(Event::FallbackAudioOn);
        sink.emit(Event::VideoFallback);

        let names: Vec<String> = capture
            .lines()
            .iter()
            .map(|line| line["event"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "primary_connect_failed",
                "grace_entered",
                "fallback_audio_on",
                "video_fallback"
            ]
        );
    }
}
