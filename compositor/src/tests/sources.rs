// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use crate::{
    sources::{FileSource, NetworkSource, SourceError},
    tests::testing,
    Config,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

fn config() -> Config {
    let mut config = Config::new("srt://127.0.0.1:7000");
    config.width = 320;
    config.height = 240;
    config.stall_timeout = Duration::from_millis(500);
    config
}

#[test]
fn missing_fallback_file_is_an_error() {
    testing::init();
    if !testing::have_elements(&["filesrc", "decodebin", "videoconvert", "videoscale"]) {
        return;
    }

    let mut config = config();
    config.fallback_path = "/nonexistent/directory/background.mp4".into();

    assert!(FileSource::open(&config).is_err());
}

#[test]
fn unreachable_primary_fails_within_the_open_timeout() {
    testing::init();
    if !testing::have_elements(&["uridecodebin", "udpsrc"]) {
        return;
    }

    // a udp source listens but never receives anything, so the only way
    // out is the open deadline
    let mut config = config();
    config.primary_url = "udp://127.0.0.1:39999".into();
    config.stall_timeout = Duration::from_millis(300);

    let stop = Arc::new(AtomicBool::new(false));
    let started = Instant::now();
    let result = NetworkSource::open(&config, &stop);
    let elapsed = started.elapsed();

    let err = result.err().expect("open must fail");
    assert!(matches!(
        err.downcast_ref::<SourceError>(),
        Some(SourceError::ConnectTimeout)
    ));
    assert!(
        elapsed < Duration::from_secs(3),
        "open must respect its deadline, took {elapsed:?}"
    );
}

#[test]
fn shutdown_aborts_a_blocking_open() {
    testing::init();
    if !testing::have_elements(&["uridecodebin", "udpsrc"]) {
        return;
    }

    let mut config = config();
    config.primary_url = "udp://127.0.0.1:39998".into();
    config.stall_timeout = Duration::from_secs(30);

    let stop = Arc::new(AtomicBool::new(false));
    stop.store(true, Ordering::Relaxed);

    let started = Instant::now();
    let err = NetworkSource::open(&config, &stop)
        .err()
        .expect("open must be cancelled");

    assert!(matches!(
        err.downcast_ref::<SourceError>(),
        Some(SourceError::Cancelled)
    ));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn bogus_primary_url_reports_a_connect_error() {
    testing::init();
    if !testing::have_elements(&["uridecodebin"]) {
        return;
    }

    let mut config = config();
    config.primary_url = "file:///nonexistent/directory/feed.ts".into();

    let stop = Arc::new(AtomicBool::new(false));
    let err = NetworkSource::open(&config, &stop)
        .err()
        .expect("open must fail");

    assert!(matches!(
        err.downcast_ref::<SourceError>(),
        Some(SourceError::Connect(_)) | Some(SourceError::ConnectTimeout)
    ));
}
