// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

#![allow(clippy::module_name_repetitions)]

use anyhow::Result;
use compositor::{Compositor, Event, EventSink};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{
    select,
    signal::{
        ctrl_c,
        unix::{signal, SignalKind},
    },
};

mod settings;

use crate::settings::Settings;

fn check_plugins() -> Result<()> {
    let required = [
        "aacparse",
        "appsink",
        "appsrc",
        "audioconvert",
        "audioresample",
        "decodebin",
        "fdkaacenc",
        "fdsink",
        "filesrc",
        "flvmux",
        "h264parse",
        "queue",
        "uridecodebin",
        "videoconvert",
        "videoscale",
        "x264enc",
    ];

    let missing: Vec<_> = required
        .into_iter()
        .filter(|name| gst::ElementFactory::find(name).is_none())
        .collect();

    if !missing.is_empty() {
        anyhow::bail!(
            "The following elements could not be loaded: {}",
            missing.join(", ")
        );
    }

    Ok(())
}

enum Invocation {
    ConfigFile(String),
    Legacy {
        primary_url: String,
        fallback_path: Option<String>,
    },
}

fn parse_args() -> Option<Invocation> {
    let mut config_path = None;
    let mut positional = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config_path = Some(args.next()?);
        } else if !arg.starts_with('-') {
            positional.push(arg);
        }
    }

    if let Some(path) = config_path {
        return Some(Invocation::ConfigFile(path));
    }

    let mut positional = positional.into_iter();
    Some(Invocation::Legacy {
        primary_url: positional.next()?,
        fallback_path: positional.next(),
    })
}

fn usage() {
    let program = std::env::args()
        .next()
        .unwrap_or_else(|| "srt-compositor".into());
    eprintln!("Usage: {program} --config <config.json>");
    eprintln!("   or: {program} <primary_url> [background.mp4]  (legacy)");
}

fn main() -> Result<()> {
    env_logger::init();

    let Some(invocation) = parse_args() else {
        usage();
        std::process::exit(1);
    };

    let settings = match invocation {
        Invocation::ConfigFile(path) => match Settings::load(&path) {
            Ok(settings) => settings,
            Err(err) => {
                EventSink::stderr("").emit(Event::Error {
                    message: format!("cannot load config {path}: {err}"),
                });
                std::process::exit(1);
            }
        },
        Invocation::Legacy {
            primary_url,
            fallback_path,
        } => Settings::from_legacy(primary_url, fallback_path),
    };

    let config = settings.into_config();
    let events = Arc::new(EventSink::stderr(config.stream_id.clone()));
    events.emit(Event::Started);

    if let Err(err) = gst::init() {
        events.emit(Event::Error {
            message: format!("cannot initialize gstreamer: {err}"),
        });
        std::process::exit(1);
    }
    if let Err(err) = check_plugins() {
        events.emit(Event::Error {
            message: format!("{err:#}"),
        });
        std::process::exit(1);
    }

    let stop = Arc::new(AtomicBool::new(false));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to start tokio async runtime");
    runtime.spawn({
        let stop = stop.clone();
        async move {
            let mut sig_term =
                signal(SignalKind::terminate()).expect("can not setup SIGTERM handler");
            select! {
                _ = ctrl_c() => { log::info!("received Ctrl-C"); }
                _ = sig_term.recv() => { log::info!("received SIGTERM"); }
            }
            stop.store(true, Ordering::Relaxed);
        }
    });

    // the compositor runs on the main thread; the runtime only watches
    // for signals
    let result = Compositor::new(config, events.clone(), stop).run();

    match result {
        Ok(()) => {
            events.emit(Event::Done);
            Ok(())
        }
        Err(err) => {
            eprintln!("Exit on failure: {err:?}");
            std::process::exit(1);
        }
    }
}
