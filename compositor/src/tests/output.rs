// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use crate::{
    tests::testing, Config, Container, Output, SinkDescriptor, VideoFrame, AUDIO_FRAME_SAMPLES,
};

const ENCODE_ELEMENTS: &[&str] = &[
    "appsrc",
    "videoconvert",
    "x264enc",
    "h264parse",
    "fdkaacenc",
    "aacparse",
    "flvmux",
    "filesink",
];

#[test]
fn one_second_of_black_and_silence_reaches_the_sink() {
    testing::init();
    if !testing::have_elements(ENCODE_ELEMENTS) {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.flv");

    let mut config = Config::new("srt://unused");
    config.width = 320;
    config.height = 240;
    config.sink = SinkDescriptor::File(path.clone());

    let output = Output::create(&config).unwrap();
    let frame = VideoFrame::black(config.width, config.height);
    let silence = vec![0.0f32; AUDIO_FRAME_SAMPLES * config.channels as usize];

    let mut audio_pts = 0;
    for video_pts in 0..u64::from(config.fps) {
        output.push_video(&frame, video_pts).unwrap();
        while (audio_pts + AUDIO_FRAME_SAMPLES as u64) * u64::from(config.fps)
            <= (video_pts + 1) * u64::from(config.sample_rate)
        {
            output.push_audio(&silence, audio_pts).unwrap();
            audio_pts += AUDIO_FRAME_SAMPLES as u64;
        }
        assert_eq!(output.take_error(), None);
    }

    output.finish().unwrap();

    let written = std::fs::metadata(&path).unwrap().len();
    assert!(written > 0, "mux must have written header and frames");
}

#[test]
fn container_and_sink_descriptions_are_well_formed() {
    let mut config = Config::new("srt://unused");
    assert!(config.container.mux_description().contains("flvmux"));
    assert!(Container::Mpegts.mux_description().contains("mpegtsmux"));
    assert!(Container::Matroska.mux_description().contains("matroskamux"));
    for container in [Container::Flv, Container::Mpegts, Container::Matroska] {
        assert!(container.mux_description().contains("name=mux"));
    }

    config.sink = SinkDescriptor::Rtmp("rtmp://example.com/live".into());
    assert!(config.sink.sink_description().contains("rtmpsink"));

    config.sink = SinkDescriptor::File("/tmp/out.flv".into());
    assert!(config.sink.sink_description().contains("filesink"));
}
