// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end scenarios from spec §8, driven through `Controller` against a
//! minimal hand-rolled HTTP server instead of a real streaming source so
//! these run hermetically and fast. The wire format is raw PCM
//! (`audio/pcm`) so the fixture is just a buffer of S16LE frames with no
//! container to build or parse.

mod common;

use common::{serve_once, serve_truncated, silent_pcm_frames, wait_until};
use netplayer::controller::Controller;
use netplayer::decoder::CodecRegistry;
use netplayer::sink::SinkRegistry;
use netplayer::track::{StreamRef, Track, TrackKind};
use netplayer_proto::QueueModeDto;
use std::time::Duration;

fn pcm_track(id: &str, url: &str) -> Track {
    Track::new(id, id, TrackKind::Track).with_streaming_refs(vec![StreamRef {
        format_type: "audio/pcm".to_string(),
        url: url.to_string(),
        sample_rate: Some(44_100),
        channels: Some(2),
    }])
}

/// Scenario 1: a track plays to completion on the null sink and the
/// player returns to `Stop` once end-of-track is reached.
#[test]
fn play_to_end_on_null_sink_returns_to_stop() {
    let url = serve_once(silent_pcm_frames(2_000));
    let controller = Controller::new(
        CodecRegistry::with_default_codecs(),
        SinkRegistry::with_default_backends(),
        "null",
        None,
        None,
    );
    controller.set_tracks(vec![pcm_track("only", &url)]);
    controller.play(true).expect("play starts the pipeline");
    assert!(controller.get_player_status().playing);

    let stopped = wait_until(Duration::from_secs(2), || !controller.get_player_status().playing);
    assert!(stopped, "player should return to Stop once the track drains");
}

/// Scenario 2: the feeder's connection drops mid-track. The pipeline must
/// still reach a terminal state — not hang — and the player ends up
/// stopped rather than wedged in `Play`.
#[test]
fn dropped_connection_mid_track_terminates_pipeline() {
    let body = silent_pcm_frames(20_000);
    let url = serve_truncated(body.clone(), body.len() / 4);
    let controller = Controller::new(
        CodecRegistry::with_default_codecs(),
        SinkRegistry::with_default_backends(),
        "null",
        None,
        None,
    );
    controller.set_tracks(vec![pcm_track("only", &url)]);
    controller.play(true).expect("play starts the pipeline");

    let stopped = wait_until(Duration::from_secs(5), || !controller.get_player_status().playing);
    assert!(stopped, "a dropped connection must not leave the pipeline stuck in Play");
}

/// Scenario 3: skipping to an unreachable track auto-advances to the next
/// queue item instead of leaving the player stuck at the broken one.
#[test]
fn skip_to_unreachable_track_auto_advances_to_next() {
    let url_a = serve_once(silent_pcm_frames(20_000));
    let url_c = serve_once(silent_pcm_frames(20_000));
    let controller = Controller::new(
        CodecRegistry::with_default_codecs(),
        SinkRegistry::with_default_backends(),
        "null",
        None,
        None,
    );
    // `QueueModeDto::Queue` maps to `RepeatMode::Off` (controller.rs).
    controller.set_playback_queue_mode(QueueModeDto::Queue);
    controller.set_tracks(vec![
        pcm_track("reachable-a", &url_a),
        pcm_track("unreachable", "http://127.0.0.1:1/no-such-server"),
        pcm_track("reachable-c", &url_c),
    ]);
    controller.set_track(1).expect("cursor moves onto the unreachable track");
    controller.play(true).expect("play fails over past the unreachable track");

    let advanced = wait_until(Duration::from_secs(5), || {
        controller.get_player_status().current_track_id.as_deref() == Some("reachable-c")
    });
    assert!(advanced, "controller should auto-advance past the unreachable track");
    assert!(controller.get_player_status().playing);

    let ended = wait_until(Duration::from_secs(2), || !controller.get_player_status().playing);
    assert!(ended, "with repeat Off, the queue should stop once the last track ends");
    assert_eq!(controller.queue_cursor_position(), None, "cursor should be past the end");
}
