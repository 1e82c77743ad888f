// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! netplayer daemon: process wiring around the core library.
//!
//! Loads persisted player state, builds a [`Controller`], and drives it
//! from a line-oriented demo command loop on stdin so the core is
//! exercisable end to end without a remote-control transport (that layer
//! is out of scope; see spec §1). `Ctrl-D` (EOF) or `quit` persists state
//! and exits cleanly.

mod config;

use config::ConfigManager;
use netplayer::controller::{Controller, RepeatMode};
use netplayer::decoder::CodecRegistry;
use netplayer::queue::ItemRef;
use netplayer::sink::SinkRegistry;
use netplayer::track::{StreamRef, Track, TrackKind};
use netplayer_proto::QueueModeDto;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::{error, info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("netplayer_daemon=debug".parse().unwrap())
                .add_directive("netplayer=debug".parse().unwrap()),
        )
        .init();

    info!("netplayer daemon starting");

    let config_manager = ConfigManager::new()?;
    let saved = config_manager.load_player_config()?;
    let queue = saved.queue()?;
    info!(device_uuid = %saved.device_uuid, tracks = queue.len(), "loaded player config");

    let codecs = CodecRegistry::with_default_codecs();
    let sinks = SinkRegistry::with_default_backends();

    let status_callback: Arc<dyn Fn(netplayer_proto::PlayerStatusDto) + Send + Sync> =
        Arc::new(|status| {
            info!(
                playing = status.playing,
                paused = status.paused,
                track = status.current_track_id.as_deref().unwrap_or("-"),
                "status"
            );
        });

    let controller = Controller::new(
        codecs,
        sinks,
        saved.player_audio_device.clone(),
        None,
        Some(status_callback),
    );

    let restored_repeat_mode = RepeatMode::from_persisted(saved.player_repeat_mode);
    if !queue.is_empty() {
        controller.set_tracks(queue);
        controller.set_volume(Some(saved.player_volume), None, Some(saved.player_muted));
        controller.set_repeat_mode(restored_repeat_mode);
        if let Some(pos) = saved.player_queue_position {
            if let Err(e) = controller.set_track(pos) {
                warn!(error = %e, "could not restore saved queue position");
            }
        }
    } else {
        controller.set_volume(Some(saved.player_volume), None, Some(saved.player_muted));
        controller.set_repeat_mode(restored_repeat_mode);
    }

    run_command_loop(&controller);

    info!("shutting down, persisting player state");
    controller.stop();
    if let Err(e) = persist(&config_manager, &saved, &controller) {
        error!(error = %e, "failed to persist player state on shutdown");
    }
    info!("netplayer daemon exiting");
    Ok(())
}

fn persist(
    config_manager: &ConfigManager,
    previous: &config::PlayerConfig,
    controller: &Controller,
) -> Result<(), config::ConfigError> {
    let (volume, muted) = controller.get_volume();
    let mut cfg = previous.clone();
    cfg.player_volume = volume;
    cfg.player_muted = muted;
    cfg.player_repeat_mode = controller.get_repeat_mode().into();
    cfg.player_audio_device = controller.device_string();
    cfg.player_queue_position = controller.queue_cursor_position();
    cfg.set_queue(&controller.snapshot_queue())?;
    config_manager.save_player_config(&cfg)
}

/// A handful of commands sufficient to exercise the whole `Controller`
/// surface from a terminal: `add <url> [format_type]`, `play`, `pause`,
/// `stop`, `next <position>`, `shuffle`, `volume <0..1>`, `status`, `quit`.
fn run_command_loop(controller: &Arc<Controller>) {
    let stdin = io::stdin();
    print_help();
    loop {
        print!("netplayer> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                info!("stdin closed, shutting down");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "error reading command");
                break;
            }
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else { continue };
        match cmd {
            "quit" | "exit" => break,
            "help" => print_help(),
            "add" => {
                let Some(url) = parts.next() else {
                    println!("usage: add <url> [format_type]");
                    continue;
                };
                let format_type = parts.next().unwrap_or("audio/mpeg").to_string();
                let track = Track::new(url, url, TrackKind::Track).with_streaming_refs(vec![StreamRef {
                    format_type,
                    url: url.to_string(),
                    sample_rate: None,
                    channels: None,
                }]);
                controller.add_tracks(None, vec![track]);
                println!("added");
            }
            "play" => report(controller.play(true)),
            "pause" => report(controller.play(false)),
            "stop" => {
                controller.stop();
                println!("stopped");
            }
            "next" => {
                let Some(pos) = parts.next().and_then(|s| s.parse::<u64>().ok()) else {
                    println!("usage: next <position>");
                    continue;
                };
                report(controller.set_track(pos));
            }
            "remove" => {
                let Some(id) = parts.next() else {
                    println!("usage: remove <track-id>");
                    continue;
                };
                report(controller.remove_tracks(&[ItemRef { id: id.to_string(), position: None }]));
            }
            "shuffle" => report(controller.shuffle_tracks(None, None)),
            "mode" => {
                let mode = match parts.next() {
                    Some("queue") => QueueModeDto::Queue,
                    Some("shuffle") => QueueModeDto::Shuffle,
                    Some("repeat-queue") => QueueModeDto::RepeatQueue,
                    Some("repeat-item") => QueueModeDto::RepeatItem,
                    Some("repeat-shuffle") => QueueModeDto::RepeatShuffle,
                    _ => {
                        println!("usage: mode <queue|shuffle|repeat-queue|repeat-item|repeat-shuffle>");
                        continue;
                    }
                };
                controller.set_playback_queue_mode(mode);
            }
            "volume" => {
                let Some(level) = parts.next().and_then(|s| s.parse::<f64>().ok()) else {
                    println!("usage: volume <0.0..1.0>");
                    continue;
                };
                controller.set_volume(Some(level), None, None);
            }
            "status" => {
                let status = controller.get_player_status();
                println!("{status:?}");
            }
            other => println!("unknown command: {other} (try `help`)"),
        }
    }
}

fn report(result: Result<(), netplayer_proto::CommandError>) {
    if let Err(e) = result {
        println!("error: {e}");
    }
}

fn print_help() {
    println!(
        "commands: add <url> [format_type] | play | pause | stop | next <pos> | remove <id> \
         | shuffle | mode <queue|shuffle|repeat-queue|repeat-item|repeat-shuffle> | volume <0..1> \
         | status | quit"
    );
}
