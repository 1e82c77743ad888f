// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Play/pause/stop state machine and queue mutation surface (spec §4.6),
//! driven by the (out-of-scope) remote-control layer through the command
//! surface in spec §6.
//!
//! Exactly one `Controller` owns the `Queue` and at most one running
//! `Pipeline` at a time (spec §3 "Ownership summary"). All commands funnel
//! through `inner`'s lock, so state-machine transitions never race each
//! other (spec §5).

use crate::decoder::{CodecRegistry, IcyMetadata};
use crate::pipeline::{IdentityResolver, Pipeline, PipelineOutcome, ServiceResolver};
use crate::queue::{ItemRef, Ordering as QueueOrdering, Queue, QueueError};
use crate::sink::{SinkRegistry, StopMode};
use crate::track::Track;
use netplayer_proto::{now_millis, CommandError, ErrorCode, PlayerStatusDto, QueueModeDto};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Global transport state (spec §3 "Global player state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stop,
    Play,
    Pause,
}

/// Internal repeat/shuffle behaviour driving end-of-pipeline handling
/// (spec §4.6). The six `QueueModeDto` wire values collapse onto this
/// four-value set plus a one-time `shuffle()` queue mutation — see
/// `set_playback_queue_mode` and DESIGN.md's Open Question on `dynamic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    Off,
    Item,
    Queue,
    Shuffle,
}

impl From<RepeatMode> for QueueModeDto {
    fn from(mode: RepeatMode) -> Self {
        match mode {
            RepeatMode::Off => QueueModeDto::Queue,
            RepeatMode::Item => QueueModeDto::RepeatItem,
            RepeatMode::Queue => QueueModeDto::RepeatQueue,
            RepeatMode::Shuffle => QueueModeDto::RepeatShuffle,
        }
    }
}

/// Persisted-state int encoding (spec §6: `player_repeat_mode (int 0..3)`),
/// matching the original daemon's `PlayerRepeatMode` discriminant order
/// (`PlayerRepeatOff`/`Item`/`Queue`/`Shuffle` = 0..3).
impl From<RepeatMode> for u8 {
    fn from(mode: RepeatMode) -> Self {
        match mode {
            RepeatMode::Off => 0,
            RepeatMode::Item => 1,
            RepeatMode::Queue => 2,
            RepeatMode::Shuffle => 3,
        }
    }
}

impl RepeatMode {
    /// Decodes the persisted int; out-of-range values fall back to `Off`,
    /// the same default the original daemon starts with.
    pub fn from_persisted(v: u8) -> Self {
        match v {
            1 => RepeatMode::Item,
            2 => RepeatMode::Queue,
            3 => RepeatMode::Shuffle,
            _ => RepeatMode::Off,
        }
    }
}

struct Inner {
    queue: Queue,
    play_state: PlayState,
    volume: f64,
    muted: bool,
    repeat_mode: RepeatMode,
    last_change: i64,
    pipeline: Option<Pipeline>,
    device_string: String,
    bearer_token: Option<String>,
    /// Consecutive automatic-advance failures since the last successful
    /// start or explicit command; guards against looping forever over a
    /// queue where every remaining track is unreachable (spec §7
    /// "recoverable at the Pipeline layer... Controller chooses the next
    /// action" doesn't bound retries, so we bound them here).
    consecutive_failures: usize,
}

/// Play/pause/stop state machine, queue owner, and Pipeline supervisor.
/// Must be held in an `Arc` (see [`Controller::new`]) because pipeline
/// completion is reported from a background monitor thread.
pub struct Controller {
    inner: Mutex<Inner>,
    codecs: CodecRegistry,
    sinks: SinkRegistry,
    resolver: Arc<dyn ServiceResolver>,
    /// Pushed to the (out-of-scope) remote-control layer on track
    /// boundaries and ICY metadata changes (spec §6 "streaming metadata
    /// surface"): no more than one per 250 ms seek-position poll, exactly
    /// one per metadata change.
    status_callback: Option<Arc<dyn Fn(PlayerStatusDto) + Send + Sync>>,
    last_status_emit: Mutex<Instant>,
    self_weak: Weak<Controller>,
}

impl Controller {
    pub fn new(
        codecs: CodecRegistry,
        sinks: SinkRegistry,
        device_string: impl Into<String>,
        bearer_token: Option<String>,
        status_callback: Option<Arc<dyn Fn(PlayerStatusDto) + Send + Sync>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Controller {
            inner: Mutex::new(Inner {
                queue: Queue::new(),
                play_state: PlayState::Stop,
                volume: 1.0,
                muted: false,
                repeat_mode: RepeatMode::Off,
                last_change: now_millis(),
                pipeline: None,
                device_string: device_string.into(),
                bearer_token,
                consecutive_failures: 0,
            }),
            codecs,
            sinks,
            resolver: Arc::new(IdentityResolver),
            status_callback,
            last_status_emit: Mutex::new(Instant::now()),
            self_weak: weak.clone(),
        })
    }

    /// `addTracks` (spec §6): insert `items` before `position`, or append.
    pub fn add_tracks(&self, position: Option<u64>, items: Vec<Track>) {
        let mut inner = self.inner.lock();
        inner.queue.add(position, position, items, false);
        self.emit_status(&inner);
    }

    /// `setTracks` (spec §6): replace the queue wholesale, reset the cursor.
    pub fn set_tracks(&self, items: Vec<Track>) {
        let mut inner = self.inner.lock();
        let was_playing = inner.play_state == PlayState::Play;
        self.stop_pipeline_locked(&mut inner, StopMode::Drop);
        inner.queue.add(None, None, items, true);
        inner.play_state = PlayState::Stop;
        inner.consecutive_failures = 0;
        inner.last_change = now_millis();
        drop(inner);
        let _ = was_playing; // replacing the queue always lands in Stop (spec §6 "reset cursor")
        self.emit_status(&self.inner.lock());
    }

    /// `removeTracks` (spec §6).
    pub fn remove_tracks(&self, refs: &[ItemRef]) -> Result<(), CommandError> {
        let mut inner = self.inner.lock();
        inner.queue.remove(refs).map_err(queue_error_to_command)?;
        inner.last_change = now_millis();
        self.emit_status(&inner);
        Ok(())
    }

    /// `moveTracks` (spec §6).
    pub fn move_tracks(
        &self,
        order: QueueOrdering,
        target_position: u64,
        refs: &[ItemRef],
    ) -> Result<(), CommandError> {
        let mut inner = self.inner.lock();
        inner.queue.move_items(order, target_position, refs).map_err(queue_error_to_command)?;
        inner.last_change = now_millis();
        Ok(())
    }

    /// `shuffleTracks` (spec §6): shuffle the mapped ordering over
    /// `[start, end)`, defaulting to the whole queue.
    pub fn shuffle_tracks(&self, start: Option<u64>, end: Option<u64>) -> Result<(), CommandError> {
        let mut inner = self.inner.lock();
        let len = inner.queue.len();
        let start = start.unwrap_or(0) as usize;
        let end = end.map(|e| e as usize).unwrap_or(len);
        inner.queue.shuffle(start, end, false).map_err(queue_error_to_command)?;
        inner.last_change = now_millis();
        Ok(())
    }

    /// `setPlaybackQueueMode` (spec §6). `Queue` and `Shuffle` are one-time
    /// orderings (no repeat); `RepeatQueue`/`RepeatItem`/`RepeatShuffle` set
    /// the corresponding internal [`RepeatMode`]. `Dynamic` (continuous
    /// recommendation-fed queueing) has no core counterpart — see
    /// DESIGN.md — and is treated as `Off`.
    pub fn set_playback_queue_mode(&self, mode: QueueModeDto) {
        let mut inner = self.inner.lock();
        match mode {
            QueueModeDto::Queue => inner.repeat_mode = RepeatMode::Off,
            QueueModeDto::Shuffle => {
                let len = inner.queue.len();
                let _ = inner.queue.shuffle(0, len, true);
                inner.repeat_mode = RepeatMode::Off;
            }
            QueueModeDto::RepeatQueue => inner.repeat_mode = RepeatMode::Queue,
            QueueModeDto::RepeatItem => inner.repeat_mode = RepeatMode::Item,
            QueueModeDto::RepeatShuffle => {
                let len = inner.queue.len();
                let _ = inner.queue.shuffle(0, len, true);
                inner.repeat_mode = RepeatMode::Shuffle;
            }
            QueueModeDto::Dynamic => {
                tracing::warn!("setPlaybackQueueMode(dynamic) has no core implementation; treating as Off");
                inner.repeat_mode = RepeatMode::Off;
            }
        }
        inner.last_change = now_millis();
        self.emit_status(&inner);
    }

    /// `setVolume` (spec §6). Routed sink → codec → cached, per spec §4.6 and
    /// §9's note that some backends never report `has_volume = true`: the
    /// cached value is always kept up to date regardless of where it was
    /// actually applied, so the next Pipeline picks it up.
    pub fn set_volume(&self, level: Option<f64>, relative: Option<f64>, muted: Option<bool>) {
        let mut inner = self.inner.lock();
        if let Some(level) = level {
            inner.volume = level.clamp(0.0, 1.0);
        }
        if let Some(delta) = relative {
            inner.volume = (inner.volume + delta).clamp(0.0, 1.0);
        }
        if let Some(muted) = muted {
            inner.muted = muted;
        }
        let (volume, muted) = (inner.volume, inner.muted);
        apply_volume_to_running_pipeline(&inner, volume, muted);
        inner.last_change = now_millis();
        self.emit_status(&inner);
    }

    /// `play` (spec §6): `playing = true` transitions Stop/Pause → Play;
    /// `playing = false` transitions Play → Pause. A repeated command in
    /// the already-reached state is a no-op (idempotent).
    pub fn play(&self, playing: bool) -> Result<(), CommandError> {
        let mut inner = self.inner.lock();
        match (inner.play_state, playing) {
            (PlayState::Stop, true) => {
                inner.consecutive_failures = 0;
                self.start_cursor_pipeline_with_failover(&mut inner)?
            }
            (PlayState::Pause, true) => {
                if let Some(pipeline_sink_result) = self.pause_running_pipeline(&inner, false) {
                    pipeline_sink_result.map_err(|e| CommandError::generic(e.to_string()))?;
                }
                inner.play_state = PlayState::Play;
                inner.last_change = now_millis();
            }
            (PlayState::Play, true) => {}
            (PlayState::Play, false) => {
                if let Some(pipeline_sink_result) = self.pause_running_pipeline(&inner, true) {
                    pipeline_sink_result.map_err(|e| CommandError::generic(e.to_string()))?;
                }
                inner.play_state = PlayState::Pause;
                inner.last_change = now_millis();
            }
            (PlayState::Stop, false) | (PlayState::Pause, false) => {
                tracing::warn!("play(false) ignored: player is not currently playing");
            }
        }
        self.emit_status(&inner);
        Ok(())
    }

    /// Explicit stop: joins the running Pipeline (Drop) and returns to
    /// `Stop`. Idempotent.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        self.stop_pipeline_locked(&mut inner, StopMode::Drop);
        inner.play_state = PlayState::Stop;
        inner.last_change = now_millis();
        self.emit_status(&inner);
    }

    /// `setTrack` (spec §6): move the cursor and, if not stopped, restart
    /// the Pipeline for the new track.
    pub fn set_track(&self, playback_queue_pos: u64) -> Result<(), CommandError> {
        let mut inner = self.inner.lock();
        inner.queue.set_cursor_position(playback_queue_pos).map_err(queue_error_to_command)?;
        inner.consecutive_failures = 0;
        match inner.play_state {
            PlayState::Play => {
                self.stop_pipeline_locked(&mut inner, StopMode::Drop);
                self.start_cursor_pipeline_with_failover(&mut inner)?;
            }
            PlayState::Pause => {
                self.stop_pipeline_locked(&mut inner, StopMode::Drop);
                inner.play_state = PlayState::Stop;
            }
            PlayState::Stop => {}
        }
        inner.last_change = now_millis();
        self.emit_status(&inner);
        Ok(())
    }

    pub fn get_player_status(&self) -> PlayerStatusDto {
        self.status_dto(&self.inner.lock())
    }

    pub fn get_seek_position(&self) -> Option<std::time::Duration> {
        self.inner.lock().pipeline.as_ref().map(|p| p.seek_position())
    }

    pub fn get_track(&self) -> Option<Track> {
        self.inner.lock().queue.get_cursor_item().cloned()
    }

    pub fn get_volume(&self) -> (f64, bool) {
        let inner = self.inner.lock();
        (inner.volume, inner.muted)
    }

    pub fn get_repeat_mode(&self) -> RepeatMode {
        self.inner.lock().repeat_mode
    }

    /// Restores a persisted repeat mode directly, without the one-time
    /// queue shuffle that `set_playback_queue_mode`'s `Shuffle`/
    /// `RepeatShuffle` wire values trigger — loading saved state should not
    /// re-shuffle the already-persisted queue order.
    pub fn set_repeat_mode(&self, mode: RepeatMode) {
        let mut inner = self.inner.lock();
        inner.repeat_mode = mode;
        inner.last_change = now_millis();
    }

    pub fn device_string(&self) -> String {
        self.inner.lock().device_string.clone()
    }

    /// Full queue contents in mapped (play) order, for persisting
    /// `player_queue` (spec §6).
    pub fn snapshot_queue(&self) -> Vec<Track> {
        let inner = self.inner.lock();
        let len = inner.queue.len();
        (0..len as u64)
            .map(|p| inner.queue.get_item(QueueOrdering::Mapped, p).expect("within bounds").clone())
            .collect()
    }

    /// Cursor position within the mapped ordering, for persisting
    /// `player_queue_position` (spec §6).
    pub fn queue_cursor_position(&self) -> Option<u64> {
        self.inner.lock().queue.cursor_position()
    }

    // --- internals ---------------------------------------------------

    fn pause_running_pipeline(&self, inner: &Inner, pause_on: bool) -> Option<Result<(), crate::sink::SinkError>> {
        // Pausing is a sink-level operation the monitor thread doesn't
        // mediate; Controller doesn't hold the sink handle directly (the
        // Pipeline's monitor thread owns it), so pause is routed through a
        // dedicated Pipeline accessor instead of reaching into internals.
        inner.pipeline.as_ref().map(|p| p.request_pause(pause_on))
    }

    fn start_cursor_pipeline(&self, inner: &mut Inner) -> Result<(), CommandError> {
        let Some(track) = inner.queue.get_cursor_item().cloned() else {
            return Err(CommandError::new(ErrorCode::InvalidRequest, "queue is empty or cursor is past the end"));
        };
        let track_id = track.id.clone();
        let volume = (inner.volume, inner.muted);
        let device_string = inner.device_string.clone();
        let bearer_token = inner.bearer_token.clone();
        let weak = self.self_weak.clone();
        let meta_weak = self.self_weak.clone();
        let on_metadata: Arc<dyn Fn(IcyMetadata) + Send + Sync> = Arc::new(move |meta| {
            if let Some(controller) = meta_weak.upgrade() {
                controller.handle_metadata(meta);
            }
        });

        match Pipeline::start(
            &track,
            self.resolver.as_ref(),
            &self.codecs,
            &self.sinks,
            &device_string,
            bearer_token,
            volume,
            on_metadata,
            move |outcome| {
                if let Some(controller) = weak.upgrade() {
                    controller.handle_pipeline_end(track_id, outcome);
                }
            },
        ) {
            Ok(pipeline) => {
                inner.pipeline = Some(pipeline);
                inner.play_state = PlayState::Play;
                inner.consecutive_failures = 0;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "pipeline failed to start for cursor track");
                Err(CommandError::generic(e.to_string()))
            }
        }
    }

    fn stop_pipeline_locked(&self, inner: &mut Inner, mode: StopMode) {
        if let Some(pipeline) = inner.pipeline.take() {
            pipeline.stop(mode);
        }
    }

    /// Advance the cursor according to `repeat_mode` after a pipeline
    /// outcome, implementing the end-of-pipeline repeat-mode table (spec
    /// §4.6) literally: `Item` keeps the cursor and retries the same track
    /// regardless of success or failure, exactly as spec.md states with no
    /// success/failure distinction. `consecutive_failures` (see `Inner`)
    /// is what keeps a permanently broken `Item`-mode track from looping
    /// forever, not a mode downgrade here. Returns `true` if there's a
    /// track to try next.
    fn advance_after_outcome(&self, inner: &mut Inner) -> bool {
        match inner.repeat_mode {
            RepeatMode::Off => inner.queue.advance_cursor(),
            RepeatMode::Item => true, // cursor unchanged
            RepeatMode::Queue => {
                if !inner.queue.advance_cursor() {
                    inner.queue.wrap_cursor();
                }
                true
            }
            RepeatMode::Shuffle => {
                let len = inner.queue.len();
                let _ = inner.queue.shuffle(0, len, false);
                inner.queue.wrap_cursor();
                true
            }
        }
    }

    /// Start the pipeline for the cursor track, and if it fails to start,
    /// keep advancing per `advance_after_outcome` and retrying until one
    /// starts, the queue gives out, or every track has been tried (spec §8
    /// scenario 3: a synchronous start failure gets the same auto-advance
    /// treatment as an async mid-stream failure in `handle_pipeline_end`).
    fn start_cursor_pipeline_with_failover(&self, inner: &mut Inner) -> Result<(), CommandError> {
        loop {
            match self.start_cursor_pipeline(inner) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    inner.consecutive_failures += 1;
                    let queue_len = inner.queue.len().max(1);
                    if inner.consecutive_failures > queue_len {
                        tracing::error!("every track in the queue failed to play; stopping");
                        inner.play_state = PlayState::Stop;
                        return Err(e);
                    }
                    let advanced = self.advance_after_outcome(inner);
                    if !advanced || inner.queue.get_cursor_item().is_none() {
                        inner.play_state = PlayState::Stop;
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Invoked from a Pipeline's monitor thread when it reaches a terminal
    /// state. Implements the end-of-pipeline repeat-mode table (spec §4.6).
    fn handle_pipeline_end(&self, finished_track_id: String, outcome: PipelineOutcome) {
        let mut inner = self.inner.lock();
        // A command (setTrack/stop/new play) may have already replaced or
        // torn down this pipeline before its monitor thread's callback ran;
        // only react if we're still looking at the same track's pipeline.
        let still_current = inner
            .pipeline
            .as_ref()
            .map(|p| p.track_id() == finished_track_id)
            .unwrap_or(true);
        if inner.play_state != PlayState::Play || !still_current {
            return;
        }
        inner.pipeline = None;

        let succeeded = matches!(outcome, PipelineOutcome::Ok);
        if succeeded {
            inner.consecutive_failures = 0;
        } else {
            inner.consecutive_failures += 1;
            let queue_len = inner.queue.len().max(1);
            if inner.consecutive_failures > queue_len {
                tracing::error!("every track in the queue failed to play; stopping");
                inner.play_state = PlayState::Stop;
                self.emit_status(&inner);
                return;
            }
        }

        let advanced = self.advance_after_outcome(&mut inner);
        if !advanced || inner.queue.get_cursor_item().is_none() {
            inner.play_state = PlayState::Stop;
            self.emit_status(&inner);
            return;
        }

        if let Err(e) = self.start_cursor_pipeline_with_failover(&mut inner) {
            tracing::warn!(error = %e, "failed to start next pipeline after end-of-track");
            inner.play_state = PlayState::Stop;
        }
        self.emit_status(&inner);
    }

    fn handle_metadata(&self, metadata: IcyMetadata) {
        if let Some(cb) = &self.status_callback {
            let inner = self.inner.lock();
            let mut status = self.status_dto(&inner);
            status.current_track_id =
                status.current_track_id.or_else(|| metadata.get("StreamTitle").cloned());
            cb(status);
        }
    }

    fn status_dto(&self, inner: &Inner) -> PlayerStatusDto {
        PlayerStatusDto {
            playing: inner.play_state == PlayState::Play,
            paused: inner.play_state == PlayState::Pause,
            volume: inner.volume,
            muted: inner.muted,
            repeat_mode: inner.repeat_mode.into(),
            current_track_id: inner.queue.get_cursor_item().map(|t| t.id.clone()),
            seek_position_ms: inner.pipeline.as_ref().map(|p| p.seek_position().as_millis() as u64),
            last_changed: inner.last_change,
        }
    }

    /// Push a status update no more than once per 250 ms (spec §6).
    fn emit_status(&self, inner: &Inner) {
        let Some(cb) = &self.status_callback else { return };
        let mut last = self.last_status_emit.lock();
        if last.elapsed() < std::time::Duration::from_millis(250) {
            return;
        }
        *last = Instant::now();
        cb(self.status_dto(inner));
    }
}

fn apply_volume_to_running_pipeline(inner: &Inner, volume: f64, muted: bool) {
    if let Some(pipeline) = &inner.pipeline {
        pipeline.set_volume(volume, muted);
    }
}

fn queue_error_to_command(e: QueueError) -> CommandError {
    CommandError::invalid_params(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackKind;

    fn track(id: &str) -> Track {
        Track::new(id, id, TrackKind::Track)
    }

    #[test]
    fn play_on_empty_queue_reports_invalid_request() {
        let controller = Controller::new(CodecRegistry::with_default_codecs(), SinkRegistry::with_default_backends(), "null", None, None);
        let err = controller.play(true).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn set_tracks_resets_cursor_and_stops() {
        let controller = Controller::new(CodecRegistry::with_default_codecs(), SinkRegistry::with_default_backends(), "null", None, None);
        controller.set_tracks(vec![track("a"), track("b")]);
        let status = controller.get_player_status();
        assert!(!status.playing);
        assert_eq!(status.current_track_id.as_deref(), Some("a"));
    }

    #[test]
    fn pause_before_play_is_ignored_without_error() {
        let controller = Controller::new(CodecRegistry::with_default_codecs(), SinkRegistry::with_default_backends(), "null", None, None);
        controller.set_tracks(vec![track("a")]);
        controller.play(false).unwrap();
        let status = controller.get_player_status();
        assert!(!status.playing && !status.paused);
    }

    #[test]
    fn set_volume_clamps_to_unit_range() {
        let controller = Controller::new(CodecRegistry::with_default_codecs(), SinkRegistry::with_default_backends(), "null", None, None);
        controller.set_volume(Some(1.5), None, None);
        assert_eq!(controller.get_volume().0, 1.0);
        controller.set_volume(Some(-1.0), None, None);
        assert_eq!(controller.get_volume().0, 0.0);
    }

    #[test]
    fn set_playback_queue_mode_maps_dynamic_to_off() {
        let controller = Controller::new(CodecRegistry::with_default_codecs(), SinkRegistry::with_default_backends(), "null", None, None);
        controller.set_playback_queue_mode(QueueModeDto::Dynamic);
        let status = controller.get_player_status();
        assert_eq!(status.repeat_mode, QueueModeDto::Queue);
    }
}
