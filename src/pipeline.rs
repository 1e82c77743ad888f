// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The per-track Feeder + Decoder + Sink triple (spec §4.5), the
//! orchestration heart of the core.
//!
//! [`Pipeline::start`] performs format negotiation synchronously (trying
//! each of the track's streaming refs in order, per §4.5 steps 1-5) and, on
//! success, hands the running Feeder/Decoder/Sink off to a monitor thread
//! that polls for completion, publishes seek position, and tears everything
//! down on end-of-track or error (§4.5 steps 6-7). The `Pipeline` handle
//! returned to the caller keeps `Arc` handles to the sink and decoder only
//! for `pause`/`set_volume` (both `&self` operations); the monitor thread
//! remains the sole owner of the Feeder and the sole caller of `play`/
//! `stop`, so there is never more than one in-flight teardown.

use crate::decoder::{CodecRegistry, DecoderCallbacks, DecoderInstance, DecoderState};
use crate::feeder::{Feeder, FeederState};
use crate::fifo::Fifo;
use crate::format::AudioFormat;
use crate::sink::{SinkInterface, SinkRegistry, StopMode};
use crate::track::Track;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// How often the monitor thread polls the decoder for end-of-track and
/// refreshes the published seek position (spec §4.5 step 6).
const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Bounded wait a pipeline gives a feeder to reach `Connected` or a terminal
/// state before giving up on a streaming ref.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default capacity of the PCM fifo between decoder and sink (spec §3).
const PCM_FIFO_CAPACITY: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no streaming ref of track {0:?} could be opened")]
    NoUsableStreamingRef(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Initialized,
    Running,
    Terminating,
    EndOfTrack,
    TerminatedOk,
    TerminatedError,
}

/// Outcome handed to the caller's `on_end` callback when the monitor thread
/// finishes tearing the pipeline down.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Ok,
    Error(String),
}

/// Resolves a streaming ref's `url`, handling the `service://` scheme
/// against whatever service registry the caller has (out of scope here;
/// the default resolver is the identity function for ordinary `http(s)://`
/// URLs).
pub trait ServiceResolver: Send + Sync {
    fn resolve(&self, url: &str) -> String;
}

pub struct IdentityResolver;
impl ServiceResolver for IdentityResolver {
    fn resolve(&self, url: &str) -> String {
        url.to_string()
    }
}

struct Shared {
    state: Mutex<PipelineState>,
    seek_position: Mutex<Duration>,
    format: Arc<Mutex<AudioFormat>>,
    cancel: AtomicBool,
    requested_stop_mode: Mutex<Option<StopMode>>,
    ended: Condvar,
    /// Shared with the monitor thread so [`Pipeline::request_pause`] and
    /// [`Pipeline::set_volume`] can act without owning the Feeder/Decoder/
    /// Sink triple themselves. All three traits keep their mutable state
    /// behind interior mutability, so concurrent `&self` calls from here
    /// and from the monitor's teardown path are safe.
    sink: Arc<dyn SinkInterface>,
    decoder: Arc<dyn DecoderInstance>,
}

/// A running (or just-finished) per-track pipeline. Dropping a `Pipeline`
/// without calling [`Pipeline::stop`] first is equivalent to `stop(Force)`
/// — the monitor thread is left to finish on its own, matching the "Force"
/// policy's "do not join threads" semantics (spec §5).
pub struct Pipeline {
    track_id: String,
    shared: Arc<Shared>,
    monitor: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Pipeline {
    /// Negotiate and start a pipeline for `track`, trying its streaming
    /// refs in order (spec §4.5 steps 1-5). `initial_volume` is applied to
    /// whichever layer can take it (sink if it has hardware volume, else
    /// the decoder's software attenuation — spec §4.6 routing). `on_end`
    /// fires exactly once, from the monitor thread, when the pipeline
    /// reaches a terminal state.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        track: &Track,
        resolver: &dyn ServiceResolver,
        codecs: &CodecRegistry,
        sinks: &SinkRegistry,
        device_string: &str,
        bearer_token: Option<String>,
        initial_volume: (f64, bool),
        on_metadata: Arc<dyn Fn(crate::decoder::IcyMetadata) + Send + Sync>,
        on_end: impl FnOnce(PipelineOutcome) + Send + 'static,
    ) -> Result<Self, PipelineError> {
        for streaming_ref in &track.streaming_refs {
            let resolved_url = resolver.resolve(&streaming_ref.url);
            let declared = streaming_ref.declared_format();
            let Some((codec, negotiated)) = codecs.find_codec(&streaming_ref.format_type, &declared)
            else {
                tracing::debug!(format_type = %streaming_ref.format_type, "no codec for streaming ref, trying next");
                continue;
            };

            // Candidate formats to offer the sink: the codec-completed
            // format first, then (if the ref was incomplete) each of the
            // codec's other default-format completions, per §4.5 step 2.
            let mut candidates = vec![negotiated];
            if !declared.is_complete() {
                for default in codec.default_formats() {
                    let completed = declared.complete(default);
                    if completed.is_complete() && !candidates.contains(&completed) {
                        candidates.push(completed);
                    }
                }
            }

            let pcm_fifo = Arc::new(Fifo::new(PCM_FIFO_CAPACITY));
            let Some((sink_if, accepted_format)) =
                open_sink_with_candidates(sinks, device_string, &candidates, &pcm_fifo)
            else {
                tracing::warn!(track_id = %track.id, "sink rejected every candidate format, trying next ref");
                continue;
            };

            let feeder = Feeder::start(resolved_url.clone(), bearer_token.clone(), true);
            let feeder_state = feeder.wait_connected(CONNECT_TIMEOUT);
            if feeder_state != FeederState::Connected {
                tracing::warn!(url = %resolved_url, ?feeder_state, "feeder failed to connect, trying next ref");
                let _ = sink_if.stop(StopMode::Drop);
                continue;
            }

            let Some(reader) = feeder.take_reader() else {
                let _ = sink_if.stop(StopMode::Drop);
                continue;
            };

            if sink_if.has_volume() {
                let _ = sink_if.set_volume(initial_volume.0, initial_volume.1);
            }

            let format_holder = Arc::new(Mutex::new(accepted_format));
            let format_for_callback = Arc::clone(&format_holder);
            let icy_interval = feeder.icy_interval();
            let callbacks = DecoderCallbacks {
                on_format: Arc::new(move |announced: AudioFormat| {
                    *format_for_callback.lock() = announced;
                }),
                on_metadata: Arc::clone(&on_metadata),
            };

            let decoder_instance: Arc<dyn DecoderInstance> =
                Arc::from(codec.spawn(Box::new(reader), Arc::clone(&pcm_fifo), accepted_format, icy_interval, callbacks));
            if !sink_if.has_volume() {
                let _ = decoder_instance.set_volume(initial_volume.0, initial_volume.1);
            }

            let shared = Arc::new(Shared {
                state: Mutex::new(PipelineState::Running),
                seek_position: Mutex::new(Duration::ZERO),
                format: format_holder,
                cancel: AtomicBool::new(false),
                requested_stop_mode: Mutex::new(None),
                ended: Condvar::new(),
                sink: Arc::clone(&sink_if),
                decoder: Arc::clone(&decoder_instance),
            });

            let monitor_shared = Arc::clone(&shared);
            let monitor = std::thread::Builder::new()
                .name("netplayer-pipeline".into())
                .spawn(move || {
                    run_monitor(monitor_shared, feeder, decoder_instance, sink_if, on_end);
                })
                .expect("spawn pipeline monitor thread");

            return Ok(Self { track_id: track.id.clone(), shared, monitor: Mutex::new(Some(monitor)) });
        }

        Err(PipelineError::NoUsableStreamingRef(track.id.clone()))
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn state(&self) -> PipelineState {
        *self.shared.state.lock()
    }

    pub fn seek_position(&self) -> Duration {
        *self.shared.seek_position.lock()
    }

    pub fn format(&self) -> AudioFormat {
        *self.shared.format.lock()
    }

    /// Request termination per `mode` and (unless `Force`) block until the
    /// monitor thread has finished tearing everything down.
    pub fn stop(&self, mode: StopMode) {
        *self.shared.requested_stop_mode.lock() = Some(mode);
        self.shared.cancel.store(true, AtomicOrdering::SeqCst);
        if mode == StopMode::Force {
            return;
        }
        if let Some(handle) = self.monitor.lock().take() {
            let _ = handle.join();
        }
    }

    /// Pause or resume the sink in place, if it supports it (spec §4.6).
    pub fn request_pause(&self, on: bool) -> Result<(), crate::sink::SinkError> {
        self.shared.sink.pause(on)
    }

    /// Apply a volume change to whichever layer is actually doing volume
    /// for this pipeline: the sink if it has hardware volume, else the
    /// decoder's software attenuation (spec §4.6 routing).
    pub fn set_volume(&self, volume: f64, muted: bool) {
        if self.shared.sink.has_volume() {
            if let Err(e) = self.shared.sink.set_volume(volume, muted) {
                tracing::warn!(error = %e, "sink rejected volume change");
            }
        } else if let Err(e) = self.shared.decoder.set_volume(volume, muted) {
            tracing::debug!(error = %e, "decoder does not support software volume");
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Equivalent to `stop(Force)` if the caller never called `stop`:
        // request cancellation but don't block the dropping thread.
        self.shared.cancel.store(true, AtomicOrdering::SeqCst);
        if self.shared.requested_stop_mode.lock().is_none() {
            *self.shared.requested_stop_mode.lock() = Some(StopMode::Drop);
        }
    }
}

/// Try each candidate format against a freshly opened sink interface until
/// one is accepted (spec §4.5 step 2). On success the returned interface is
/// already `Running` and draining `pcm_fifo`; on failure the device is
/// reopened for the next candidate since a rejected `play()` may leave the
/// interface in an indeterminate state.
fn open_sink_with_candidates(
    sinks: &SinkRegistry,
    device_string: &str,
    candidates: &[AudioFormat],
    pcm_fifo: &Arc<Fifo>,
) -> Option<(Arc<dyn SinkInterface>, AudioFormat)> {
    for &candidate in candidates {
        if !candidate.is_complete() {
            continue;
        }
        let sink_if: Arc<dyn SinkInterface> = match sinks.open(device_string) {
            Ok(s) => Arc::from(s),
            Err(e) => {
                tracing::warn!(device = %device_string, error = %e, "could not open sink device");
                return None;
            }
        };
        match sink_if.play(candidate, Arc::clone(pcm_fifo)) {
            Ok(()) => return Some((sink_if, candidate)),
            Err(e) => {
                tracing::debug!(%candidate, error = %e, "sink rejected candidate format");
                continue;
            }
        }
    }
    None
}

#[allow(clippy::too_many_arguments)]
fn run_monitor(
    shared: Arc<Shared>,
    feeder: Feeder,
    decoder: Arc<dyn DecoderInstance>,
    sink_if: Arc<dyn SinkInterface>,
    on_end: impl FnOnce(PipelineOutcome),
) {
    let outcome = loop {
        if shared.cancel.load(AtomicOrdering::SeqCst) {
            decoder.terminate();
            feeder.terminate();
            break PipelineOutcome::Ok;
        }
        // The sink can die on its own (device unplugged, repeated underrun
        // recovery failure — spec §4.4/§7 "Device" errors); catch that here
        // too, not just decoder end-of-track, so a dead sink doesn't leave
        // the pipeline polling a decoder that will never drain.
        if sink_if.state() == crate::sink::SinkState::TerminatedError {
            break PipelineOutcome::Error("sink terminated with error".into());
        }
        let state = decoder.wait_for_end(POLL_INTERVAL);
        if let Ok(pos) = decoder.get_seek_time() {
            *shared.seek_position.lock() = pos;
        }
        match state {
            DecoderState::TerminatedOk | DecoderState::EndOfTrack => break PipelineOutcome::Ok,
            DecoderState::TerminatedError => break PipelineOutcome::Error("decoder terminated with error".into()),
            _ => continue,
        }
    };

    let was_cancelled = shared.cancel.load(AtomicOrdering::SeqCst);
    let requested: Option<StopMode> = *shared.requested_stop_mode.lock();
    let stop_mode = requested.unwrap_or(match outcome {
        PipelineOutcome::Ok if !was_cancelled => StopMode::Drain,
        _ => StopMode::Drop,
    });
    if let Err(e) = sink_if.stop(stop_mode) {
        tracing::warn!(error = %e, "sink failed to stop cleanly");
    }
    feeder.terminate();
    decoder.terminate();

    *shared.state.lock() = match &outcome {
        PipelineOutcome::Ok => PipelineState::TerminatedOk,
        PipelineOutcome::Error(_) => PipelineState::TerminatedError,
    };
    shared.ended.notify_all();
    on_end(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkRegistry;
    use crate::track::{StreamRef, TrackKind};

    fn pcm_track(url: &str) -> Track {
        Track::new("t1", "Test Track", TrackKind::Track).with_streaming_refs(vec![StreamRef {
            format_type: "audio/pcm".to_string(),
            url: url.to_string(),
            sample_rate: Some(44_100),
            channels: Some(2),
        }])
    }

    #[test]
    fn no_usable_ref_reports_pipeline_error() {
        let track = Track::new("t2", "Missing", TrackKind::Track);
        let codecs = CodecRegistry::with_default_codecs();
        let sinks = SinkRegistry::with_default_backends();
        let result = Pipeline::start(
            &track,
            &IdentityResolver,
            &codecs,
            &sinks,
            "null",
            None,
            (1.0, false),
            Arc::new(|_| {}),
            |_| {},
        );
        assert!(result.is_err());
    }

    #[test]
    fn unreachable_url_is_treated_as_no_usable_ref() {
        // No server listening on this port: the feeder will fail to
        // connect and the pipeline falls through to "no usable ref".
        let track = pcm_track("http://127.0.0.1:1/no-such-server");
        let codecs = CodecRegistry::with_default_codecs();
        let sinks = SinkRegistry::with_default_backends();
        let result = Pipeline::start(
            &track,
            &IdentityResolver,
            &codecs,
            &sinks,
            "null",
            None,
            (1.0, false),
            Arc::new(|_| {}),
            |_| {},
        );
        assert!(result.is_err());
    }
}
