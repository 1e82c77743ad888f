// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! PulseAudio sink backend (spec §4.4), built on the `simple` API.
//!
//! `psimple::Simple` has no corking/pause primitive and exposes no mixer
//! control, so both `can_pause` and `has_volume` are always false here —
//! pause degrades to a soft mute (writing silence) and volume stays a
//! codec-level concern, same as the null and ALSA backends.

use super::{SinkBackend, SinkError, SinkInterface, SinkState, StopMode};
use crate::fifo::{Fifo, FifoError};
use crate::format::AudioFormat;
use libpulse_binding::sample::{Format as PaFormat, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const APP_NAME: &str = "netplayer";

pub struct PulseBackend;

impl PulseBackend {
    pub fn new() -> Self {
        Self
    }
}

impl SinkBackend for PulseBackend {
    fn name(&self) -> &'static str {
        "pulse"
    }

    fn get_devices(&self) -> Vec<(String, String)> {
        // The simple API has no enumeration facility; the daemon's default
        // sink plus the documented `@DEFAULT_SINK@` alias are all a caller
        // can address without the full async Context API.
        vec![("@DEFAULT_SINK@".to_string(), "PulseAudio default sink".to_string())]
    }

    fn new_if(&self, device: &str) -> Result<Box<dyn SinkInterface>, SinkError> {
        let device = if device.is_empty() { None } else { Some(device.to_string()) };
        Ok(Box::new(PulseSink {
            device,
            simple: Mutex::new(None),
            state: Arc::new(Mutex::new(SinkState::Initialized)),
            soft_muted: AtomicBool::new(false),
            cancel: Arc::new(AtomicBool::new(false)),
            join: Mutex::new(None),
        }))
    }
}

struct PulseSink {
    device: Option<String>,
    simple: Mutex<Option<Arc<Simple>>>,
    state: Arc<Mutex<SinkState>>,
    soft_muted: AtomicBool,
    cancel: Arc<AtomicBool>,
    join: Mutex<Option<std::thread::JoinHandle<()>>>,
}

fn pulse_format_of(format: AudioFormat) -> Option<PaFormat> {
    match (format.bits?, format.signed?, format.float.unwrap_or(false)) {
        (32, _, true) => Some(PaFormat::F32le),
        (16, true, false) => Some(PaFormat::S16le),
        (24, true, false) => Some(PaFormat::S24le),
        (32, true, false) => Some(PaFormat::S32le),
        (8, false, false) => Some(PaFormat::U8),
        _ => None,
    }
}

impl SinkInterface for PulseSink {
    fn state(&self) -> SinkState {
        *self.state.lock()
    }

    fn can_pause(&self) -> bool {
        false
    }

    fn has_volume(&self) -> bool {
        false
    }

    fn play(&self, format: AudioFormat, pcm_fifo: Arc<Fifo>) -> Result<(), SinkError> {
        if !format.is_complete() {
            return Err(SinkError::IncompleteFormat(format));
        }
        let pa_format = pulse_format_of(format)
            .ok_or_else(|| SinkError::FormatRejected(self.device.clone().unwrap_or_default()))?;
        let spec = Spec {
            format: pa_format,
            channels: format.channels.expect("checked complete above"),
            rate: format.sample_rate.expect("checked complete above"),
        };
        if !spec.is_valid() {
            return Err(SinkError::FormatRejected(format.to_string()));
        }

        let simple = Simple::new(
            None,
            APP_NAME,
            Direction::Playback,
            self.device.as_deref(),
            "audio stream",
            &spec,
            None,
            None,
        )
        .map_err(|e| SinkError::Device(format!("pulse connect: {e}")))?;
        let simple = Arc::new(simple);
        *self.simple.lock() = Some(Arc::clone(&simple));

        *self.state.lock() = SinkState::Running;
        self.cancel.store(false, Ordering::SeqCst);
        self.soft_muted.store(false, Ordering::SeqCst);

        let thread_cancel = Arc::clone(&self.cancel);
        let soft_muted_flag = Arc::new(AtomicBool::new(false));
        let thread_state = Arc::clone(&self.state);
        let join = std::thread::Builder::new()
            .name("netplayer-sink-pulse".into())
            .spawn(move || run_sink_thread(simple, pcm_fifo, thread_cancel, soft_muted_flag, thread_state))
            .expect("spawn pulse sink thread");
        *self.join.lock() = Some(join);
        Ok(())
    }

    fn pause(&self, on: bool) -> Result<(), SinkError> {
        if *self.state.lock() != SinkState::Running {
            return Err(SinkError::NotRunning);
        }
        self.soft_muted.store(on, Ordering::SeqCst);
        Ok(())
    }

    fn set_volume(&self, _volume: f64, _muted: bool) -> Result<(), SinkError> {
        Err(SinkError::Device("pulse simple backend has no hardware volume control".into()))
    }

    fn stop(&self, mode: StopMode) -> Result<(), SinkError> {
        {
            let mut state = self.state.lock();
            if *state != SinkState::TerminatedError {
                *state = SinkState::Terminating;
            }
        }
        if mode == StopMode::Drain {
            if let Some(simple) = self.simple.lock().as_ref() {
                let _ = simple.drain();
            }
        }
        if mode != StopMode::Force {
            self.cancel.store(true, Ordering::SeqCst);
            if let Some(handle) = self.join.lock().take() {
                let _ = handle.join();
            }
        }
        // On a TerminatedError path `stop` returns an error but still
        // clears the device (§4.4); a clean exit sets TerminatedOk.
        let mut state = self.state.lock();
        if *state == SinkState::TerminatedError {
            return Err(SinkError::Device("pulse sink terminated with an error".into()));
        }
        *state = SinkState::TerminatedOk;
        Ok(())
    }
}

fn run_sink_thread(
    simple: Arc<Simple>,
    pcm_fifo: Arc<Fifo>,
    cancel: Arc<AtomicBool>,
    soft_muted: Arc<AtomicBool>,
    state: Arc<Mutex<SinkState>>,
) {
    loop {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        let guard = match pcm_fifo.lock_wait_readable(Duration::from_millis(500)) {
            Ok(g) => g,
            Err(FifoError::Timeout) => continue,
            Err(_) => return,
        };
        let (data, n) = guard.get_read_ptr();
        if n == 0 {
            let _ = guard.unlock_after_read(0);
            continue;
        }
        let mut chunk = data.to_vec();
        if guard.unlock_after_read(n).is_err() {
            return;
        }
        if soft_muted.load(Ordering::SeqCst) {
            chunk.iter_mut().for_each(|b| *b = 0);
        }
        // `Simple::write` blocks until the server has room; that blocking
        // is the backpressure mechanism, so it happens outside the lock.
        if simple.write(&chunk).is_err() {
            *state.lock() = SinkState::TerminatedError;
            return;
        }
    }
}
