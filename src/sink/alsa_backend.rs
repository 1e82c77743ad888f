// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! ALSA PCM sink backend (spec §4.4).
//!
//! `PCM::wait` stands in for the contract's `wait_device_writable`: it
//! blocks on the same underlying poll descriptor ALSA itself uses, so a
//! 500 ms timeout there gives the sink thread the same cancellation
//! granularity as the Fifo's own bounded waits. Volume is never routed
//! through the mixer here (`has_volume` always false) — per spec §9's
//! design note, some backends never expose hardware volume even when a
//! mixer element exists, so we fall through to codec-level attenuation
//! uniformly rather than wiring up `alsa::mixer` for one backend only.

use super::{SinkBackend, SinkError, SinkInterface, SinkState, StopMode};
use crate::fifo::{Fifo, FifoError};
use crate::format::AudioFormat;
use alsa::pcm::{Access, Format as AlsaFormat, HwParams, PCM};
use alsa::{Direction, ValueOr};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct AlsaBackend;

impl AlsaBackend {
    pub fn new() -> Self {
        Self
    }
}

impl SinkBackend for AlsaBackend {
    fn name(&self) -> &'static str {
        "alsa"
    }

    fn get_devices(&self) -> Vec<(String, String)> {
        let cards = match alsa::card::Iter::new().collect::<Result<Vec<_>, _>>() {
            Ok(cards) => cards,
            Err(e) => {
                tracing::warn!(error = %e, "failed to enumerate ALSA cards");
                return Vec::new();
            }
        };
        cards
            .into_iter()
            .map(|card| {
                let index = card.get_index();
                let description = card
                    .get_longname()
                    .unwrap_or_else(|_| format!("card {index}"));
                (format!("hw:{index}"), description)
            })
            .collect()
    }

    fn new_if(&self, device: &str) -> Result<Box<dyn SinkInterface>, SinkError> {
        let device_name = if device.is_empty() { "default" } else { device };
        let pcm = PCM::new(device_name, Direction::Playback, false)
            .map_err(|e| SinkError::Device(format!("alsa open {device_name:?}: {e}")))?;
        Ok(Box::new(AlsaSink {
            device: device_name.to_string(),
            pcm: Mutex::new(Some(pcm)),
            running_pcm: Mutex::new(None),
            state: Arc::new(Mutex::new(SinkState::Initialized)),
            can_pause: AtomicBool::new(false),
            soft_muted: AtomicBool::new(false),
            cancel: Arc::new(AtomicBool::new(false)),
            join: Mutex::new(None),
            frame_size: Mutex::new(0),
        }))
    }
}

struct AlsaSink {
    device: String,
    pcm: Mutex<Option<PCM>>,
    running_pcm: Mutex<Option<Arc<PCM>>>,
    state: Arc<Mutex<SinkState>>,
    can_pause: AtomicBool,
    soft_muted: AtomicBool,
    cancel: Arc<AtomicBool>,
    join: Mutex<Option<std::thread::JoinHandle<()>>>,
    frame_size: Mutex<usize>,
}

impl SinkInterface for AlsaSink {
    fn state(&self) -> SinkState {
        *self.state.lock()
    }

    fn can_pause(&self) -> bool {
        self.can_pause.load(Ordering::SeqCst)
    }

    fn has_volume(&self) -> bool {
        false
    }

    fn play(&self, format: AudioFormat, pcm_fifo: Arc<Fifo>) -> Result<(), SinkError> {
        if !format.is_complete() {
            return Err(SinkError::IncompleteFormat(format));
        }
        let mut pcm_slot = self.pcm.lock();
        let pcm = pcm_slot.take().ok_or_else(|| SinkError::Device("alsa sink already started".into()))?;

        let alsa_format = alsa_format_of(format).ok_or_else(|| SinkError::FormatRejected(self.device.clone()))?;
        let rate = format.sample_rate.expect("checked complete above");
        let channels = format.channels.expect("checked complete above");

        let result = (|| -> Result<(u32, bool), alsa::Error> {
            let hwp = HwParams::any(&pcm)?;
            hwp.set_access(Access::RWInterleaved)?;
            hwp.set_format(alsa_format)?;
            hwp.set_channels(channels as u32)?;
            hwp.set_rate(rate, ValueOr::Nearest)?;
            hwp.set_periods(2, ValueOr::Nearest)?;
            pcm.hw_params(&hwp)?;
            let accepted_rate = hwp.get_rate()?;
            let can_pause = hwp.can_pause();
            pcm.prepare()?;
            Ok((accepted_rate, can_pause))
        })();

        let (accepted_rate, can_pause) = match result {
            Ok(pair) => pair,
            Err(e) => {
                *pcm_slot = Some(pcm);
                return Err(SinkError::Device(format!("alsa hw_params: {e}")));
            }
        };

        // `set_rate(.., Nearest)` may silently round to a rate ALSA can
        // actually produce; spec §4.4 forbids accepting that silently, so
        // a mismatch against what was requested is a hard rejection,
        // independent of whatever `can_pause` reports.
        if accepted_rate != rate {
            *pcm_slot = Some(pcm);
            return Err(SinkError::Device(format!(
                "alsa accepted rate {accepted_rate} differs from requested rate {rate}"
            )));
        }
        drop(pcm_slot);

        self.can_pause.store(can_pause, Ordering::SeqCst);
        *self.frame_size.lock() = format.frame_size();
        *self.state.lock() = SinkState::Running;
        self.cancel.store(false, Ordering::SeqCst);
        self.soft_muted.store(false, Ordering::SeqCst);

        let thread_cancel = Arc::clone(&self.cancel);
        let frame_size = format.frame_size();
        let soft_muted_flag = Arc::new(AtomicBool::new(false));
        let pcm = Arc::new(pcm);
        *self.running_pcm.lock() = Some(Arc::clone(&pcm));
        let thread_state = Arc::clone(&self.state);

        let join = std::thread::Builder::new()
            .name("netplayer-sink-alsa".into())
            .spawn(move || run_sink_thread(pcm, pcm_fifo, frame_size, thread_cancel, soft_muted_flag, thread_state))
            .expect("spawn alsa sink thread");
        *self.join.lock() = Some(join);
        Ok(())
    }

    fn pause(&self, on: bool) -> Result<(), SinkError> {
        if *self.state.lock() != SinkState::Running {
            return Err(SinkError::NotRunning);
        }
        if self.can_pause.load(Ordering::SeqCst) {
            if let Some(pcm) = self.running_pcm.lock().as_ref() {
                pcm.pause(on).map_err(|e| SinkError::Device(format!("alsa pause: {e}")))?;
            }
        } else {
            self.soft_muted.store(on, Ordering::SeqCst);
        }
        Ok(())
    }

    fn set_volume(&self, _volume: f64, _muted: bool) -> Result<(), SinkError> {
        Err(SinkError::Device("alsa backend has no hardware volume control".into()))
    }

    fn stop(&self, mode: StopMode) -> Result<(), SinkError> {
        {
            let mut state = self.state.lock();
            if *state != SinkState::TerminatedError {
                *state = SinkState::Terminating;
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
            return Err(SinkError::Device(format!("alsa sink {:?} terminated with an error", self.device)));
        }
        *state = SinkState::TerminatedOk;
        Ok(())
    }
}

fn alsa_format_of(format: AudioFormat) -> Option<AlsaFormat> {
    match (format.bits?, format.signed?, format.float.unwrap_or(false)) {
        (_, _, true) => Some(AlsaFormat::FloatLE),
        (8, true, false) => Some(AlsaFormat::S8),
        (8, false, false) => Some(AlsaFormat::U8),
        (16, true, false) => Some(AlsaFormat::S16LE),
        (16, false, false) => Some(AlsaFormat::U16LE),
        (24, true, false) => Some(AlsaFormat::S24LE),
        (24, false, false) => Some(AlsaFormat::U24LE),
        (32, true, false) => Some(AlsaFormat::S32LE),
        (32, false, false) => Some(AlsaFormat::U32LE),
        _ => None,
    }
}

fn run_sink_thread(
    pcm: Arc<PCM>,
    pcm_fifo: Arc<Fifo>,
    frame_size: usize,
    cancel: Arc<AtomicBool>,
    soft_muted: Arc<AtomicBool>,
    state: Arc<Mutex<SinkState>>,
) {
    let mut consecutive_errors = 0u32;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        match pcm.wait(Some(500)) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                if !recover(&pcm, &e, &mut consecutive_errors) {
                    *state.lock() = SinkState::TerminatedError;
                    return;
                }
                continue;
            }
        }
        let avail_frames = match pcm.avail_update() {
            Ok(a) => a.max(0) as usize,
            Err(e) => {
                if !recover(&pcm, &e, &mut consecutive_errors) {
                    *state.lock() = SinkState::TerminatedError;
                    return;
                }
                continue;
            }
        };
        if avail_frames == 0 || frame_size == 0 {
            continue;
        }
        let guard = match pcm_fifo.lock_wait_readable(Duration::from_millis(500)) {
            Ok(g) => g,
            Err(FifoError::Timeout) => continue,
            Err(_) => return,
        };
        let (data, readable) = guard.get_read_ptr();
        let want_bytes = (avail_frames * frame_size).min(readable);
        let want_bytes = want_bytes - (want_bytes % frame_size.max(1));
        if want_bytes == 0 {
            let _ = guard.unlock_after_read(0);
            continue;
        }
        let mut chunk = data[..want_bytes].to_vec();
        if soft_muted.load(Ordering::SeqCst) {
            chunk.iter_mut().for_each(|b| *b = 0);
        }
        if guard.unlock_after_read(want_bytes).is_err() {
            return;
        }

        let io = pcm.io_bytes();
        match io.writei(&chunk) {
            Ok(_frames) => consecutive_errors = 0,
            Err(e) => {
                if !recover(&pcm, &e, &mut consecutive_errors) {
                    *state.lock() = SinkState::TerminatedError;
                    return;
                }
            }
        }
    }
}

/// Attempt `snd_pcm_recover` for an underrun/suspend; gives up (returning
/// `false`) after three consecutive failures, per spec §4.4 "repeated
/// failures transition to TerminatedError".
fn recover(pcm: &PCM, err: &alsa::Error, consecutive_errors: &mut u32) -> bool {
    *consecutive_errors += 1;
    if *consecutive_errors > 3 {
        tracing::error!(error = %err, "alsa sink: repeated recovery failures, terminating");
        return false;
    }
    match pcm.recover(err.errno() as std::os::raw::c_int, true) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "alsa sink: recover failed");
            *consecutive_errors > 3
        }
    }
}
