// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Null sink: consumes PCM at "fast motion" rather than real time, for
//! headless tests that need deterministic, fast pipeline runs.

use super::{SinkBackend, SinkError, SinkInterface, SinkState, StopMode};
use crate::fifo::{Fifo, FifoError};
use crate::format::AudioFormat;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        Self
    }
}

impl SinkBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn get_devices(&self) -> Vec<(String, String)> {
        vec![("null".to_string(), "Discards audio immediately; for headless testing".to_string())]
    }

    fn new_if(&self, _device: &str) -> Result<Box<dyn SinkInterface>, SinkError> {
        Ok(Box::new(NullSink {
            state: Mutex::new(SinkState::Initialized),
            cancel: Arc::new(AtomicBool::new(false)),
            join: Mutex::new(None),
            volume: Mutex::new((1.0, false)),
            pcm_fifo: Mutex::new(None),
        }))
    }
}

struct NullSink {
    state: Mutex<SinkState>,
    cancel: Arc<AtomicBool>,
    join: Mutex<Option<std::thread::JoinHandle<()>>>,
    volume: Mutex<(f64, bool)>,
    pcm_fifo: Mutex<Option<Arc<Fifo>>>,
}

impl SinkInterface for NullSink {
    fn state(&self) -> SinkState {
        *self.state.lock()
    }

    fn can_pause(&self) -> bool {
        true
    }

    fn has_volume(&self) -> bool {
        false
    }

    fn play(&self, format: AudioFormat, pcm_fifo: Arc<Fifo>) -> Result<(), SinkError> {
        if !format.is_complete() {
            return Err(SinkError::IncompleteFormat(format));
        }
        *self.state.lock() = SinkState::Running;
        self.cancel.store(false, Ordering::SeqCst);
        *self.pcm_fifo.lock() = Some(Arc::clone(&pcm_fifo));
        let thread_cancel = Arc::clone(&self.cancel);

        let join = std::thread::Builder::new()
            .name("netplayer-sink-null".into())
            .spawn(move || loop {
                if thread_cancel.load(Ordering::SeqCst) {
                    return;
                }
                let guard = match pcm_fifo.lock_wait_readable(Duration::from_millis(20)) {
                    Ok(g) => g,
                    Err(FifoError::Timeout) => continue,
                    Err(_) => return,
                };
                let n = guard.next_readable_len();
                if guard.unlock_after_read(n).is_err() {
                    return;
                }
            })
            .expect("spawn null sink thread");
        *self.join.lock() = Some(join);
        Ok(())
    }

    fn pause(&self, _on: bool) -> Result<(), SinkError> {
        if *self.state.lock() != SinkState::Running {
            return Err(SinkError::NotRunning);
        }
        Ok(())
    }

    fn set_volume(&self, volume: f64, muted: bool) -> Result<(), SinkError> {
        *self.volume.lock() = (volume, muted);
        Ok(())
    }

    fn stop(&self, mode: StopMode) -> Result<(), SinkError> {
        *self.state.lock() = SinkState::Terminating;
        if mode == StopMode::Drain {
            if let Some(fifo) = self.pcm_fifo.lock().clone() {
                let _ = fifo.lock_wait_drained(Duration::from_secs(5));
            }
        }
        if mode != StopMode::Force {
            self.cancel.store(true, Ordering::SeqCst);
            if let Some(handle) = self.join.lock().take() {
                let _ = handle.join();
            }
        }
        *self.pcm_fifo.lock() = None;
        *self.state.lock() = SinkState::TerminatedOk;
        Ok(())
    }
}
