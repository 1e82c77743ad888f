// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Raw PCM codec: no container, no decode — bytes from the input stream are
//! copied straight into the PCM Fifo. There is no header to sniff a format
//! from, so the streaming ref's declared format (completed against our
//! single default) is taken as ground truth and announced immediately.

use super::icy::IcyStrippingReader;
use super::{Codec, DecoderCallbacks, DecoderError, DecoderInstance, DecoderState};
use crate::fifo::{Fifo, FifoError};
use crate::format::AudioFormat;
use parking_lot::{Condvar, Mutex};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

pub struct PcmCodec {
    defaults: Vec<AudioFormat>,
}

impl PcmCodec {
    pub fn new() -> Self {
        Self { defaults: vec![AudioFormat::complete_fmt(44_100, 2, 16, true, false)] }
    }
}

impl Codec for PcmCodec {
    fn name(&self) -> &'static str {
        "pcm"
    }

    fn check_type(&self, format_type: &str) -> bool {
        format_type == "audio/pcm" || format_type == "audio/l16"
    }

    fn default_formats(&self) -> &[AudioFormat] {
        &self.defaults
    }

    fn spawn(
        &self,
        input: Box<dyn Read + Send>,
        output: Arc<Fifo>,
        format: AudioFormat,
        icy_interval: usize,
        callbacks: DecoderCallbacks,
    ) -> Box<dyn DecoderInstance> {
        let shared = Arc::new(Shared {
            state: Mutex::new(DecoderState::Initialized),
            end: Condvar::new(),
            cancel: AtomicBool::new(false),
            format: Mutex::new(format),
        });

        let thread_shared = Arc::clone(&shared);
        let on_metadata = (icy_interval > 0).then(|| Arc::clone(&callbacks.on_metadata));
        let join = std::thread::Builder::new()
            .name("netplayer-decoder-pcm".into())
            .spawn(move || {
                (callbacks.on_format)(format);
                let reader = IcyStrippingReader::new(input, icy_interval, on_metadata);
                run(thread_shared, reader, output);
            })
            .expect("spawn pcm decoder thread");

        Box::new(PcmInstance { shared, join: Mutex::new(Some(join)) })
    }
}

struct Shared {
    state: Mutex<DecoderState>,
    end: Condvar,
    cancel: AtomicBool,
    format: Mutex<AudioFormat>,
}

struct PcmInstance {
    shared: Arc<Shared>,
    join: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl DecoderInstance for PcmInstance {
    fn state(&self) -> DecoderState {
        *self.shared.state.lock()
    }

    fn format(&self) -> AudioFormat {
        *self.shared.format.lock()
    }

    fn wait_for_end(&self, timeout: Duration) -> DecoderState {
        let mut state = self.shared.state.lock();
        let deadline = std::time::Instant::now() + timeout;
        while !matches!(*state, DecoderState::TerminatedOk | DecoderState::TerminatedError) {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.shared.end.wait_for(&mut state, remaining);
        }
        *state
    }

    fn terminate(&self) {
        self.shared.cancel.store(true, AtomicOrdering::SeqCst);
        *self.shared.state.lock() = DecoderState::Terminating;
    }
}

impl Drop for PcmInstance {
    fn drop(&mut self) {
        self.terminate();
        if let Some(handle) = self.join.lock().take() {
            let _ = handle.join();
        }
    }
}

fn run(shared: Arc<Shared>, mut reader: impl Read, output: Arc<Fifo>) {
    *shared.state.lock() = DecoderState::Running;
    let mut buf = [0u8; 4096];
    loop {
        if shared.cancel.load(AtomicOrdering::SeqCst) {
            return finish(&shared, DecoderState::TerminatedOk, None);
        }
        match reader.read(&mut buf) {
            Ok(0) => return finish(&shared, DecoderState::TerminatedOk, None),
            Ok(n) => {
                if let Err(e) = write_all(&output, &buf[..n], &shared.cancel) {
                    return finish(&shared, DecoderState::TerminatedError, Some(e.to_string()));
                }
            }
            Err(e) => return finish(&shared, DecoderState::TerminatedError, Some(e.to_string())),
        }
    }
}

fn write_all(fifo: &Fifo, data: &[u8], cancel: &AtomicBool) -> Result<(), DecoderError> {
    let mut offset = 0;
    while offset < data.len() {
        if cancel.load(AtomicOrdering::SeqCst) {
            return Ok(());
        }
        let guard = match fifo.lock_wait_writable(Duration::from_millis(500), 1) {
            Ok(g) => g,
            Err(FifoError::Timeout) => continue,
            Err(e) => return Err(DecoderError::Decode(e.to_string())),
        };
        let n = (data.len() - offset).min(guard.next_writable_len());
        guard.fill_and_unlock(&data[offset..offset + n], n).map_err(|e| DecoderError::Decode(e.to_string()))?;
        offset += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fifo::SizeMode;
    use std::io::Cursor;

    #[test]
    fn raw_pcm_passthrough_copies_bytes_verbatim() {
        let fifo = Arc::new(Fifo::new(64));
        let shared = Arc::new(Shared {
            state: Mutex::new(DecoderState::Initialized),
            end: Condvar::new(),
            cancel: AtomicBool::new(false),
            format: Mutex::new(AudioFormat::complete_fmt(44_100, 2, 16, true, false)),
        });
        run(Arc::clone(&shared), Cursor::new(vec![1, 2, 3, 4]), Arc::clone(&fifo));
        assert_eq!(*shared.state.lock(), DecoderState::TerminatedOk);
        assert_eq!(fifo.size(SizeMode::Used), 4);
    }
}
