// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared decode-thread machinery for the symphonia-backed codecs (MP3,
//! FLAC, WAV/AIFF). Each codec module differs only in the probe `Hint` it
//! supplies and the content types it claims in `check_type`.

use super::{DecoderCallbacks, DecoderError, DecoderInstance, DecoderState};
use crate::fifo::Fifo;
use crate::format::AudioFormat;
use parking_lot::{Condvar, Mutex};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

struct Shared {
    state: Mutex<DecoderState>,
    end: Condvar,
    cancel: AtomicBool,
    format: Mutex<AudioFormat>,
    seek_time: Mutex<Duration>,
}

pub struct SymphoniaInstance {
    shared: Arc<Shared>,
    join: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl SymphoniaInstance {
    pub fn spawn(
        hint_extension: &'static str,
        input: Box<dyn Read + Send>,
        output: Arc<Fifo>,
        icy_interval: usize,
        callbacks: DecoderCallbacks,
    ) -> Box<dyn DecoderInstance> {
        let shared = Arc::new(Shared {
            state: Mutex::new(DecoderState::Initialized),
            end: Condvar::new(),
            cancel: AtomicBool::new(false),
            format: Mutex::new(AudioFormat::new()),
            seek_time: Mutex::new(Duration::ZERO),
        });

        let thread_shared = Arc::clone(&shared);
        let join = std::thread::Builder::new()
            .name("netplayer-decoder".into())
            .spawn(move || {
                let on_metadata = (icy_interval > 0).then(|| callbacks.on_metadata.clone());
                let reader = super::icy::IcyStrippingReader::new(input, icy_interval, on_metadata);
                run(thread_shared, hint_extension, Box::new(reader), output, callbacks);
            })
            .expect("spawn decoder thread");

        Box::new(Self { shared, join: Mutex::new(Some(join)) })
    }
}

impl DecoderInstance for SymphoniaInstance {
    fn state(&self) -> DecoderState {
        *self.shared.state.lock()
    }

    fn format(&self) -> AudioFormat {
        *self.shared.format.lock()
    }

    fn get_seek_time(&self) -> Result<Duration, DecoderError> {
        Ok(*self.shared.seek_time.lock())
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

impl Drop for SymphoniaInstance {
    fn drop(&mut self) {
        self.terminate();
        if let Some(handle) = self.join.lock().take() {
            let _ = handle.join();
        }
    }
}

fn run(
    shared: Arc<Shared>,
    hint_extension: &'static str,
    reader: Box<dyn Read + Send>,
    output: Arc<Fifo>,
    callbacks: DecoderCallbacks,
) {
    *shared.state.lock() = DecoderState::Running;

    let mss = MediaSourceStream::new(
        Box::new(ReadOnlySource::new(reader)),
        MediaSourceStreamOptions::default(),
    );
    let mut hint = Hint::new();
    hint.with_extension(hint_extension);

    let probed = match symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(p) => p,
        Err(e) => return finish(&shared, DecoderState::TerminatedError, Some(e.to_string())),
    };

    let mut format_reader = probed.format;
    let Some(track) = format_reader.tracks().iter().find(|t| t.codec_params.codec != CODEC_TYPE_NULL).cloned()
    else {
        return finish(&shared, DecoderState::TerminatedError, Some("no decodable track found".into()));
    };
    let track_id = track.id;

    let mut decoder = match symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default()) {
        Ok(d) => d,
        Err(e) => return finish(&shared, DecoderState::TerminatedError, Some(e.to_string())),
    };

    let mut format_announced = false;
    let mut frames_decoded: u64 = 0;

    loop {
        if shared.cancel.load(AtomicOrdering::SeqCst) {
            return finish(&shared, DecoderState::TerminatedOk, None);
        }
        let packet = match format_reader.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return finish(&shared, DecoderState::TerminatedOk, None);
            }
            Err(e) => return finish(&shared, DecoderState::TerminatedError, Some(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "symphonia decode error, skipping packet");
                continue;
            }
        };

        let spec = *decoded.spec();
        if !format_announced {
            let announced = AudioFormat::complete_fmt(spec.rate, spec.channels.count() as u8, 16, true, false);
            *shared.format.lock() = announced;
            (callbacks.on_format)(announced);
            format_announced = true;
        }

        let mut sample_buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        let bytes: Vec<u8> = sample_buf.samples().iter().flat_map(|s| s.to_le_bytes()).collect();

        frames_decoded += (sample_buf.samples().len() / spec.channels.count()) as u64;
        *shared.seek_time.lock() = Duration::from_secs_f64(frames_decoded as f64 / spec.rate as f64);

        if let Err(e) = write_all(&output, &bytes, &shared.cancel) {
            return finish(&shared, DecoderState::TerminatedError, Some(e.to_string()));
        }
    }
}

/// Stream `data` into `fifo`'s writable region in contiguous chunks,
/// honouring the contract's `lock_wait_writable` → fill → `unlock_after_write`
/// sequence and re-checking `cancel` on every 500 ms wait.
fn write_all(fifo: &Fifo, data: &[u8], cancel: &AtomicBool) -> Result<(), DecoderError> {
    let mut offset = 0;
    while offset < data.len() {
        if cancel.load(AtomicOrdering::SeqCst) {
            return Ok(());
        }
        let guard = match fifo.lock_wait_writable(Duration::from_millis(500), 1) {
            Ok(g) => g,
            Err(crate::fifo::FifoError::Timeout) => continue,
            Err(e) => return Err(DecoderError::Decode(e.to_string())),
        };
        let remaining = data.len() - offset;
        // `lock_wait_writable` guarantees at least one byte is writable, but
        // the contiguous run might still be shorter than `remaining`.
        let n = remaining.min(guard.next_writable_len());
        guard
            .fill_and_unlock(&data[offset..offset + n], n)
            .map_err(|e| DecoderError::Decode(e.to_string()))?;
        offset += n;
    }
    Ok(())
}

fn finish(shared: &Shared, final_state: DecoderState, error: Option<String>) {
    if let Some(msg) = error {
        tracing::error!(error = %msg, "decoder terminating with error");
    }
    *shared.state.lock() = final_state;
    shared.end.notify_all();
}
