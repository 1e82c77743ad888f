// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! WAV/AIFF codec descriptor.
//!
//! Unlike the compressed codecs, the declared `channels`/`sample_rate`/
//! `bits` on the track's streaming ref are verified against what the file
//! actually contains (spec §4.3): a mismatch is fatal, not merely logged.

use super::symphonia_common::SymphoniaInstance;
use super::{Codec, DecoderCallbacks, DecoderError, DecoderInstance, DecoderState};
use crate::fifo::Fifo;
use crate::format::AudioFormat;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

pub struct SndFileCodec {
    defaults: Vec<AudioFormat>,
}

impl SndFileCodec {
    pub fn new() -> Self {
        Self { defaults: vec![AudioFormat::complete_fmt(44_100, 2, 16, true, false)] }
    }
}

impl Codec for SndFileCodec {
    fn name(&self) -> &'static str {
        "sndfile"
    }

    fn check_type(&self, format_type: &str) -> bool {
        matches!(format_type, "audio/wav" | "audio/x-wav" | "audio/aiff" | "audio/x-aiff")
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
        let declared = format;
        let mismatch = Arc::new(AtomicBool::new(false));
        let mismatch_in_callback = Arc::clone(&mismatch);
        let user_on_format = Arc::clone(&callbacks.on_format);

        let wrapped = DecoderCallbacks {
            on_format: Arc::new(move |announced: AudioFormat| {
                if !declared.matches(&announced) {
                    tracing::error!(
                        %declared,
                        %announced,
                        "sndfile: declared stream format does not match file contents"
                    );
                    mismatch_in_callback.store(true, AtomicOrdering::SeqCst);
                }
                user_on_format(announced);
            }),
            on_metadata: Arc::clone(&callbacks.on_metadata),
        };

        let inner = SymphoniaInstance::spawn("wav", input, output, icy_interval, wrapped);
        Box::new(SndFileInstance { inner, mismatch })
    }
}

struct SndFileInstance {
    inner: Box<dyn DecoderInstance>,
    mismatch: Arc<AtomicBool>,
}

impl DecoderInstance for SndFileInstance {
    fn state(&self) -> DecoderState {
        if self.mismatch.load(AtomicOrdering::SeqCst) {
            DecoderState::TerminatedError
        } else {
            self.inner.state()
        }
    }

    fn format(&self) -> AudioFormat {
        self.inner.format()
    }

    fn get_seek_time(&self) -> Result<Duration, DecoderError> {
        self.inner.get_seek_time()
    }

    fn wait_for_end(&self, timeout: Duration) -> DecoderState {
        if self.mismatch.load(AtomicOrdering::SeqCst) {
            self.inner.terminate();
            self.inner.wait_for_end(timeout);
            return DecoderState::TerminatedError;
        }
        self.inner.wait_for_end(timeout)
    }

    fn terminate(&self) {
        self.inner.terminate();
    }
}
