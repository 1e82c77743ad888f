// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Format-specific bytes→PCM transform behind a uniform contract (spec §4.3).
//!
//! A [`Codec`] is a descriptor, not an instance: it answers "can you handle
//! this `(type, format)`?" and, if so, spawns a [`DecoderInstance`] bound to
//! one track's input stream and output [`Fifo`]. The registry in this module
//! walks registered codecs in order and completes an incomplete format from
//! the first codec willing to try.

mod flac;
mod icy;
mod mp3;
mod pcm;
mod sndfile;
mod symphonia_common;

pub use icy::IcyStrippingReader;

use crate::fifo::Fifo;
use crate::format::AudioFormat;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("codec rejected format {0}")]
    UnsupportedFormat(AudioFormat),
    #[error("no codec registered for content type {0:?}")]
    NoCodecFor(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("operation not supported by this codec")]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Initialized,
    Running,
    EndOfTrack,
    Terminating,
    TerminatedOk,
    TerminatedError,
}

/// Parsed ICY metadata, handed to `meta_callback` on each block.
pub type IcyMetadata = std::collections::BTreeMap<String, String>;

/// Callbacks a Pipeline registers on a decoder instance before it starts
/// producing output.
#[derive(Clone)]
pub struct DecoderCallbacks {
    /// Fires exactly once, on the first successful decode, with the
    /// concrete format the codec settled on.
    pub on_format: Arc<dyn Fn(AudioFormat) + Send + Sync>,
    /// Fires once per extracted ICY metadata block.
    pub on_metadata: Arc<dyn Fn(IcyMetadata) + Send + Sync>,
}

/// A codec descriptor, registered once at startup. `check_type` answers
/// whether this codec can plausibly handle a content type; `default_formats`
/// lists the completions [`find_codec`] tries in order when the caller's
/// format is incomplete.
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;
    fn check_type(&self, format_type: &str) -> bool;
    fn default_formats(&self) -> &[AudioFormat];

    /// Bind this codec to an input stream and spawn its decode thread.
    fn spawn(
        &self,
        input: Box<dyn Read + Send>,
        output: Arc<Fifo>,
        format: AudioFormat,
        icy_interval: usize,
        callbacks: DecoderCallbacks,
    ) -> Box<dyn DecoderInstance>;
}

/// A running decoder bound to one track. `Sync` for the same reason as
/// [`crate::sink::SinkInterface`]: shared via `Arc` between the pipeline's
/// monitor thread and `Pipeline::set_volume`.
pub trait DecoderInstance: Send + Sync {
    fn state(&self) -> DecoderState;
    fn format(&self) -> AudioFormat;

    /// Optional software volume attenuation, used when neither the sink nor
    /// the mixer exposes hardware volume (spec §4.6 routing: sink → codec →
    /// cached).
    fn set_volume(&self, _volume: f64, _muted: bool) -> Result<(), DecoderError> {
        Err(DecoderError::Unsupported)
    }

    /// Current position within the track, if the codec can report one.
    fn get_seek_time(&self) -> Result<Duration, DecoderError> {
        Err(DecoderError::Unsupported)
    }

    fn wait_for_end(&self, timeout: Duration) -> DecoderState;

    /// Request cancellation; does not block. Pair with `wait_for_end` to
    /// observe the final state, or rely on `Drop` to join.
    fn terminate(&self);
}

/// Registry of codecs, consulted in registration order.
pub struct CodecRegistry {
    codecs: Vec<Box<dyn Codec>>,
}

impl CodecRegistry {
    /// The four codec variants spec §4.3 requires, in the order a
    /// production build would want them tried: the compressed formats first
    /// (cheapest to rule out by content type), raw PCM last as the
    /// fall-through.
    pub fn with_default_codecs() -> Self {
        Self {
            codecs: vec![
                Box::new(mp3::Mp3Codec::new()),
                Box::new(flac::FlacCodec::new()),
                Box::new(sndfile::SndFileCodec::new()),
                Box::new(pcm::PcmCodec::new()),
            ],
        }
    }

    pub fn register(&mut self, codec: Box<dyn Codec>) {
        self.codecs.push(codec);
    }

    /// Resolve a codec for `(format_type, format)`. Prefers an exact match
    /// on `format` when it is already complete; otherwise walks each
    /// candidate codec's `default_formats` in order, trying each as a
    /// completion, and returns the first that the codec accepts along with
    /// the completed format.
    pub fn find_codec(
        &self,
        format_type: &str,
        format: &AudioFormat,
    ) -> Option<(&dyn Codec, AudioFormat)> {
        for codec in &self.codecs {
            if !codec.check_type(format_type) {
                continue;
            }
            if format.is_complete() {
                return Some((codec.as_ref(), *format));
            }
            for default in codec.default_formats() {
                let completed = format.complete(default);
                if completed.is_complete() {
                    return Some((codec.as_ref(), completed));
                }
            }
        }
        None
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_default_codecs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_codec_completes_incomplete_mpeg_ref_to_codec_default() {
        let registry = CodecRegistry::with_default_codecs();
        let incomplete = AudioFormat::new();
        let (codec, completed) = registry.find_codec("audio/mpeg", &incomplete).expect("mp3 codec");
        assert_eq!(codec.name(), "mp3");
        assert!(completed.is_complete());
        assert_eq!(completed.to_string(), "S16_LE@44100/2");
    }

    #[test]
    fn find_codec_returns_none_for_unknown_type() {
        let registry = CodecRegistry::with_default_codecs();
        assert!(registry.find_codec("audio/unobtainium", &AudioFormat::new()).is_none());
    }

    #[test]
    fn find_codec_prefers_exact_complete_format_without_consulting_defaults() {
        let registry = CodecRegistry::with_default_codecs();
        let exact = AudioFormat::complete_fmt(48_000, 1, 24, true, false);
        let (_, completed) = registry.find_codec("audio/mpeg", &exact).unwrap();
        assert_eq!(completed, exact);
    }
}
