// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! FLAC codec descriptor.

use super::symphonia_common::SymphoniaInstance;
use super::{Codec, DecoderCallbacks, DecoderInstance};
use crate::fifo::Fifo;
use crate::format::AudioFormat;
use std::io::Read;
use std::sync::Arc;

pub struct FlacCodec {
    defaults: Vec<AudioFormat>,
}

impl FlacCodec {
    pub fn new() -> Self {
        Self { defaults: vec![AudioFormat::complete_fmt(44_100, 2, 16, true, false)] }
    }
}

impl Codec for FlacCodec {
    fn name(&self) -> &'static str {
        "flac"
    }

    fn check_type(&self, format_type: &str) -> bool {
        format_type == "audio/flac"
    }

    fn default_formats(&self) -> &[AudioFormat] {
        &self.defaults
    }

    fn spawn(
        &self,
        input: Box<dyn Read + Send>,
        output: Arc<Fifo>,
        _format: AudioFormat,
        icy_interval: usize,
        callbacks: DecoderCallbacks,
    ) -> Box<dyn DecoderInstance> {
        SymphoniaInstance::spawn("flac", input, output, icy_interval, callbacks)
    }
}
