// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! PCM format description and negotiation (spec §3 "AudioFormat").
//!
//! Any field may be `None` ("unknown") while a format is being negotiated
//! between a streaming ref, a codec's declared capability, and a sink's
//! requested device format.

use std::fmt;

/// A (possibly partially specified) PCM format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioFormat {
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub bits: Option<u8>,
    pub signed: Option<bool>,
    pub float: Option<bool>,
}

impl AudioFormat {
    pub const fn new() -> Self {
        Self { sample_rate: None, channels: None, bits: None, signed: None, float: None }
    }

    pub fn complete_fmt(
        sample_rate: u32,
        channels: u8,
        bits: u8,
        signed: bool,
        float: bool,
    ) -> Self {
        Self {
            sample_rate: Some(sample_rate),
            channels: Some(channels),
            bits: Some(bits),
            signed: Some(signed),
            float: Some(float),
        }
    }

    /// `true` iff every field is known.
    pub fn is_complete(&self) -> bool {
        self.sample_rate.is_some()
            && self.channels.is_some()
            && self.bits.is_some()
            && self.signed.is_some()
            && self.float.is_some()
    }

    /// Fill any unknown field from `reference`, leaving fields this format
    /// already specifies untouched. Returns the completed format.
    pub fn complete(mut self, reference: &AudioFormat) -> AudioFormat {
        self.sample_rate = self.sample_rate.or(reference.sample_rate);
        self.channels = self.channels.or(reference.channels);
        self.bits = self.bits.or(reference.bits);
        self.signed = self.signed.or(reference.signed);
        self.float = self.float.or(reference.float);
        self
    }

    /// Field-wise equality where an unspecified field on either side matches
    /// anything.
    pub fn matches(&self, other: &AudioFormat) -> bool {
        field_matches(self.sample_rate, other.sample_rate)
            && field_matches(self.channels, other.channels)
            && field_matches(self.bits, other.bits)
            && field_matches(self.signed, other.signed)
            && field_matches(self.float, other.float)
    }

    /// Bytes per interleaved frame (all channels), 0 if incomplete.
    pub fn frame_size(&self) -> usize {
        match (self.channels, self.bits) {
            (Some(c), Some(b)) => c as usize * (b as usize).div_ceil(8),
            _ => 0,
        }
    }
}

fn field_matches<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

impl fmt::Display for AudioFormat {
    /// Renders the `"S16_LE@44100/2"` literal syntax from spec §6, using
    /// `?` for any unknown field.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match (self.float, self.signed) {
            (Some(true), _) => "F",
            (_, Some(true)) => "S",
            (_, Some(false)) => "U",
            _ => "?",
        };
        let bits = self.bits.map(|b| b.to_string()).unwrap_or_else(|| "?".into());
        let rate = self.sample_rate.map(|r| r.to_string()).unwrap_or_else(|| "?".into());
        let channels = self.channels.map(|c| c.to_string()).unwrap_or_else(|| "?".into());
        write!(f, "{sign}{bits}_LE@{rate}/{channels}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_field_matches_anything() {
        let a = AudioFormat { channels: Some(2), ..Default::default() };
        let b = AudioFormat::new();
        assert!(a.matches(&b));
        assert!(b.matches(&a));
    }

    #[test]
    fn mismatched_known_fields_do_not_match() {
        let a = AudioFormat { channels: Some(2), ..Default::default() };
        let b = AudioFormat { channels: Some(1), ..Default::default() };
        assert!(!a.matches(&b));
    }

    #[test]
    fn complete_fills_unknowns_from_reference() {
        let partial = AudioFormat { channels: Some(2), ..Default::default() };
        let reference = AudioFormat::complete_fmt(44_100, 2, 16, true, false);
        let completed = partial.complete(&reference);
        assert!(completed.is_complete());
        assert_eq!(completed.sample_rate, Some(44_100));
        assert_eq!(completed.channels, Some(2));
    }

    #[test]
    fn display_literal_matches_spec_example() {
        let fmt = AudioFormat::complete_fmt(44_100, 2, 16, true, false);
        assert_eq!(fmt.to_string(), "S16_LE@44100/2");
    }

    #[test]
    fn frame_size_zero_when_incomplete() {
        assert_eq!(AudioFormat::new().frame_size(), 0);
    }
}
