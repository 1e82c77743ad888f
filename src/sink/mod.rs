// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Device-specific PCM consumer behind a uniform contract (spec §4.4).
//!
//! Device strings use `<backend>:<device>` (e.g. `alsa:hw:0,0`,
//! `pulse:@DEFAULT_SINK@`, `null`); an unprefixed string addresses the
//! first registered backend.

#[cfg(feature = "alsa-backend")]
mod alsa_backend;
mod null;
#[cfg(feature = "pulse-backend")]
mod pulse_backend;

use crate::fifo::Fifo;
use crate::format::AudioFormat;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("format {0} is incomplete; sinks require a fully negotiated format")]
    IncompleteFormat(AudioFormat),
    #[error("device {0:?} rejected the requested format")]
    FormatRejected(String),
    #[error("no backend registered for prefix {0:?}")]
    NoBackendFor(String),
    #[error("device error: {0}")]
    Device(String),
    #[error("operation requires the sink to be Running")]
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Initialized,
    Running,
    Terminating,
    TerminatedOk,
    TerminatedError,
}

/// Termination policy for [`Sink::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Let the device finish playing out what's already queued.
    Drain,
    /// Discard pending data immediately.
    Drop,
    /// Don't join the sink thread at all; detach and let it die on its own.
    Force,
}

/// A backend descriptor, registered once at startup.
pub trait SinkBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// List `(device_id, description)` pairs this backend can see right
    /// now. Descriptions may contain embedded newlines; callers must not
    /// flatten them.
    fn get_devices(&self) -> Vec<(String, String)>;

    /// Open `device` (the part after the backend prefix) for playback and
    /// query its pause/volume capabilities. Must not start producing sound
    /// yet — that's `play`.
    fn new_if(&self, device: &str) -> Result<Box<dyn SinkInterface>, SinkError>;
}

/// An opened, not-yet-running device handle. `Sync` because a running
/// handle is shared (via `Arc`) between the pipeline's monitor thread and
/// whatever issues `pause`/`set_volume` concurrently.
pub trait SinkInterface: Send + Sync {
    fn state(&self) -> SinkState;
    fn can_pause(&self) -> bool;
    fn has_volume(&self) -> bool;

    /// Configure the device for `format` (which must be complete) and start
    /// the sink thread draining `pcm_fifo`. Implementations keep their
    /// mutable state behind interior mutability so a single opened handle
    /// can be shared (via `Arc`) between the pipeline's monitor thread and
    /// whatever wants to issue `pause`/`set_volume` concurrently.
    fn play(&self, format: AudioFormat, pcm_fifo: Arc<Fifo>) -> Result<(), SinkError>;

    fn pause(&self, on: bool) -> Result<(), SinkError>;
    fn set_volume(&self, volume: f64, muted: bool) -> Result<(), SinkError>;

    /// Stop the running sink per `mode`, transitioning through
    /// `Terminating` to a terminal state. Always clears the device even on
    /// an error path.
    fn stop(&self, mode: StopMode) -> Result<(), SinkError>;
}

/// Parses a device string into `(backend_prefix, device)`. A bare backend
/// name with no `:` (e.g. `null`) addresses that backend with an empty
/// device string; anything else with no recognized prefix is handed whole
/// to the first registered backend.
pub fn split_device_string(device_string: &str) -> (Option<&str>, &str) {
    if let Some((prefix, rest)) = device_string.split_once(':') {
        if is_known_backend_prefix(prefix) {
            return (Some(prefix), rest);
        }
    } else if is_known_backend_prefix(device_string) {
        return (Some(device_string), "");
    }
    (None, device_string)
}

fn is_known_backend_prefix(prefix: &str) -> bool {
    matches!(prefix, "alsa" | "pulse" | "null")
}

pub struct SinkRegistry {
    backends: Vec<Box<dyn SinkBackend>>,
}

impl SinkRegistry {
    pub fn with_default_backends() -> Self {
        let mut backends: Vec<Box<dyn SinkBackend>> = Vec::new();
        #[cfg(feature = "alsa-backend")]
        backends.push(Box::new(alsa_backend::AlsaBackend::new()));
        #[cfg(feature = "pulse-backend")]
        backends.push(Box::new(pulse_backend::PulseBackend::new()));
        backends.push(Box::new(null::NullBackend::new()));
        Self { backends }
    }

    /// A registry with no backends registered, for callers (tests, or a
    /// daemon configured to only ever address one custom backend) that
    /// don't want the default device backends pre-populated.
    pub fn empty() -> Self {
        Self { backends: Vec::new() }
    }

    pub fn register(&mut self, backend: Box<dyn SinkBackend>) {
        self.backends.push(backend);
    }

    /// Opens `device_string`, resolving its backend prefix (or defaulting
    /// to the first registered backend).
    pub fn open(&self, device_string: &str) -> Result<Box<dyn SinkInterface>, SinkError> {
        let (prefix, device) = split_device_string(device_string);
        let backend = match prefix {
            Some(prefix) => self
                .backends
                .iter()
                .find(|b| b.name() == prefix)
                .ok_or_else(|| SinkError::NoBackendFor(prefix.to_string()))?,
            None => self.backends.first().ok_or_else(|| SinkError::NoBackendFor("<none registered>".into()))?,
        };
        backend.new_if(device)
    }
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::with_default_backends()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_prefixed_device_string() {
        assert_eq!(split_device_string("alsa:hw:0,0"), (Some("alsa"), "hw:0,0"));
        assert_eq!(split_device_string("pulse:@DEFAULT_SINK@"), (Some("pulse"), "@DEFAULT_SINK@"));
    }

    #[test]
    fn bare_backend_name_addresses_that_backend_with_empty_device() {
        assert_eq!(split_device_string("null"), (Some("null"), ""));
    }

    #[test]
    fn unrecognized_device_string_has_no_backend() {
        assert_eq!(split_device_string("/dev/audio"), (None, "/dev/audio"));
    }

    #[test]
    fn null_backend_is_always_registered() {
        let registry = SinkRegistry::with_default_backends();
        assert!(registry.open("null").is_ok());
    }
}
