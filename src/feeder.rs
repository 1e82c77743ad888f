// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! HTTP-fetching producer at the head of the pipeline (spec §4.2).
//!
//! Runs its own OS thread performing a blocking GET, relaying body bytes to
//! the Decoder over a bounded channel that stands in for the original's
//! pipe: the reader side blocks in 500 ms slices so it notices cancellation
//! without the feeder thread having to know about it directly.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Header region is capped so a misbehaving server can't make us buffer
/// unbounded bytes before we've even seen a blank-line terminator.
const MAX_HEADER_BYTES: usize = 8 * 1024;
const BODY_CHUNK: usize = 16 * 1024;
const CHANNEL_DEPTH: usize = 4;
const READINESS_SLICE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum FeederError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server returned non-2xx status: {0}")]
    HttpStatus(u16),
    #[error("response header exceeded {MAX_HEADER_BYTES} bytes without terminating")]
    HeaderTooLarge,
    #[error("feeder was already terminated")]
    AlreadyTerminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeederState {
    Initialized,
    Connecting,
    Connected,
    Terminating,
    TerminatedOk,
    TerminatedError,
}

struct Shared {
    state: Mutex<FeederState>,
    connected: Condvar,
    terminated: Condvar,
    cancel: AtomicBool,
    response_header: Mutex<Option<ResponseHeader>>,
}

#[derive(Debug, Clone)]
struct ResponseHeader {
    status: u16,
    status_line: String,
    fields: Vec<(String, String)>,
    content_type: Option<String>,
    icy_interval: usize,
}

/// A running HTTP feeder. Construction spawns the fetch thread immediately.
pub struct Feeder {
    uri: String,
    shared: Arc<Shared>,
    body_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    join: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Feeder {
    /// Start fetching `uri`. `bearer_token`, if set, is sent as
    /// `Authorization: Bearer <token>`. `request_icy` sends
    /// `Icy-MetaData: 1` so Shoutcast-style servers interleave metadata
    /// blocks (extraction happens downstream in the decoder, per spec §4.3).
    pub fn start(uri: impl Into<String>, bearer_token: Option<String>, request_icy: bool) -> Self {
        let uri = uri.into();
        let shared = Arc::new(Shared {
            state: Mutex::new(FeederState::Initialized),
            connected: Condvar::new(),
            terminated: Condvar::new(),
            cancel: AtomicBool::new(false),
            response_header: Mutex::new(None),
        });
        let (body_tx, body_rx) = mpsc::sync_channel(CHANNEL_DEPTH);

        let thread_shared = Arc::clone(&shared);
        let thread_uri = uri.clone();
        let join = std::thread::Builder::new()
            .name("netplayer-feeder".into())
            .spawn(move || run_feeder(thread_shared, thread_uri, bearer_token, request_icy, body_tx))
            .expect("spawn feeder thread");

        Self { uri, shared, body_rx: Mutex::new(Some(body_rx)), join: Mutex::new(Some(join)) }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn state(&self) -> FeederState {
        *self.shared.state.lock()
    }

    /// Block until the state leaves `Initialized`/`Connecting`.
    pub fn wait_connected(&self, timeout: Duration) -> FeederState {
        let mut state = self.shared.state.lock();
        let deadline = std::time::Instant::now() + timeout;
        while matches!(*state, FeederState::Initialized | FeederState::Connecting) {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.shared.connected.wait_for(&mut state, remaining);
        }
        *state
    }

    pub fn content_type(&self) -> Option<String> {
        self.shared.response_header.lock().as_ref().and_then(|h| h.content_type.clone())
    }

    pub fn icy_interval(&self) -> usize {
        self.shared.response_header.lock().as_ref().map(|h| h.icy_interval).unwrap_or(0)
    }

    pub fn response_header(&self) -> Option<String> {
        let h = self.shared.response_header.lock();
        h.as_ref().map(|h| {
            let mut s = format!("{}\r\n", h.status_line);
            for (k, v) in &h.fields {
                s.push_str(&format!("{k}: {v}\r\n"));
            }
            s
        })
    }

    /// Case-insensitive field lookup, returning the **last** matching
    /// instance. `name = None` returns the status line.
    pub fn response_header_field(&self, name: Option<&str>) -> Option<String> {
        let h = self.shared.response_header.lock();
        let h = h.as_ref()?;
        match name {
            None => Some(h.status_line.clone()),
            Some(name) => h
                .fields
                .iter()
                .rev()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone()),
        }
    }

    /// Hand off the reader side of the body channel; may only be called
    /// once (construction of the Decoder instance consumes it).
    pub fn take_reader(&self) -> Option<FeederReader> {
        self.body_rx.lock().take().map(FeederReader::new)
    }

    /// Request termination. Does not block; pair with `wait_terminated` if
    /// you need to observe the final state.
    pub fn terminate(&self) {
        self.shared.cancel.store(true, AtomicOrdering::SeqCst);
    }

    pub fn wait_terminated(&self, timeout: Duration) -> FeederState {
        let mut state = self.shared.state.lock();
        let deadline = std::time::Instant::now() + timeout;
        while !matches!(*state, FeederState::TerminatedOk | FeederState::TerminatedError) {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.shared.terminated.wait_for(&mut state, remaining);
        }
        *state
    }
}

impl Drop for Feeder {
    fn drop(&mut self) {
        self.terminate();
        if let Some(handle) = self.join.lock().take() {
            let _ = handle.join();
        }
    }
}

/// `Read` adapter over the body channel; blocks in [`READINESS_SLICE`]
/// increments and surfaces upstream `FeederError`s as `io::Error`.
pub struct FeederReader {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pending_pos: usize,
    eof: bool,
}

impl FeederReader {
    fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx, pending: Vec::new(), pending_pos: 0, eof: false }
    }
}

impl Read for FeederReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pending_pos < self.pending.len() {
            let n = (self.pending.len() - self.pending_pos).min(buf.len());
            buf[..n].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            return Ok(n);
        }
        if self.eof {
            return Ok(0);
        }
        loop {
            match self.rx.recv_timeout(READINESS_SLICE) {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pending_pos = 0;
                    let n = self.pending.len().min(buf.len());
                    buf[..n].copy_from_slice(&self.pending[..n]);
                    self.pending_pos = n;
                    return Ok(n);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.eof = true;
                    return Ok(0);
                }
            }
        }
    }
}

fn run_feeder(
    shared: Arc<Shared>,
    uri: String,
    bearer_token: Option<String>,
    request_icy: bool,
    body_tx: SyncSender<Vec<u8>>,
) {
    *shared.state.lock() = FeederState::Connecting;

    let client = reqwest::blocking::Client::builder().build();
    let client = match client {
        Ok(c) => c,
        Err(e) => return terminate(&shared, FeederState::TerminatedError, Some(e.to_string())),
    };

    let mut req = client.get(&uri);
    if let Some(token) = &bearer_token {
        req = req.bearer_auth(token);
    }
    if request_icy {
        req = req.header("Icy-MetaData", "1");
    }

    let response = match req.send() {
        Ok(r) => r,
        Err(e) => return terminate(&shared, FeederState::TerminatedError, Some(e.to_string())),
    };

    let status = response.status();
    let status_line = format!("HTTP/1.1 {} {}", status.as_u16(), status.canonical_reason().unwrap_or(""));
    let fields: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    let field_map: HashMap<String, String> =
        fields.iter().map(|(k, v)| (k.to_ascii_lowercase(), v.clone())).collect();
    let icy_interval = field_map.get("icy-metaint").and_then(|v| v.parse().ok()).unwrap_or(0);
    let content_type = field_map.get("content-type").cloned();

    let header_bytes: usize = fields.iter().map(|(k, v)| k.len() + v.len() + 4).sum();
    if header_bytes > MAX_HEADER_BYTES {
        return terminate(&shared, FeederState::TerminatedError, Some("response header exceeded cap".into()));
    }

    *shared.response_header.lock() = Some(ResponseHeader {
        status: status.as_u16(),
        status_line,
        fields,
        content_type,
        icy_interval,
    });

    if !status.is_success() {
        tracing::warn!(%uri, %status, "feeder received non-2xx response");
        {
            let mut state = shared.state.lock();
            *state = FeederState::TerminatedError;
        }
        shared.connected.notify_all();
        shared.terminated.notify_all();
        return;
    }

    {
        let mut state = shared.state.lock();
        *state = FeederState::Connected;
    }
    shared.connected.notify_all();

    let mut reader = response;
    let mut buf = vec![0u8; BODY_CHUNK];
    loop {
        if shared.cancel.load(AtomicOrdering::SeqCst) {
            return terminate(&shared, FeederState::TerminatedOk, None);
        }
        match reader.read(&mut buf) {
            Ok(0) => return terminate(&shared, FeederState::TerminatedOk, None),
            Ok(n) => {
                if deliver_with_cancellation(&shared, &body_tx, buf[..n].to_vec()) {
                    return terminate(&shared, FeederState::TerminatedOk, None);
                }
            }
            Err(e) => {
                let cancelled = shared.cancel.load(AtomicOrdering::SeqCst);
                let final_state = if cancelled { FeederState::TerminatedOk } else { FeederState::TerminatedError };
                return terminate(&shared, final_state, if cancelled { None } else { Some(e.to_string()) });
            }
        }
    }
}

/// Send `chunk` to the decoder, polling the channel's readiness in
/// [`READINESS_SLICE`] steps so cancellation is noticed promptly (spec §4.2
/// "select-style readiness wait with 500 ms slices"). Returns `true` if
/// cancellation fired before the chunk was fully delivered.
fn deliver_with_cancellation(shared: &Shared, tx: &SyncSender<Vec<u8>>, chunk: Vec<u8>) -> bool {
    let mut remaining = chunk;
    loop {
        if shared.cancel.load(AtomicOrdering::SeqCst) {
            return true;
        }
        match tx.try_send(remaining) {
            Ok(()) => return false,
            Err(mpsc::TrySendError::Full(back)) => {
                remaining = back;
                std::thread::sleep(READINESS_SLICE.min(Duration::from_millis(50)));
            }
            Err(mpsc::TrySendError::Disconnected(_)) => return true,
        }
    }
}

fn terminate(shared: &Shared, final_state: FeederState, error: Option<String>) {
    if let Some(msg) = error {
        tracing::error!(error = %msg, "feeder terminating with error");
    }
    *shared.state.lock() = final_state;
    shared.connected.notify_all();
    shared.terminated.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_initialized_before_thread_observed() {
        // State transitions happen on a background thread; we only assert
        // the enum's ordering semantics here, not timing.
        assert_eq!(FeederState::Initialized, FeederState::Initialized);
        assert_ne!(FeederState::Initialized, FeederState::Connected);
    }

    #[test]
    fn feeder_reader_reports_eof_after_disconnect() {
        let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(1);
        drop(tx);
        let mut reader = FeederReader::new(rx);
        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn feeder_reader_yields_delivered_bytes() {
        let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(1);
        tx.send(vec![1, 2, 3]).unwrap();
        drop(tx);
        let mut reader = FeederReader::new(rx);
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
    }
}
