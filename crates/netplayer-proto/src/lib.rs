// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Wire-contract types for the remote-control command surface described in
//! the core's spec §6. This crate defines the shape of requests/responses
//! that the (out-of-scope) RPC dispatch layer exchanges with the core; it
//! does not implement the RPC transport itself.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, matching the original daemon's
/// timestamp convention (`utils.c`'s `getTimeStamp`) rather than `SystemTime`.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A single candidate stream for a track: format, URL, and declared format
/// hints. `url` may use a `service://` scheme resolved externally against a
/// service registry before the core ever sees a resolved `http(s)://` URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamRefDto {
    pub format_type: String,
    pub url: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
}

/// A playlist item as exchanged with the remote-control layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackDto {
    pub id: String,
    pub display_text: String,
    pub kind: TrackKindDto,
    pub streaming_refs: Vec<StreamRefDto>,
    #[serde(default)]
    pub attributes: std::collections::BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackKindDto {
    Track,
    Stream,
}

/// `setPlaybackQueueMode` values (spec §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum QueueModeDto {
    Queue,
    Shuffle,
    RepeatQueue,
    RepeatItem,
    RepeatShuffle,
    Dynamic,
}

/// A single item reference used by `removeTracks`/`moveTracks`: an id plus
/// an optional position disambiguating duplicate ids at the same id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemRefDto {
    pub id: String,
    pub position: Option<u64>,
}

/// Reported player status, returned from `getPlayerStatus` and pushed
/// unsolicited on track boundaries / ICY metadata changes (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatusDto {
    pub playing: bool,
    pub paused: bool,
    pub volume: f64,
    pub muted: bool,
    pub repeat_mode: QueueModeDto,
    pub current_track_id: Option<String>,
    pub seek_position_ms: Option<u64>,
    pub last_changed: i64,
}

/// JSON-RPC-shaped error codes (spec §7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    GenericError,
}

/// A typed command failure, carrying a machine-readable code alongside a
/// human-readable message, matching spec §7's "JSON-RPC-shaped error
/// record".
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error, PartialEq)]
#[error("{code:?}: {message}")]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::GenericError, message)
    }
}

/// Keys written to the persisted configuration store (spec §6). Only these
/// keys are ever written back; any other key found on disk is left alone.
pub mod persist_keys {
    pub const PLAYER_VOLUME: &str = "player_volume";
    pub const PLAYER_MUTED: &str = "player_muted";
    pub const PLAYER_REPEAT_MODE: &str = "player_repeat_mode";
    pub const PLAYER_QUEUE: &str = "player_queue";
    pub const PLAYER_QUEUE_POSITION: &str = "player_queue_position";
    pub const DEVICE_UUID: &str = "device_uuid";
    pub const PLAYER_NAME: &str = "player_name";
    pub const PLAYER_INTERFACE: &str = "player_interface";
    pub const PLAYER_AUDIO_DEVICE: &str = "player_audio_device";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_positive_and_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn command_error_round_trips_through_json() {
        let err = CommandError::invalid_params("bad position");
        let json = serde_json::to_string(&err).unwrap();
        let back: CommandError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn queue_mode_uses_kebab_case_on_the_wire() {
        let json = serde_json::to_string(&QueueModeDto::RepeatShuffle).unwrap();
        assert_eq!(json, "\"repeat-shuffle\"");
    }
}
