// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Playlist items (spec §3 "Track", "StreamRef").

use crate::format::AudioFormat;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One candidate stream for a track. `url` may carry a `service://` scheme;
/// resolving it against a service registry is the remote-control layer's job,
/// not ours — by the time a `StreamRef` reaches the [`crate::pipeline::Pipeline`]
/// its `url` is whatever the Controller was handed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamRef {
    pub format_type: String,
    pub url: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
}

impl StreamRef {
    /// The `AudioFormat` this ref declares, with everything it doesn't
    /// mention left `None`.
    pub fn declared_format(&self) -> AudioFormat {
        AudioFormat { sample_rate: self.sample_rate, channels: self.channels, ..AudioFormat::new() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrackKind {
    Track,
    Stream,
}

/// A playlist item. Attribute mutation goes through `attributes_lock` so a
/// metadata merge from the remote-control layer never blocks a queue
/// traversal or a cursor move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub display_text: String,
    pub kind: TrackKind,
    pub streaming_refs: Vec<StreamRef>,
    #[serde(default)]
    attributes: BTreeMap<String, serde_json::Value>,
    #[serde(skip, default = "default_attr_lock")]
    attributes_lock: Arc<Mutex<()>>,
}

fn default_attr_lock() -> Arc<Mutex<()>> {
    Arc::new(Mutex::new(()))
}

impl Track {
    pub fn new(id: impl Into<String>, display_text: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            display_text: display_text.into(),
            kind,
            streaming_refs: Vec::new(),
            attributes: BTreeMap::new(),
            attributes_lock: default_attr_lock(),
        }
    }

    pub fn with_streaming_refs(mut self, refs: Vec<StreamRef>) -> Self {
        self.streaming_refs = refs;
        self
    }

    pub fn attributes(&self) -> BTreeMap<String, serde_json::Value> {
        let _guard = self.attributes_lock.lock();
        self.attributes.clone()
    }

    /// Replace the attribute map wholesale.
    pub fn replace_attributes(&mut self, attributes: BTreeMap<String, serde_json::Value>) {
        let _guard = self.attributes_lock.lock();
        self.attributes = attributes;
    }

    /// Merge keys from `patch` into the existing map, overwriting on
    /// conflict.
    pub fn merge_attributes(&mut self, patch: BTreeMap<String, serde_json::Value>) {
        let _guard = self.attributes_lock.lock();
        self.attributes.extend(patch);
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.display_text == other.display_text
            && self.kind == other.kind
            && self.streaming_refs == other.streaming_refs
            && self.attributes() == other.attributes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_preserves_untouched_keys() {
        let mut track = Track::new("t1", "Song", TrackKind::Track);
        track.replace_attributes(BTreeMap::from([
            ("artist".to_string(), serde_json::json!("A")),
            ("album".to_string(), serde_json::json!("B")),
        ]));
        track.merge_attributes(BTreeMap::from([("album".to_string(), serde_json::json!("C"))]));
        let attrs = track.attributes();
        assert_eq!(attrs["artist"], serde_json::json!("A"));
        assert_eq!(attrs["album"], serde_json::json!("C"));
    }

    #[test]
    fn declared_format_leaves_unspecified_fields_none() {
        let r = StreamRef {
            format_type: "audio/mpeg".into(),
            url: "http://example.test/a.mp3".into(),
            sample_rate: None,
            channels: None,
        };
        assert!(!r.declared_format().is_complete());
    }
}
