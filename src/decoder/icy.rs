// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shoutcast/ICY inline metadata extraction (spec §4.3).
//!
//! Wraps an audio byte stream that has `icy_interval` bytes of audio
//! followed by a one-byte length prefix (`16 * len` bytes of metadata) and
//! yields only the audio bytes, firing a callback with the parsed metadata
//! each time a non-empty block goes by. With `icy_interval == 0` this is a
//! transparent passthrough.

use super::IcyMetadata;
use std::io::Read;
use std::sync::Arc;

pub struct IcyStrippingReader<R> {
    inner: R,
    interval: usize,
    bytes_until_marker: usize,
    on_metadata: Option<Arc<dyn Fn(IcyMetadata) + Send + Sync>>,
}

impl<R: Read> IcyStrippingReader<R> {
    pub fn new(inner: R, interval: usize, on_metadata: Option<Arc<dyn Fn(IcyMetadata) + Send + Sync>>) -> Self {
        Self { inner, interval, bytes_until_marker: interval, on_metadata }
    }

    fn read_exact_from_inner(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            match self.inner.read(&mut buf[total..])? {
                0 => break,
                n => total += n,
            }
        }
        Ok(total)
    }

    fn consume_metadata_block(&mut self) -> std::io::Result<()> {
        let mut len_byte = [0u8; 1];
        if self.read_exact_from_inner(&mut len_byte)? == 0 {
            return Ok(());
        }
        let block_len = len_byte[0] as usize * 16;
        if block_len == 0 {
            return Ok(());
        }
        let mut block = vec![0u8; block_len];
        let read = self.read_exact_from_inner(&mut block)?;
        block.truncate(read);
        if let Some(cb) = &self.on_metadata {
            let mut parsed = parse_icy_metadata(&block);
            if !parsed.is_empty() {
                parsed.insert("timestamp".to_string(), netplayer_proto::now_millis().to_string());
                cb(parsed);
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for IcyStrippingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.interval == 0 {
            return self.inner.read(buf);
        }
        let want = buf.len().min(self.bytes_until_marker);
        if want == 0 {
            self.consume_metadata_block()?;
            self.bytes_until_marker = self.interval;
            return self.read(buf);
        }
        let n = self.inner.read(&mut buf[..want])?;
        self.bytes_until_marker -= n;
        Ok(n)
    }
}

/// Parses a block like `StreamTitle='Hello';StreamUrl='http://x';` — pairs
/// split on `;`, keys and values split on the first `=`, values unwrapped
/// from single quotes. Trailing NUL padding and empty segments are ignored.
fn parse_icy_metadata(block: &[u8]) -> IcyMetadata {
    let text = String::from_utf8_lossy(block);
    let text = text.trim_end_matches('\0');
    let mut map = IcyMetadata::new();
    for pair in text.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once('=') else { continue };
        let value = value.trim();
        let value = value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')).unwrap_or(value);
        map.insert(key.trim().to_string(), value.to_string());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;

    #[test]
    fn strips_metadata_block_and_reports_key_value_map() {
        let mut data = Vec::new();
        data.extend_from_slice(&[0xAAu8; 16]); // 16 bytes of "audio"
        let meta = b"StreamTitle='Hello';";
        let padded_len = meta.len().div_ceil(16) * 16;
        data.push((padded_len / 16) as u8);
        data.extend_from_slice(meta);
        data.resize(data.len() + (padded_len - meta.len()), 0);
        data.extend_from_slice(&[0xBBu8; 8]); // trailing audio, shorter than interval

        let captured: Arc<Mutex<Vec<IcyMetadata>>> = Arc::new(Mutex::new(Vec::new()));
        let captured_clone = captured.clone();
        let mut reader = IcyStrippingReader::new(
            Cursor::new(data),
            16,
            Some(Arc::new(move |m| captured_clone.lock().unwrap().push(m))),
        );
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(out, [vec![0xAAu8; 16], vec![0xBBu8; 8]].concat());
        let calls = captured.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].get("StreamTitle").map(String::as_str), Some("Hello"));
    }

    #[test]
    fn zero_interval_is_transparent_passthrough() {
        let mut reader = IcyStrippingReader::new(Cursor::new(vec![1, 2, 3]), 0, None);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn parse_icy_metadata_ignores_empty_segments() {
        let parsed = parse_icy_metadata(b"StreamTitle='A';;StreamUrl='B';\0\0\0");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["StreamTitle"], "A");
        assert_eq!(parsed["StreamUrl"], "B");
    }
}
