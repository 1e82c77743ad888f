// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Ordered playlist with dual ordering and a lazy cursor (spec §3, §4.6).
//!
//! `original` is insertion order; `mapped` is play order, which diverges
//! from `original` once shuffling is active. Both are plain `Vec<usize>`
//! permutations over the same backing `Vec<Track>` rather than a real
//! doubly-linked list — easier to reason about and to property-test,
//! equivalent in the operations this module actually requires.

use crate::track::Track;
use netplayer_proto::now_millis;
use rand::seq::SliceRandom;
use rand::thread_rng;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("no item matching id {0:?} at position {1:?}")]
    ItemNotFound(String, Option<u64>),
    #[error("position {0} out of bounds (len {1})")]
    PositionOutOfBounds(u64, usize),
    #[error("range [{0}, {1}) invalid for length {2}")]
    InvalidRange(usize, usize, usize),
}

/// Which of the two parallel orderings an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    Original,
    Mapped,
}

/// A reference to one occurrence of an id, disambiguating duplicates by an
/// optional position in the addressed ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    pub id: String,
    pub position: Option<u64>,
}

pub struct Queue {
    pub id: Option<String>,
    pub name: Option<String>,
    pub last_changed: i64,
    /// Monotonically increasing counter bumped on every structural mutation;
    /// used by the remote-control layer to detect stale snapshots.
    pub change_id: u64,
    tracks: Vec<Track>,
    /// `original[i]` is the backing-store index of the track at original
    /// position `i`.
    original: Vec<usize>,
    /// `mapped[i]` is the backing-store index of the track at play
    /// position `i`. Equal to `original` until the first shuffle.
    mapped: Vec<usize>,
    /// Set once an actual shuffle has diverged `mapped` from `original`.
    /// While `false`, `mapped` is kept in lockstep with `original` so edits
    /// made through the original ordering stay visible in play order
    /// (spec §4.6: "when editing the original ordering while the mapped
    /// ordering is active [non-shuffle modes], remap afterwards").
    shuffled: bool,
    /// Backing-store index of the cursor item, or `None` if empty/past-end.
    cursor: Option<usize>,
}

impl Queue {
    pub fn new() -> Self {
        Self {
            id: None,
            name: None,
            last_changed: now_millis(),
            change_id: 0,
            tracks: Vec::new(),
            original: Vec::new(),
            mapped: Vec::new(),
            shuffled: false,
            cursor: None,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn touch(&mut self) {
        self.last_changed = now_millis();
        self.change_id += 1;
    }

    fn ordering_mut(&mut self, order: Ordering) -> &mut Vec<usize> {
        match order {
            Ordering::Original => &mut self.original,
            Ordering::Mapped => &mut self.mapped,
        }
    }

    fn ordering(&self, order: Ordering) -> &Vec<usize> {
        match order {
            Ordering::Original => &self.original,
            Ordering::Mapped => &self.mapped,
        }
    }

    /// Insert `items` before `position_original` in the original ordering and
    /// `position_mapped` in the mapped ordering (both are `None` for
    /// append), optionally replacing the entire queue first.
    pub fn add(
        &mut self,
        position_original: Option<u64>,
        position_mapped: Option<u64>,
        items: Vec<Track>,
        replace: bool,
    ) {
        if replace {
            self.tracks.clear();
            self.original.clear();
            self.mapped.clear();
            self.shuffled = false;
            self.cursor = None;
        }
        let base = self.tracks.len();
        let new_indices: Vec<usize> = (base..base + items.len()).collect();
        self.tracks.extend(items);

        let at = position_original.map(|p| p as usize).unwrap_or(self.original.len());
        splice_in(&mut self.original, at.min(self.original.len()), &new_indices);
        let at = position_mapped.map(|p| p as usize).unwrap_or(self.mapped.len());
        splice_in(&mut self.mapped, at.min(self.mapped.len()), &new_indices);

        if self.cursor.is_none() && !self.tracks.is_empty() {
            self.cursor = self.mapped.first().copied();
        }
        self.touch();
    }

    /// Remove every track matched by an `ItemRef`: by id, or by id+position
    /// within the mapped ordering when `position` disambiguates duplicates.
    pub fn remove(&mut self, refs: &[ItemRef]) -> Result<(), QueueError> {
        let mut to_remove = Vec::new();
        for r in refs {
            let idx = self.resolve_item_ref(r)?;
            to_remove.push(idx);
        }
        let cursor_idx = self.cursor;
        self.tracks_retain_except(&to_remove);
        if let Some(c) = cursor_idx {
            if to_remove.contains(&c) {
                self.cursor = self.mapped.first().copied();
            }
        }
        self.touch();
        Ok(())
    }

    fn tracks_retain_except(&mut self, remove: &[usize]) {
        // Removing by swap-index rewrite: rebuild both orderings dropping the
        // removed backing indices, then compact the backing store and remap.
        let keep: Vec<usize> = (0..self.tracks.len()).filter(|i| !remove.contains(i)).collect();
        let mut remap = vec![usize::MAX; self.tracks.len()];
        for (new_idx, &old_idx) in keep.iter().enumerate() {
            remap[old_idx] = new_idx;
        }
        self.tracks = keep.iter().map(|&i| self.tracks[i].clone()).collect();
        self.original = self
            .original
            .iter()
            .filter(|&&i| remap[i] != usize::MAX)
            .map(|&i| remap[i])
            .collect();
        self.mapped = self
            .mapped
            .iter()
            .filter(|&&i| remap[i] != usize::MAX)
            .map(|&i| remap[i])
            .collect();
        self.cursor = self.cursor.and_then(|c| {
            let mapped = remap[c];
            if mapped == usize::MAX { None } else { Some(mapped) }
        });
    }

    /// Move the items matched by `refs` so they appear starting at
    /// `target_position` in the addressed ordering.
    pub fn move_items(
        &mut self,
        order: Ordering,
        target_position: u64,
        refs: &[ItemRef],
    ) -> Result<(), QueueError> {
        let moving: Vec<usize> =
            refs.iter().map(|r| self.resolve_item_ref(r)).collect::<Result<_, _>>()?;
        let ord = self.ordering_mut(order);
        ord.retain(|i| !moving.contains(i));
        let at = (target_position as usize).min(ord.len());
        splice_in(ord, at, &moving);
        if order == Ordering::Original && !self.shuffled {
            // Mapped ordering tracks original verbatim outside shuffle mode;
            // a move addressed at the original ordering must stay visible
            // in play order too.
            self.mapped = self.original.clone();
        }
        self.touch();
        Ok(())
    }

    /// Fisher–Yates shuffle of the mapped ordering over `[start, end)`. If
    /// `move_cursor_to_start`, the cursor's current item is transposed with
    /// the range's first element before shuffling so play continues from
    /// the same track at the new position `start`.
    pub fn shuffle(
        &mut self,
        start: usize,
        end: usize,
        move_cursor_to_start: bool,
    ) -> Result<(), QueueError> {
        if start > end || end > self.mapped.len() {
            return Err(QueueError::InvalidRange(start, end, self.mapped.len()));
        }
        if move_cursor_to_start {
            if let Some(cursor_idx) = self.cursor {
                if let Some(pos) = self.mapped[start..end].iter().position(|&i| i == cursor_idx) {
                    self.mapped.swap(start, start + pos);
                }
            }
        }
        let range_start = if move_cursor_to_start { start + 1 } else { start };
        let slice = &mut self.mapped[range_start..end];
        slice.shuffle(&mut thread_rng());
        self.shuffled = true;
        self.touch();
        Ok(())
    }

    pub fn set_cursor_position(&mut self, pos: u64) -> Result<(), QueueError> {
        let pos = pos as usize;
        if pos >= self.mapped.len() {
            return Err(QueueError::PositionOutOfBounds(pos as u64, self.mapped.len()));
        }
        self.cursor = Some(self.mapped[pos]);
        Ok(())
    }

    pub fn cursor_position(&self) -> Option<u64> {
        let c = self.cursor?;
        self.mapped.iter().position(|&i| i == c).map(|p| p as u64)
    }

    pub fn get_cursor_item(&self) -> Option<&Track> {
        self.cursor.map(|i| &self.tracks[i])
    }

    pub fn get_item(&self, order: Ordering, pos: u64) -> Result<&Track, QueueError> {
        let ord = self.ordering(order);
        let idx = *ord
            .get(pos as usize)
            .ok_or(QueueError::PositionOutOfBounds(pos, ord.len()))?;
        Ok(&self.tracks[idx])
    }

    /// Advance the cursor to the next item in mapped order. Returns `false`
    /// if the cursor fell past the end.
    pub fn advance_cursor(&mut self) -> bool {
        let Some(pos) = self.cursor_position() else { return false };
        let next = pos as usize + 1;
        if next >= self.mapped.len() {
            self.cursor = None;
            false
        } else {
            self.cursor = Some(self.mapped[next]);
            true
        }
    }

    /// Wrap the cursor back to mapped position 0. No-op on an empty queue.
    pub fn wrap_cursor(&mut self) {
        self.cursor = self.mapped.first().copied();
    }

    fn resolve_item_ref(&self, r: &ItemRef) -> Result<usize, QueueError> {
        if let Some(pos) = r.position {
            let idx = *self
                .mapped
                .get(pos as usize)
                .ok_or(QueueError::PositionOutOfBounds(pos, self.mapped.len()))?;
            if self.tracks[idx].id == r.id {
                return Ok(idx);
            }
            return Err(QueueError::ItemNotFound(r.id.clone(), Some(pos)));
        }
        self.tracks
            .iter()
            .position(|t| t.id == r.id)
            .ok_or_else(|| QueueError::ItemNotFound(r.id.clone(), None))
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

fn splice_in(target: &mut Vec<usize>, at: usize, items: &[usize]) {
    for (offset, &item) in items.iter().enumerate() {
        target.insert(at + offset, item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackKind;

    fn track(id: &str) -> Track {
        Track::new(id, id, TrackKind::Track)
    }

    #[test]
    fn add_then_remove_restores_length_and_order() {
        let mut q = Queue::new();
        q.add(None, None, vec![track("a"), track("b"), track("c")], false);
        assert_eq!(q.len(), 3);
        q.remove(&[ItemRef { id: "b".into(), position: None }]).unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(q.get_item(Ordering::Original, 0).unwrap().id, "a");
        assert_eq!(q.get_item(Ordering::Original, 1).unwrap().id, "c");
    }

    #[test]
    fn shuffle_preserves_id_multiset() {
        let mut q = Queue::new();
        let ids: Vec<String> = (0..100).map(|i| format!("t{i}")).collect();
        q.add(None, None, ids.iter().map(|id| track(id)).collect(), false);
        q.shuffle(0, 100, false).unwrap();
        let mut shuffled: Vec<String> =
            (0..100).map(|p| q.get_item(Ordering::Mapped, p).unwrap().id.clone()).collect();
        shuffled.sort();
        let mut expected = ids;
        expected.sort();
        assert_eq!(shuffled, expected);
    }

    #[test]
    fn move_preserves_global_multiset() {
        let mut q = Queue::new();
        q.add(None, None, vec![track("a"), track("b"), track("c")], false);
        q.move_items(Ordering::Mapped, 0, &[ItemRef { id: "c".into(), position: None }]).unwrap();
        let ids: Vec<String> =
            (0..3).map(|p| q.get_item(Ordering::Mapped, p).unwrap().id.clone()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn move_on_original_ordering_remaps_mapped_when_not_shuffled() {
        let mut q = Queue::new();
        q.add(None, None, vec![track("a"), track("b"), track("c")], false);
        q.move_items(Ordering::Original, 0, &[ItemRef { id: "c".into(), position: None }]).unwrap();
        let original: Vec<String> =
            (0..3).map(|p| q.get_item(Ordering::Original, p).unwrap().id.clone()).collect();
        let mapped: Vec<String> =
            (0..3).map(|p| q.get_item(Ordering::Mapped, p).unwrap().id.clone()).collect();
        assert_eq!(original, vec!["c", "a", "b"]);
        assert_eq!(mapped, original);
    }

    #[test]
    fn move_on_original_ordering_does_not_disturb_an_active_shuffle() {
        let mut q = Queue::new();
        q.add(None, None, vec![track("a"), track("b"), track("c")], false);
        q.shuffle(0, 3, false).unwrap();
        let shuffled_mapped: Vec<String> =
            (0..3).map(|p| q.get_item(Ordering::Mapped, p).unwrap().id.clone()).collect();
        q.move_items(Ordering::Original, 0, &[ItemRef { id: "c".into(), position: None }]).unwrap();
        let mapped_after: Vec<String> =
            (0..3).map(|p| q.get_item(Ordering::Mapped, p).unwrap().id.clone()).collect();
        assert_eq!(mapped_after, shuffled_mapped);
    }

    #[test]
    fn set_cursor_position_round_trips() {
        let mut q = Queue::new();
        q.add(None, None, vec![track("a"), track("b")], false);
        q.set_cursor_position(1).unwrap();
        assert_eq!(q.cursor_position(), Some(1));
        assert_eq!(q.get_cursor_item().unwrap().id, "b");
    }

    #[test]
    fn advance_cursor_past_end_clears_cursor() {
        let mut q = Queue::new();
        q.add(None, None, vec![track("a")], false);
        assert!(!q.advance_cursor());
        assert!(q.get_cursor_item().is_none());
    }

    #[test]
    fn remove_out_of_range_position_errors() {
        let mut q = Queue::new();
        q.add(None, None, vec![track("a")], false);
        let err = q.remove(&[ItemRef { id: "a".into(), position: Some(5) }]).unwrap_err();
        assert_eq!(err, QueueError::PositionOutOfBounds(5, 1));
    }
}
