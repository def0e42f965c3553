/*
    trackfox
    https://github.com/dbalsom/trackfox

    Copyright 2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/track_ids.rs

    Sector ID interleave schemes: generation, matching, and completion of
    partially observed ID sequences.
*/

//! The `track_ids` module reconstructs the sector ID scheme of a track from a
//! partial observation. Given the IDs recovered so far (with holes), it tries
//! every plausible (sector count, interleave) layout; an unambiguous match
//! fills in the missing IDs, which lets orphan data records be assigned to
//! the sector slot their offset falls into.

use crate::types::chs::CylHead;

/// A full revolution's sector ID sequence, in physical slot order. Negative
/// entries mark unknown slots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackSectorIds {
    ids: Vec<i32>,
}

impl TrackSectorIds {
    pub fn new(ids: Vec<i32>) -> Self {
        TrackSectorIds { ids }
    }

    pub fn ids(&self) -> &[i32] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Generate the ID layout for a regular format: `sectors` slots filled
    /// with `base..base+sectors`, spread by `interleave` and shifted per
    /// cylinder by `skew`.
    pub fn generate(cylhead: CylHead, sectors: usize, interleave: usize, skew: usize, offset: usize, base: i32) -> Self {
        if sectors == 0 {
            return TrackSectorIds::default();
        }
        let mut ids = vec![-1i32; sectors];
        let mut used = vec![false; sectors];

        for s in 0..sectors {
            let mut index = (offset + s * interleave + skew * cylhead.cyl as usize) % sectors;
            // Find a free slot starting from the expected position.
            while used[index] {
                index = (index + 1) % sectors;
            }
            used[index] = true;
            ids[index] = base + s as i32;
        }
        TrackSectorIds { ids }
    }

    /// The canonical (cylinder 0) layout for a sector count and interleave.
    pub fn for_layout(sectors: usize, interleave: usize) -> Self {
        TrackSectorIds::generate(CylHead::new(0, 0), sectors, interleave, 0, 0, 1)
    }

    /// Try to align an incomplete ID sequence against this layout, treating
    /// negative entries as wildcards. Returns the rotation offset on a match.
    pub fn match_sector_ids(&self, incomplete: &TrackSectorIds) -> Option<usize> {
        let this_len = self.ids.len();
        if this_len == 0 {
            return None;
        }
        // Find the first known ID; it must exist in this layout.
        let (sector, id) = incomplete.ids.iter().enumerate().find(|(_, &id)| id >= 0)?;
        let this_sector = self.ids.iter().position(|&this_id| this_id == *id)?;
        let offset = (sector + this_len - this_sector) % this_len;

        for (i, &other_id) in incomplete.ids.iter().enumerate().skip(sector + 1) {
            if other_id >= 0 && other_id != self.ids[(i + this_len - offset) % this_len] {
                return None;
            }
        }
        Some(offset)
    }

    /// Search every (sector count, interleave) candidate for a layout that
    /// explains an incomplete ID sequence. Ambiguous results yield an empty
    /// scheme.
    pub fn find_complete_for(incomplete: &TrackSectorIds, sectors_min: usize) -> TrackSectorIds {
        let mut sectors_min = sectors_min;
        if sectors_min == 0 {
            let last_known = incomplete.ids.iter().rposition(|&id| id >= 0).map_or(0, |i| i + 1);
            let max_id = incomplete.ids.iter().copied().max().unwrap_or(0).max(0) as usize;
            sectors_min = last_known.max(max_id);
        }

        let mut result = TrackSectorIds::default();
        for sectors in sectors_min..=incomplete.len() {
            // One-sector layouts have no interleave to try and are never
            // candidates.
            for interleave in 1..sectors {
                let layout = TrackSectorIds::for_layout(sectors, interleave);
                if let Some(offset) = layout.match_sector_ids(incomplete) {
                    if !result.is_empty() {
                        // Ambiguous.
                        return TrackSectorIds::default();
                    }
                    let mut ids = layout.ids;
                    ids.rotate_right(offset % sectors);
                    result = TrackSectorIds { ids };
                }
            }
        }
        result
    }
}

/// A discovered sector slot: its ID (negative while unknown) and the rawbit
/// offset of its ID record.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IdAndOffset {
    pub id:     i32,
    pub offset: i32,
}

impl IdAndOffset {
    pub fn new(id: i32, offset: i32) -> Self {
        IdAndOffset { id, offset }
    }
}

/// The slot table of a track being reconstructed.
#[derive(Clone, Debug, Default)]
pub struct IdAndOffsetList {
    pub slots: Vec<IdAndOffset>,
}

impl IdAndOffsetList {
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn sector_ids(&self) -> TrackSectorIds {
        TrackSectorIds::new(self.slots.iter().map(|s| s.id).collect())
    }

    pub fn replace_missing_from(&mut self, ids: &TrackSectorIds) {
        for (slot, &id) in self.slots.iter_mut().zip(ids.ids()) {
            if slot.id < 0 {
                slot.id = id;
            }
        }
    }

    /// Complete the unknown slot IDs by searching for an unambiguous layout.
    pub fn replace_missing_by_finding(&mut self, sectors_min: usize) -> bool {
        let complete = TrackSectorIds::find_complete_for(&self.sector_ids(), sectors_min);
        if complete.is_empty() || complete.len() < self.slots.len() {
            return false;
        }
        self.replace_missing_from(&complete);
        true
    }

    /// The slot nearest to `offset` on the track ring, if one sits within
    /// `tolerance` rawbits.
    pub fn find_slot_for_offset(&self, offset: i32, tracklen: i32, tolerance: i32) -> Option<&IdAndOffset> {
        let tracklen = tracklen.max(1);
        let ring_distance = |slot_offset: i32| {
            let forward = (offset - slot_offset).rem_euclid(tracklen);
            forward.min(tracklen - forward)
        };
        self.slots
            .iter()
            .filter(|slot| ring_distance(slot.offset) <= tolerance)
            .min_by_key(|slot| ring_distance(slot.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_layout() {
        let ids = TrackSectorIds::for_layout(9, 1);
        assert_eq!(ids.ids(), &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn interleave_two_layout() {
        let ids = TrackSectorIds::for_layout(9, 2);
        // 9 sectors at 2:1: each ID lands two slots after the previous.
        assert_eq!(ids.ids(), &[1, 6, 2, 7, 3, 8, 4, 9, 5]);
    }

    #[test]
    fn skew_shifts_by_cylinder() {
        let flat = TrackSectorIds::generate(CylHead::new(0, 0), 5, 1, 2, 0, 1);
        let skewed = TrackSectorIds::generate(CylHead::new(1, 0), 5, 1, 2, 0, 1);
        assert_eq!(flat.ids(), &[1, 2, 3, 4, 5]);
        assert_eq!(skewed.ids(), &[4, 5, 1, 2, 3]);
    }

    #[test]
    fn matching_fills_missing_ids() {
        // Observed: slots with holes, from a 9-sector 1:1 layout rotated by 2.
        let incomplete = TrackSectorIds::new(vec![8, -1, 1, -1, 3, -1, 5, -1, 7]);
        let complete = TrackSectorIds::find_complete_for(&incomplete, 0);
        assert_eq!(complete.ids(), &[8, 9, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn ambiguous_observation_yields_empty() {
        // A single known ID matches many layouts.
        let incomplete = TrackSectorIds::new(vec![1, -1, -1]);
        assert!(TrackSectorIds::find_complete_for(&incomplete, 0).is_empty());
    }

    #[test]
    fn lone_id_never_completes_to_a_single_slot_layout() {
        // A one-sector layout has no interleave to try, so a lone observed
        // ID must not "complete" to a single bogus slot.
        let incomplete = TrackSectorIds::new(vec![1]);
        assert!(TrackSectorIds::find_complete_for(&incomplete, 0).is_empty());
    }

    #[test]
    fn slot_completion() {
        let mut list = IdAndOffsetList {
            slots: vec![
                IdAndOffset::new(1, 1_000),
                IdAndOffset::new(-1, 12_000),
                IdAndOffset::new(3, 23_000),
                IdAndOffset::new(-1, 34_000),
                IdAndOffset::new(5, 45_000),
            ],
        };
        assert!(list.replace_missing_by_finding(0));
        let ids: Vec<i32> = list.slots.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }
}
