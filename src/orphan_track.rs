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

    src/orphan_track.rs

    Two parallel tracks: sectors with recovered IDs, and data records whose
    IDs could not be matched yet.
*/

//! The `orphan_track` module implements [`OrphanDataCapableTrack`], the raw
//! decoder's output: a parented track of sectors whose ID records were found,
//! alongside an orphan-data track of data records still waiting for a parent.

use crate::sector::MergeOptions;
use crate::track::Track;
use crate::types::enums::{rawbits_time_us, DataRate, Encoding};
use crate::TrackImageError;

#[derive(Clone, Debug, Default)]
pub struct OrphanDataCapableTrack {
    /// Sectors whose ID record was found, data attached or pending.
    pub parented: Track,
    /// Data records (ORPHAN_SECTOR_ID) whose ID could not be matched yet.
    pub orphan_data: Track,
    /// Track length in rawbits (mirrored onto both inner tracks).
    tracklen:  i32,
    /// Track rotation time in microseconds.
    tracktime: i32,
    /// Offset of the index address mark, if one was seen.
    pub track_index_offset: i32,
    /// Set when any decoded ID's cylinder/head disagreed with the physical
    /// location; disables orphan parent guessing by geometry.
    pub cylhead_mismatch: bool,
}

impl OrphanDataCapableTrack {
    pub fn new() -> Self {
        OrphanDataCapableTrack::default()
    }

    pub fn is_empty(&self) -> bool {
        self.parented.is_empty() && self.orphan_data.is_empty()
    }

    /// Total number of sector entries, parented and orphan.
    pub fn sector_count(&self) -> usize {
        self.parented.len() + self.orphan_data.len()
    }

    pub fn tracklen(&self) -> i32 {
        self.tracklen
    }

    pub fn tracktime(&self) -> i32 {
        self.tracktime
    }

    pub fn set_tracklen(&mut self, tracklen: i32) {
        self.tracklen = tracklen;
        self.parented.tracklen = tracklen;
        self.orphan_data.tracklen = tracklen;
    }

    pub fn set_tracktime(&mut self, tracktime: i32) {
        self.tracktime = tracktime;
        self.parented.tracktime = tracktime;
        self.orphan_data.tracktime = tracktime;
    }

    pub fn data_rate(&self) -> Option<DataRate> {
        self.parented.data_rate().or_else(|| self.orphan_data.data_rate())
    }

    pub fn encoding(&self) -> Option<Encoding> {
        self.parented.encoding().or_else(|| self.orphan_data.encoding())
    }

    /// Union with another decode of the same physical track. Sectors merge
    /// under the track tolerance rules; the receiver's track length wins when
    /// both sides carry one.
    pub fn merge(&mut self, other: OrphanDataCapableTrack, opts: &MergeOptions) -> Result<(), TrackImageError> {
        if self.is_empty() && self.tracklen == 0 {
            self.set_tracklen(other.tracklen);
            self.set_tracktime(other.tracktime);
        }
        else if other.tracklen != 0 && other.tracklen != self.tracklen {
            log::debug!(
                "merging orphan-capable tracks with differing tracklens ({} vs {})",
                self.tracklen,
                other.tracklen
            );
        }
        self.parented.add_track(other.parented, opts)?;
        self.orphan_data.add_track(other.orphan_data, opts)?;
        self.cylhead_mismatch |= other.cylhead_mismatch;
        if self.track_index_offset == 0 {
            self.track_index_offset = other.track_index_offset;
        }
        Ok(())
    }

    /// Rotate every sector offset by `-offset_diff` on the track ring, so
    /// this capture lines up with another capture's index phase.
    pub fn sync_this_to_other_as_multi(&mut self, offset_diff: i32) {
        if self.tracklen <= 0 {
            return;
        }
        let tracklen = self.tracklen;
        for track in [&mut self.parented, &mut self.orphan_data] {
            for sector in track.sectors_mut() {
                sector.offset = (sector.offset - offset_diff).rem_euclid(tracklen);
            }
            track.sectors_mut().sort_by_key(|s| s.offset);
        }
        if self.track_index_offset != 0 {
            self.track_index_offset = (self.track_index_offset - offset_diff).rem_euclid(tracklen);
        }
    }

    /// Fold a multi-revolution capture onto a single revolution of
    /// `tracklen_single` rawbits, aligning to `sync_offset`, deduplicating
    /// tolerated-same sectors and recording each sector's source revolution.
    pub fn sync_and_demulti_to_offset(
        &mut self,
        sync_offset: i32,
        tracklen_single: i32,
        opts: &MergeOptions,
    ) -> Result<(), TrackImageError> {
        if tracklen_single <= 0 {
            return Ok(());
        }
        self.parented.sync_and_demulti_to_offset(sync_offset, tracklen_single, opts)?;
        self.orphan_data.sync_and_demulti_to_offset(sync_offset, tracklen_single, opts)?;
        self.tracklen = tracklen_single;
        self.tracktime = self.parented.tracktime.max(self.orphan_data.tracktime);
        self.orphan_data.tracklen = tracklen_single;
        self.parented.tracklen = tracklen_single;
        if self.track_index_offset != 0 {
            self.track_index_offset = (self.track_index_offset - sync_offset).rem_euclid(tracklen_single);
        }
        Ok(())
    }

    /// Pick the single-revolution track length that best explains the
    /// repetition period of equal-header sectors in this capture, tie-broken
    /// toward `tracklen_ideal` (the length the timed track time predicts).
    /// Returns `None` when no repetition is observed close enough to the
    /// ideal.
    pub fn determine_best_track_len(&self, tracklen_ideal: i32) -> Option<i32> {
        if tracklen_ideal <= 0 {
            return None;
        }

        let mut candidates: Vec<i32> = Vec::new();
        let sectors = self.parented.sectors();
        for (i, sector) in sectors.iter().enumerate() {
            for other in sectors.iter().skip(i + 1) {
                if other.header == sector.header {
                    let diff = (other.offset - sector.offset).abs();
                    if diff > 0 {
                        candidates.push(diff);
                    }
                }
            }
        }

        let tolerance = tracklen_ideal / 10;
        candidates
            .into_iter()
            .filter(|c| (c - tracklen_ideal).abs() <= tolerance)
            .min_by_key(|c| (c - tracklen_ideal).abs())
    }

    /// A monotone progress measure: parented sectors are worth one point,
    /// each with good data two more, orphans one.
    pub fn score(&self) -> i32 {
        let parented: i32 = self
            .parented
            .sectors()
            .iter()
            .map(|s| 1 + if s.has_good_data(true, false) { 2 } else { 0 })
            .sum();
        parented + self.orphan_data.len() as i32
    }

    /// Derive the track time from the track length at the given rate.
    pub fn normalise_tracktime(&mut self, data_rate: DataRate, encoding: Encoding) {
        if self.tracklen > 0 {
            let time = rawbits_time_us(data_rate, encoding, self.tracklen as usize).round() as i32;
            self.set_tracktime(time);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::Sector;
    use crate::types::chs::{Header, ORPHAN_SECTOR_ID};

    fn parented_sector(id: u16, offset: i32) -> Sector {
        let mut sector = Sector::new(DataRate::Rate250Kbps, Encoding::Mfm, Header::new(0, 0, id, 2));
        sector.offset = offset;
        sector
    }

    fn orphan_sector(offset: i32) -> Sector {
        let mut sector = Sector::new(DataRate::Rate250Kbps, Encoding::Mfm, Header::new(0, 0, ORPHAN_SECTOR_ID, 2));
        sector.offset = offset;
        sector
    }

    #[test]
    fn invariant_orphans_and_parented_are_partitioned() {
        let opts = MergeOptions::default();
        let mut odct = OrphanDataCapableTrack::new();
        odct.set_tracklen(100_000);
        odct.parented.add(parented_sector(1, 2_000), &opts).unwrap();
        odct.orphan_data.add(orphan_sector(9_000), &opts).unwrap();

        assert!(odct.parented.sectors().iter().all(|s| !s.is_orphan()));
        assert!(odct.orphan_data.sectors().iter().all(|s| s.is_orphan()));
        assert_eq!(odct.sector_count(), 2);
    }

    #[test]
    fn merge_unions_and_keeps_receiver_tracklen() {
        let opts = MergeOptions::default();
        let mut a = OrphanDataCapableTrack::new();
        a.set_tracklen(100_000);
        a.parented.add(parented_sector(1, 2_000), &opts).unwrap();

        let mut b = OrphanDataCapableTrack::new();
        b.set_tracklen(100_100);
        b.parented.add(parented_sector(2, 52_000), &opts).unwrap();
        b.cylhead_mismatch = true;
        b.track_index_offset = 77;

        a.merge(b, &opts).unwrap();
        assert_eq!(a.tracklen(), 100_000);
        assert_eq!(a.parented.len(), 2);
        assert!(a.cylhead_mismatch);
        assert_eq!(a.track_index_offset, 77);
    }

    #[test]
    fn demulti_assigns_revolutions() {
        let opts = MergeOptions::default();
        let single = 100_000;
        let mut odct = OrphanDataCapableTrack::new();
        odct.set_tracklen(3 * single);
        for rev in 0..3 {
            odct.parented.add(parented_sector(1, 4_000 + rev * single), &opts).unwrap();
        }
        odct.sync_and_demulti_to_offset(0, single, &opts).unwrap();
        assert_eq!(odct.parented.len(), 1);
        assert_eq!(odct.tracklen(), single);
        assert_eq!(odct.parented[0].offset, 4_000);
    }

    #[test]
    fn best_track_len_prefers_repetition_near_ideal() {
        let opts = MergeOptions::default();
        let mut odct = OrphanDataCapableTrack::new();
        odct.set_tracklen(300_000);
        // Sector 1 repeats with a 99,950 rawbit period.
        odct.parented.add(parented_sector(1, 1_000), &opts).unwrap();
        odct.parented.add(parented_sector(1, 100_950), &opts).unwrap();
        // Noise pair far from the ideal must not win.
        odct.parented.add(parented_sector(2, 10_000), &opts).unwrap();
        odct.parented.add(parented_sector(2, 40_000), &opts).unwrap();

        assert_eq!(odct.determine_best_track_len(100_000), Some(99_950));
        assert_eq!(odct.determine_best_track_len(0), None);
    }

    #[test]
    fn rotation_rewraps_offsets() {
        let opts = MergeOptions::default();
        let mut odct = OrphanDataCapableTrack::new();
        odct.set_tracklen(100_000);
        odct.parented.add(parented_sector(1, 500), &opts).unwrap();
        odct.parented.add(parented_sector(2, 60_000), &opts).unwrap();
        odct.sync_this_to_other_as_multi(1_000);
        let offsets: Vec<i32> = odct.parented.sectors().iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![59_000, 99_500]);
    }
}
