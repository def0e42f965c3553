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

    src/track.rs

    An ordered collection of sectors with a track length and rotation time.
*/

//! The `track` module implements [`Track`], the offset-ordered sector
//! collection produced by decoding and scanning, together with its lookup,
//! merge and renormalisation operations.

use std::ops::{Index, IndexMut};

use crate::ibmpc;
use crate::sector::{MergeOptions, Sector, SectorMerge};
use crate::track_ids::TrackSectorIds;
use crate::types::chs::{CylHead, Header};
use crate::types::enums::{
    are_offsets_tolerated_same, data_byte_pos_as_rawbit_offset, rawbits_time_us, AddressMark, DataRate, Encoding,
};
use crate::TrackImageError;

/// The outcome of adding a sector to a track.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AddResult {
    Unchanged,
    Append,
    Insert,
    Merge,
}

/// A nominal regular track layout, used to synthesize tracks and to seed the
/// track builder.
#[derive(Clone, Debug)]
pub struct TrackFormat {
    pub data_rate:  DataRate,
    pub encoding:   Encoding,
    pub sectors:    u8,
    pub size:       u8,
    pub gap3:       u8,
    pub fill:       u8,
    pub base:       u8,
    pub interleave: u8,
}

impl Default for TrackFormat {
    fn default() -> Self {
        TrackFormat {
            data_rate:  DataRate::Rate250Kbps,
            encoding:   Encoding::Mfm,
            sectors:    9,
            size:       2,
            gap3:       0x54,
            fill:       0x00,
            base:       1,
            interleave: 1,
        }
    }
}

impl TrackFormat {
    /// Byte offset of the Nth sector's sync run from the index.
    pub fn sector_start_bytes(&self, index: usize) -> usize {
        let footprint = ibmpc::sector_overhead(self.data_rate, self.encoding)
            + Header::size_code_to_length(self.size)
            + self.gap3 as usize;
        ibmpc::track_overhead(self.encoding) + index * footprint
    }

    /// Rawbit offset of the Nth sector's ID address mark from the index.
    pub fn id_offset(&self, index: usize) -> i32 {
        let marker_sync = ibmpc::am_overhead(self.encoding) - 1;
        let bytes = self.sector_start_bytes(index) + ibmpc::sync_len(self.encoding) + marker_sync;
        data_byte_pos_as_rawbit_offset(bytes as i32, self.encoding)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Track {
    sectors: Vec<Sector>,
    /// Track length in rawbits.
    pub tracklen:  i32,
    /// Track rotation time in microseconds.
    pub tracktime: i32,
}

impl Track {
    pub fn new() -> Self {
        Track::default()
    }

    pub fn with_capacity(sectors: usize) -> Self {
        Track {
            sectors: Vec::with_capacity(sectors),
            ..Track::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    pub fn sectors_mut(&mut self) -> &mut Vec<Sector> {
        &mut self.sectors
    }

    pub fn clear(&mut self) {
        self.sectors.clear();
        self.tracklen = 0;
        self.tracktime = 0;
    }

    /// A secondary view of the sectors, ordered by sector ID rather than
    /// offset.
    pub fn sectors_ordered_by_id(&self) -> Vec<&Sector> {
        let mut view: Vec<&Sector> = self.sectors.iter().collect();
        view.sort_by(|a, b| a.header.cmp(&b.header));
        view
    }

    pub fn data_rate(&self) -> Option<DataRate> {
        self.sectors.first().map(|s| s.data_rate)
    }

    pub fn encoding(&self) -> Option<Encoding> {
        self.sectors.first().map(|s| s.encoding)
    }

    pub fn is_mixed_encoding(&self) -> bool {
        match self.encoding() {
            Some(encoding) => self.sectors.iter().any(|s| s.encoding != encoding),
            None => false,
        }
    }

    /// Microseconds from the index for a rawbit offset on this track.
    pub fn time_of_offset(&self, offset: i32) -> i32 {
        match (self.data_rate(), self.encoding()) {
            (Some(rate), Some(encoding)) => (rawbits_time_us(rate, encoding, 1) * offset as f64).round() as i32,
            _ => 0,
        }
    }

    /// Rawbit offset on this track for a microsecond time from the index.
    pub fn offset_of_time(&self, time: i32) -> i32 {
        match (self.data_rate(), self.encoding()) {
            (Some(rate), Some(encoding)) => (time as f64 / rawbits_time_us(rate, encoding, 1)).round() as i32,
            _ => 0,
        }
    }

    /// Add a sector, merging it into an existing sector when one with the
    /// same header sits within offset tolerance, otherwise inserting it in
    /// ascending offset order.
    pub fn add(&mut self, mut sector: Sector, opts: &MergeOptions) -> Result<AddResult, TrackImageError> {
        if let Some(rate) = self.data_rate() {
            sector.normalise_data_rate(rate);
        }

        let tracklen = self.tracklen;
        if let Some(existing) = self
            .sectors
            .iter_mut()
            .find(|s| s.is_sector_tolerated_same(&sector, opts.byte_tolerance_of_time, tracklen))
        {
            let merge = existing.merge(sector, opts)?;
            return Ok(if merge == SectorMerge::Unchanged {
                AddResult::Unchanged
            }
            else {
                AddResult::Merge
            });
        }

        if self.sectors.last().is_some_and(|last| last.offset > sector.offset) {
            let index = self.sectors.partition_point(|s| s.offset <= sector.offset);
            self.sectors.insert(index, sector);
            Ok(AddResult::Insert)
        }
        else {
            self.sectors.push(sector);
            Ok(AddResult::Append)
        }
    }

    /// Add every sector of another track.
    pub fn add_track(&mut self, track: Track, opts: &MergeOptions) -> Result<(), TrackImageError> {
        if self.tracklen == 0 {
            self.tracklen = track.tracklen;
            self.tracktime = track.tracktime;
        }
        for sector in track.sectors {
            self.add(sector, opts)?;
        }
        Ok(())
    }

    pub fn insert(&mut self, index: usize, sector: Sector) {
        self.sectors.insert(index, sector);
    }

    pub fn remove(&mut self, index: usize) -> Sector {
        self.sectors.remove(index)
    }

    pub fn find(&self, header: &Header) -> Option<&Sector> {
        self.sectors.iter().find(|s| s.header == *header)
    }

    pub fn find_mut(&mut self, header: &Header) -> Option<&mut Sector> {
        self.sectors.iter_mut().find(|s| s.header == *header)
    }

    /// Find a sector matching on cylinder, head and sector, ignoring size.
    pub fn find_ignoring_size(&self, header: &Header) -> Option<&Sector> {
        self.sectors.iter().find(|s| s.header.compare_chr(header))
    }

    /// Index of the first sector at or past the given offset.
    pub fn find_first_from_offset(&self, offset: i32) -> Option<usize> {
        self.sectors.iter().position(|s| s.offset >= offset)
    }

    /// Whether the sector's header occurs elsewhere on the track at a
    /// distinctly different offset.
    pub fn is_repeated(&self, sector: &Sector, opts: &MergeOptions) -> bool {
        self.sectors.iter().any(|s| {
            s.header == sector.header
                && !are_offsets_tolerated_same(s.offset, sector.offset, opts.byte_tolerance_of_time, self.tracklen)
        })
    }

    /// Rawbits available to the sector before the next sector begins (or the
    /// track wraps back to the first).
    pub fn data_extent_bits(&self, index: usize) -> i32 {
        let offset = self.sectors[index].offset;
        match self.sectors.get(index + 1) {
            Some(next) => next.offset - offset,
            None => {
                let wrap = self.sectors.first().map_or(0, |first| first.offset);
                (self.tracklen - offset) + wrap
            }
        }
    }

    pub fn data_extent_bytes(&self, index: usize) -> i32 {
        let encoding = self.sectors[index].encoding;
        self.data_extent_bits(index) / encoding.rawbits_per_byte() as i32
    }

    /// Whether the sector's data field runs into the next sector on the
    /// track.
    pub fn data_overlap(&self, index: usize) -> bool {
        let sector = &self.sectors[index];
        let needed = ibmpc::id_to_data_distance_bytes(sector.data_rate, sector.encoding) as i32 + sector.size() as i32 + 2;
        self.data_extent_bytes(index) < needed
    }

    /// A track consisting of a single 8K sector.
    pub fn is_8k_sector(&self) -> bool {
        self.sectors.len() == 1 && self.sectors[0].is_8k_sector()
    }

    pub fn has_all_good_data(&self, opts: &MergeOptions) -> bool {
        self.sectors
            .iter()
            .all(|s| s.has_good_data(!opts.normal_disk, opts.normal_disk))
    }

    pub fn has_any_good_data(&self) -> bool {
        self.sectors.iter().any(|s| s.has_good_data(false, false))
    }

    /// Identity copies of the sectors whose ID CRC verified.
    pub fn good_id_crc_sectors(&self) -> Vec<Sector> {
        self.sectors
            .iter()
            .filter(|s| !s.has_bad_id_crc())
            .map(|s| s.copy_without_data(true))
            .collect()
    }

    /// Sectors whose data is stable under the current options.
    pub fn stable_sectors(&self, opts: &MergeOptions) -> Vec<Sector> {
        self.sectors
            .iter()
            .filter(|s| s.has_stable_data(true, opts))
            .cloned()
            .collect()
    }

    /// Rescale the track to a new length, scaling sector offsets and
    /// recomputing the track time from the data rate.
    pub fn set_tracklen_and_normalise(&mut self, new_tracklen: i32) {
        if self.tracklen == new_tracklen || new_tracklen <= 0 {
            return;
        }
        if self.tracklen > 0 {
            for sector in &mut self.sectors {
                sector.offset = (sector.offset as f64 * new_tracklen as f64 / self.tracklen as f64).round() as i32;
            }
        }
        self.tracklen = new_tracklen;
        if let (Some(rate), Some(encoding)) = (self.data_rate(), self.encoding()) {
            self.tracktime = rawbits_time_us(rate, encoding, new_tracklen as usize).round() as i32;
        }
    }

    /// Interpret this track as N revolutions of `tracklen_single` rawbits:
    /// rotate by `sync_offset`, fold every sector offset into a single
    /// revolution and merge duplicates, recording each sector's source
    /// revolution.
    pub fn sync_and_demulti_to_offset(
        &mut self,
        sync_offset: i32,
        tracklen_single: i32,
        opts: &MergeOptions,
    ) -> Result<(), TrackImageError> {
        if tracklen_single <= 0 {
            return Ok(());
        }
        let sectors = std::mem::take(&mut self.sectors);
        self.tracklen = tracklen_single;
        if let (Some(rate), Some(encoding)) = (sectors.first().map(|s| s.data_rate), sectors.first().map(|s| s.encoding)) {
            self.tracktime = rawbits_time_us(rate, encoding, tracklen_single as usize).round() as i32;
        }
        for mut sector in sectors {
            sector.revolution = sector.offset.div_euclid(tracklen_single);
            let mut offset = (sector.offset - sync_offset).rem_euclid(tracklen_single);
            if offset == 0 {
                // Offset 0 means "unknown"; nudge folded sectors off it.
                offset = 1;
            }
            sector.offset = offset;
            self.add(sector, opts)?;
        }
        Ok(())
    }

    /// Find the rotation between this track and a reference track sharing
    /// its sector headers: the most common offset delta, if any headers
    /// match.
    pub fn find_sync_offset_compared_to(&self, other: &Track, opts: &MergeOptions) -> Option<i32> {
        let tracklen = if self.tracklen > 0 { self.tracklen } else { other.tracklen };
        if tracklen <= 0 {
            return None;
        }
        let mut diffs: Vec<i32> = Vec::new();
        for sector in &self.sectors {
            for other_sector in other.sectors().iter().filter(|s| s.header == sector.header) {
                diffs.push((sector.offset - other_sector.offset).rem_euclid(tracklen));
            }
        }
        if diffs.is_empty() {
            return None;
        }
        diffs.sort_unstable();
        // Pick the representative of the biggest tolerance bucket.
        let tolerance = opts.byte_tolerance_of_time * 16;
        let mut best = (0usize, diffs[0]);
        let mut start = 0;
        for i in 0..diffs.len() {
            while diffs[i] - diffs[start] > tolerance {
                start += 1;
            }
            let count = i - start + 1;
            if count > best.0 {
                best = (count, diffs[start]);
            }
        }
        Some(best.1)
    }

    /// Construct the nominal sector layout for a format, with empty data.
    pub fn format(cylhead: CylHead, format: &TrackFormat) -> Track {
        let ids = TrackSectorIds::generate(cylhead, format.sectors as usize, format.interleave as usize, 0, 0, format.base as i32);
        let mut track = Track::with_capacity(format.sectors as usize);

        let footprint = ibmpc::sector_overhead(format.data_rate, format.encoding)
            + Header::size_code_to_length(format.size)
            + format.gap3 as usize;
        let total_bytes = ibmpc::track_overhead(format.encoding) + format.sectors as usize * footprint;
        track.tracklen = data_byte_pos_as_rawbit_offset(total_bytes as i32, format.encoding);
        track.tracktime = rawbits_time_us(format.data_rate, format.encoding, track.tracklen as usize).round() as i32;

        for (i, id) in ids.ids().iter().enumerate() {
            let header = Header::from_cylhead(cylhead, *id as u16, format.size);
            let mut sector = Sector::new(format.data_rate, format.encoding, header);
            sector.gap3 = format.gap3;
            sector.offset = format.id_offset(i);
            track.sectors.push(sector);
        }
        track
    }

    /// Fill sector data in offset order from a flat byte stream, returning
    /// the number of bytes consumed.
    pub fn populate(&mut self, bytes: &[u8], opts: &MergeOptions) -> usize {
        let mut consumed = 0;
        for sector in &mut self.sectors {
            let size = sector.size();
            if consumed + size > bytes.len() {
                break;
            }
            sector.remove_data();
            sector.add_with_read_stats(bytes[consumed..consumed + size].to_vec(), false, AddressMark::Data, opts);
            consumed += size;
        }
        consumed
    }
}

impl Index<usize> for Track {
    type Output = Sector;

    fn index(&self, index: usize) -> &Sector {
        &self.sectors[index]
    }
}

impl IndexMut<usize> for Track {
    fn index_mut(&mut self, index: usize) -> &mut Sector {
        &mut self.sectors[index]
    }
}

impl<'a> IntoIterator for &'a Track {
    type Item = &'a Sector;
    type IntoIter = std::slice::Iter<'a, Sector>;

    fn into_iter(self) -> Self::IntoIter {
        self.sectors.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector_at(id: u16, offset: i32) -> Sector {
        let mut sector = Sector::new(DataRate::Rate500Kbps, Encoding::Mfm, Header::new(0, 0, id, 2));
        sector.offset = offset;
        sector
    }

    #[test]
    fn add_keeps_offset_order() {
        let opts = MergeOptions::default();
        let mut track = Track::new();
        track.tracklen = 200_000;
        assert_eq!(track.add(sector_at(1, 10_000), &opts).unwrap(), AddResult::Append);
        assert_eq!(track.add(sector_at(3, 50_000), &opts).unwrap(), AddResult::Append);
        assert_eq!(track.add(sector_at(2, 30_000), &opts).unwrap(), AddResult::Insert);
        let offsets: Vec<i32> = track.sectors().iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![10_000, 30_000, 50_000]);
    }

    #[test]
    fn add_merges_within_tolerance() {
        let opts = MergeOptions::default();
        let mut track = Track::new();
        track.tracklen = 200_000;
        track.add(sector_at(1, 10_000), &opts).unwrap();

        let mut dup = sector_at(1, 10_500);
        dup.add_with_read_stats(vec![0xE5; 512], false, AddressMark::Data, &opts);
        assert_eq!(track.add(dup, &opts).unwrap(), AddResult::Merge);
        assert_eq!(track.len(), 1);
        assert_eq!(track[0].copies(), 1);
    }

    #[test]
    fn repeated_sector_is_detected() {
        let opts = MergeOptions::default();
        let mut track = Track::new();
        track.tracklen = 200_000;
        // Same header at two distinctly different offsets.
        track.add(sector_at(5, 10_000), &opts).unwrap();
        track.add(sector_at(5, 60_000), &opts).unwrap();
        assert_eq!(track.len(), 2);
        assert!(track.is_repeated(&track[0].clone(), &opts));

        let lone = sector_at(7, 90_000);
        track.add(lone.clone(), &opts).unwrap();
        assert!(!track.is_repeated(&lone, &opts));
    }

    #[test]
    fn id_ordered_view_does_not_disturb_offset_order() {
        let opts = MergeOptions::default();
        let mut track = Track::new();
        track.tracklen = 200_000;
        track.add(sector_at(9, 10_000), &opts).unwrap();
        track.add(sector_at(1, 30_000), &opts).unwrap();
        let by_id: Vec<u16> = track.sectors_ordered_by_id().iter().map(|s| s.header.sector).collect();
        assert_eq!(by_id, vec![1, 9]);
        assert_eq!(track[0].header.sector, 9);
    }

    #[test]
    fn data_overlap_detects_crowded_sectors() {
        let opts = MergeOptions::default();
        let mut track = Track::new();
        track.tracklen = 200_000;
        // 512-byte sector needs 44 + 514 bytes = 8928 rawbits before the next ID.
        track.add(sector_at(1, 1_000), &opts).unwrap();
        track.add(sector_at(2, 4_000), &opts).unwrap();
        track.add(sector_at(3, 60_000), &opts).unwrap();
        assert!(track.data_overlap(0));
        assert!(!track.data_overlap(1));
    }

    #[test]
    fn demulti_folds_revolutions() {
        let opts = MergeOptions::default();
        let tracklen_single = 100_000;
        let mut track = Track::new();
        track.tracklen = 3 * tracklen_single;
        // The same physical sector seen on three revolutions.
        for rev in 0..3 {
            let mut sector = sector_at(1, 5_000 + rev * tracklen_single);
            sector.add_with_read_stats(vec![0xE5; 512], false, AddressMark::Data, &opts);
            track.add(sector, &opts).unwrap();
        }
        assert_eq!(track.len(), 3);

        track.sync_and_demulti_to_offset(0, tracklen_single, &opts).unwrap();
        assert_eq!(track.len(), 1);
        assert_eq!(track.tracklen, tracklen_single);
        assert_eq!(track[0].offset, 5_000);
        // A merged fold keeps one copy read three times.
        assert_eq!(track[0].copies(), 1);
        assert_eq!(track[0].data_copy_read_stats(0).read_count(), 3);
    }

    #[test]
    fn sync_offset_against_reference_track() {
        let opts = MergeOptions::default();
        let mut reference = Track::new();
        reference.tracklen = 100_000;
        let mut shifted = Track::new();
        shifted.tracklen = 100_000;
        for id in 1..=5 {
            reference.add(sector_at(id, id as i32 * 11_000), &opts).unwrap();
            shifted.add(sector_at(id, (id as i32 * 11_000 + 7_000) % 100_000), &opts).unwrap();
        }
        let sync = shifted.find_sync_offset_compared_to(&reference, &opts);
        assert_eq!(sync, Some(7_000));
    }

    #[test]
    fn format_and_populate_build_a_regular_track() {
        let opts = MergeOptions::default();
        let format = TrackFormat {
            data_rate: DataRate::Rate500Kbps,
            sectors: 18,
            size: 2,
            gap3: 0x54,
            ..TrackFormat::default()
        };
        let mut track = Track::format(CylHead::new(0, 0), &format);
        assert_eq!(track.len(), 18);
        // Strictly ascending offsets.
        assert!(track.sectors().windows(2).all(|w| w[0].offset < w[1].offset));

        let bytes = vec![0xA5u8; 18 * 512];
        assert_eq!(track.populate(&bytes, &opts), bytes.len());
        assert!(track.has_all_good_data(&opts));
    }

    #[test]
    fn renormalising_tracklen_scales_offsets() {
        let opts = MergeOptions::default();
        let mut track = Track::new();
        track.tracklen = 100_000;
        track.add(sector_at(1, 25_000), &opts).unwrap();
        track.set_tracklen_and_normalise(200_000);
        assert_eq!(track.tracklen, 200_000);
        assert_eq!(track[0].offset, 50_000);
    }
}
