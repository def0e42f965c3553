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

    src/sector.rs

    A single logical sector: header, data copies, read statistics and the
    merge rules applied across repeated acquisitions.
*/

//! The `sector` module implements [`Sector`], the canonical representation of
//! a recovered sector: one CHRN header plus any number of data snapshots with
//! per-snapshot read statistics, and the deterministic rules for merging a
//! newly acquired snapshot into the set.

use std::fmt::{self, Display, Formatter};
use std::ops::{Add, AddAssign};

use crate::crc::{Crc16, CRC_A1A1A1, CRC_INIT};
use crate::ibmpc;
use crate::types::chs::Header;
use crate::types::enums::{
    are_interchangeable_data_rates, are_offsets_tolerated_same, convert_offset_by_data_rate,
    data_byte_pos_as_rawbit_offset, AddressMark, DataRate, Encoding,
};
use crate::TrackImageError;

/// DD 8K sectors are considered complete at 6K.
pub const CHECKSUMMABLE_8K_COMPLETE_SIZE: usize = 0x1800;

/// Tunable sector and track merge behaviour. The defaults describe a plain
/// single-pass dump of a normal disk image.
#[derive(Clone, Debug)]
pub struct MergeOptions {
    /// Maximum number of data copies retained per sector.
    pub max_copies: usize,
    /// Keep accumulating copies even after a good CRC.
    pub paranoia: bool,
    /// The disk is expected to be regular: matching geometry, natural-size
    /// data only.
    pub normal_disk: bool,
    /// Max bitstream position difference, in byte times, for sectors to be
    /// considered the same. Used to match sectors between revolutions, and
    /// needs to cope with the larger sync differences after weak sectors. We
    /// still require the header to match, so only close repeated headers
    /// should be a problem.
    pub byte_tolerance_of_time: i32,
    /// Read count at which a copy counts as stable in paranoia mode.
    pub stability_level: i32,
    /// Byte used to pad short good data to its natural size.
    pub fill_byte: u8,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            max_copies: 3,
            paranoia: false,
            normal_disk: false,
            byte_tolerance_of_time: 64,
            stability_level: 2,
            fill_byte: 0x00,
        }
    }
}

/// Read statistics attached to one data copy: how many reads (good or bad)
/// produced this exact snapshot. Only live devices provide these; image
/// sources count one read per copy.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DataReadStats {
    read_count: i32,
}

impl DataReadStats {
    pub fn new(read_count: i32) -> Self {
        DataReadStats { read_count }
    }

    pub fn read_count(&self) -> i32 {
        self.read_count
    }

    pub fn is_stable(&self, stability_level: i32) -> bool {
        self.read_count >= stability_level
    }
}

impl AddAssign for DataReadStats {
    fn add_assign(&mut self, rhs: DataReadStats) {
        self.read_count += rhs.read_count;
    }
}

impl Add for DataReadStats {
    type Output = DataReadStats;

    fn add(mut self, rhs: DataReadStats) -> DataReadStats {
        self += rhs;
        self
    }
}

/// The outcome of offering a data snapshot to a sector.
///
/// * `Unchanged`: the new data is ignored, and not counted in read stats.
/// * `Matched`: the new data already exists; counted in read stats.
/// * `Improved`: the new data replaced an existing copy; counted in read stats.
/// * `NewData`: the new data was added as a fresh copy.
/// * `NewDataOverLimit`: the new data could not be added due to the copy limit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SectorMerge {
    Unchanged,
    Matched,
    Improved,
    NewData,
    NewDataOverLimit,
}

/// Internal checksum schemes recognised inside 8K sector bodies. Such sectors
/// always fail the record CRC (the FDC cannot read past 6K), but a validating
/// internal checksum marks the copy as authoritative.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChecksumMethod {
    Sum16Be,
    Xor8,
}

/// Identify internal checksum schemes that validate over the 6K payload of an
/// 8K sector body.
pub fn checksum_methods(data: &[u8]) -> Vec<ChecksumMethod> {
    let mut methods = Vec::new();
    if data.len() < CHECKSUMMABLE_8K_COMPLETE_SIZE + 1 {
        return methods;
    }
    let payload = &data[..CHECKSUMMABLE_8K_COMPLETE_SIZE];

    if data.len() >= CHECKSUMMABLE_8K_COMPLETE_SIZE + 2 {
        let sum = payload.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
        if data[CHECKSUMMABLE_8K_COMPLETE_SIZE..CHECKSUMMABLE_8K_COMPLETE_SIZE + 2] == sum.to_be_bytes() {
            methods.push(ChecksumMethod::Sum16Be);
        }
    }
    let xor = payload.iter().fold(0u8, |acc, &b| acc ^ b);
    if data[CHECKSUMMABLE_8K_COMPLETE_SIZE] == xor {
        methods.push(ChecksumMethod::Xor8);
    }
    methods
}

#[derive(Clone, Debug, Default)]
pub struct Sector {
    /// cyl, head, sector, size
    pub header: Header,
    pub data_rate: DataRate,
    pub encoding: Encoding,
    /// Bitstream offset of the address mark from the index, in rawbits.
    pub offset: i32,
    /// The nth disk revolution on which this sector was first observed.
    pub revolution: i32,
    /// Inter-sector gap size.
    pub gap3: u8,
    /// The data address mark variant last observed.
    pub dam: AddressMark,

    bad_id_crc: bool,
    bad_data_crc: bool,
    data: Vec<Vec<u8>>,
    data_read_stats: Vec<DataReadStats>,
    /// Reading attempts on this sector, good or bad; provided only by real
    /// devices.
    read_attempts: i32,
    constant_disk: bool,
}

impl Sector {
    pub fn new(data_rate: DataRate, encoding: Encoding, header: Header) -> Self {
        Sector {
            header,
            data_rate,
            encoding,
            dam: AddressMark::Data,
            constant_disk: true,
            ..Sector::default()
        }
    }

    /// A copy of this sector's identity without any data attached.
    pub fn copy_without_data(&self, keep_read_attempts: bool) -> Sector {
        let mut sector = Sector {
            data: Vec::new(),
            data_read_stats: Vec::new(),
            ..self.clone()
        };
        // No data is copied, so the data CRC state must be the default too.
        sector.bad_data_crc = false;
        if !keep_read_attempts {
            sector.read_attempts = 0;
        }
        sector
    }

    /// The natural size declared by the header, in bytes.
    pub fn size(&self) -> usize {
        self.header.sector_size()
    }

    /// The length of the held data copies (all copies share one length).
    pub fn data_size(&self) -> usize {
        self.data.first().map_or(0, Vec::len)
    }

    pub fn datas(&self) -> &[Vec<u8>] {
        &self.data
    }

    pub fn copies(&self) -> usize {
        self.data.len()
    }

    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn data_copy(&self, copy: usize) -> &[u8] {
        &self.data[copy.min(self.data.len() - 1)]
    }

    /// The copy with the highest read count; insertion order breaks ties.
    pub fn best_copy_index(&self) -> usize {
        let mut best = 0;
        for (i, stats) in self.data_read_stats.iter().enumerate() {
            if stats.read_count() > self.data_read_stats[best].read_count() {
                best = i;
            }
        }
        best
    }

    pub fn data_best_copy(&self) -> &[u8] {
        &self.data[self.best_copy_index()]
    }

    pub fn data_copy_read_stats(&self, instance: usize) -> DataReadStats {
        self.data_read_stats[instance]
    }

    pub fn data_read_stats(&self) -> &[DataReadStats] {
        &self.data_read_stats
    }

    pub fn read_attempts(&self) -> i32 {
        self.read_attempts
    }

    pub fn set_read_attempts(&mut self, read_attempts: i32) {
        self.read_attempts = read_attempts;
    }

    pub fn add_read_attempts(&mut self, read_attempts: i32) {
        self.read_attempts += read_attempts;
    }

    pub fn is_constant_disk(&self) -> bool {
        self.constant_disk
    }

    pub fn set_constant_disk(&mut self, constant_disk: bool) {
        self.constant_disk = constant_disk;
    }

    /// Older image files know nothing about read stats; give copies that
    /// arrived without any a single-read entry each.
    pub fn fix_read_stats(&mut self) {
        if !self.data.is_empty() && self.data_read_stats.is_empty() {
            self.data_read_stats = vec![DataReadStats::new(1); self.data.len()];
            self.read_attempts = self.data.len() as i32;
        }
    }

    pub fn has_bad_id_crc(&self) -> bool {
        self.bad_id_crc
    }

    pub fn has_bad_data_crc(&self) -> bool {
        self.bad_data_crc
    }

    pub fn is_deleted(&self) -> bool {
        self.dam.is_deleted_data()
    }

    pub fn is_orphan(&self) -> bool {
        self.header.is_orphan()
    }

    /// A sector with a bad header CRC cannot carry data.
    pub fn set_bad_id_crc(&mut self, bad: bool) {
        self.bad_id_crc = bad;
        if bad {
            self.remove_data();
        }
    }

    /// Mark the data CRC state. Clearing the flag converts the held copies to
    /// good data: all but one copy is dropped outside paranoia mode and short
    /// data is padded to the natural size.
    pub fn set_bad_data_crc(&mut self, bad: bool, opts: &MergeOptions) {
        self.bad_data_crc = bad;

        if !bad && self.has_data() {
            if self.copies() > 1 && !opts.paranoia {
                self.resize_data(1);
            }
            let size = self.size();
            if self.data_size() < size {
                for data in &mut self.data {
                    data.resize(size, opts.fill_byte);
                }
            }
        }
    }

    pub fn erase_data(&mut self, instance: usize) {
        self.data.remove(instance);
        self.data_read_stats.remove(instance);
    }

    pub fn resize_data(&mut self, count: usize) {
        self.data.truncate(count);
        self.data_read_stats.truncate(count);
    }

    pub fn remove_data(&mut self) {
        self.data.clear();
        self.data_read_stats.clear();
        self.bad_data_crc = false;
        self.dam = AddressMark::Data;
    }

    pub fn are_copies_full(&self, max_copies: usize) -> bool {
        self.copies() >= max_copies
    }

    pub fn limit_copies(&mut self, max_copies: usize) {
        if self.copies() > max_copies {
            self.resize_data(max_copies);
        }
    }

    pub fn has_gap_data(&self) -> bool {
        self.data_size() > self.size()
    }

    pub fn has_short_data(&self) -> bool {
        self.data_size() < self.size()
    }

    pub fn has_normal_data(&self) -> bool {
        self.has_data() && self.data_size() == self.size()
    }

    pub fn has_good_normal_data(&self) -> bool {
        self.has_normal_data() && !self.bad_data_crc
    }

    /// Whether this sector holds usable data.
    ///
    /// `consider_normal_disk` demands a good copy of exactly the natural
    /// size. Otherwise a good-CRC copy of at least the natural size
    /// qualifies, as does a recognised checksummable 8K body when
    /// `consider_checksummable_8k` is set.
    pub fn has_good_data(&self, consider_checksummable_8k: bool, consider_normal_disk: bool) -> bool {
        if consider_normal_disk {
            return self.has_good_normal_data();
        }
        (consider_checksummable_8k && self.is_checksummable_8k_sector())
            || (self.has_data() && !self.bad_data_crc && self.data_size() >= self.size())
    }

    /// A stable sector is a good sector, and in paranoia mode one whose best
    /// copy was read at least the stability level number of times.
    pub fn has_stable_data(&self, consider_checksummable_8k: bool, opts: &MergeOptions) -> bool {
        let result = self.has_good_data(consider_checksummable_8k && !opts.normal_disk, opts.normal_disk);
        if !opts.paranoia || !result {
            return result;
        }
        self.data_read_stats[self.best_copy_index()].is_stable(opts.stability_level)
    }

    pub fn good_data_copy_stability_score(&self, instance: usize, opts: &MergeOptions) -> i32 {
        if !opts.paranoia {
            return 1;
        }
        self.data_read_stats[instance].read_count().min(opts.stability_level)
    }

    /// +3 and CPC disks treat 8K sectors as virtually complete.
    pub fn is_8k_sector(&self) -> bool {
        self.data_rate == DataRate::Rate250Kbps && self.encoding == Encoding::Mfm && self.header.size == 6 && self.has_data()
    }

    pub fn is_checksummable_8k_sector(&self) -> bool {
        self.is_8k_sector() && !checksum_methods(self.data_copy(0)).is_empty()
    }

    /// Offer a new data snapshot under the merge rules.
    ///
    /// `counter_mode` selects read-stat combination: summing for constant
    /// (image) sources, read-rate combination for live devices.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        new_data: Vec<u8>,
        new_bad_crc: bool,
        new_dam: AddressMark,
        new_read_attempts: i32,
        new_data_read_stats: DataReadStats,
        counter_mode: bool,
        update_read_attempts: bool,
        opts: &MergeOptions,
    ) -> SectorMerge {
        let (ret, affected, improved_stats) = self.add_data_copy(new_data, new_bad_crc, new_dam, opts);
        self.process_merge_result(ret, new_read_attempts, new_data_read_stats, counter_mode, affected, improved_stats);
        if update_read_attempts {
            self.read_attempts += new_read_attempts;
        }
        ret
    }

    /// Offer a snapshot counting as a single read.
    pub fn add_with_read_stats(&mut self, new_data: Vec<u8>, new_bad_crc: bool, new_dam: AddressMark, opts: &MergeOptions) -> SectorMerge {
        self.add(new_data, new_bad_crc, new_dam, 1, DataReadStats::new(1), true, true, opts)
    }

    fn add_data_copy(
        &mut self,
        mut new_data: Vec<u8>,
        bad_crc: bool,
        new_dam: AddressMark,
        opts: &MergeOptions,
    ) -> (SectorMerge, usize, DataReadStats) {
        let mut ret = SectorMerge::NewData;
        let mut improved_stats = DataReadStats::default();

        // A sector with a bad header CRC can't carry any data.
        if self.bad_id_crc {
            return (SectorMerge::Unchanged, 0, improved_stats);
        }

        // If the existing sector has good data, ignore supplied data if it's bad.
        if bad_crc && self.has_good_data(false, false) {
            return (SectorMerge::Unchanged, 0, improved_stats);
        }

        // If the existing sector is bad, new good data replaces it all.
        if !bad_crc && self.bad_data_crc {
            self.remove_data();
        }

        // 8K sectors always have a CRC error, but may include a secondary
        // checksum. A recognised checksum in the new data replaces whatever
        // we hold; a recognised checksum in the existing copy wins instead.
        if self.is_8k_sector() {
            if !checksum_methods(&new_data).is_empty() {
                self.remove_data();
            }
            else if self.copies() == 1 && !checksum_methods(&self.data[0]).is_empty() {
                return (SectorMerge::Unchanged, 0, improved_stats);
            }
        }

        // DD 8K sectors are considered complete at 6K, everything else at the
        // incoming length.
        let complete_size = if self.is_8k_sector() {
            CHECKSUMMABLE_8K_COMPLETE_SIZE
        }
        else {
            new_data.len()
        };

        // Compare existing copies with the new data to avoid redundant
        // copies: keep one optimally-sized copy among matching content.
        let mut i = 0;
        while i < self.data.len() {
            let data = &self.data[i];
            let common_size = data.len().min(new_data.len()).min(complete_size);
            if data[..common_size] == new_data[..common_size] {
                if data.len() == new_data.len() {
                    return (SectorMerge::Matched, i, improved_stats);
                }
                if new_data.len() < data.len() {
                    if new_data.len() < complete_size {
                        return (SectorMerge::Matched, i, improved_stats);
                    }
                    // The new shorter complete copy replaces the existing data.
                    improved_stats = self.data_read_stats[i];
                    self.erase_data(i);
                    ret = SectorMerge::Improved;
                    break;
                }
                else {
                    if data.len() >= complete_size {
                        return (SectorMerge::Matched, i, improved_stats);
                    }
                    // The new longer complete copy replaces the existing data.
                    improved_stats = self.data_read_stats[i];
                    self.erase_data(i);
                    ret = SectorMerge::Improved;
                    break;
                }
            }
            i += 1;
        }

        if self.has_data() {
            // Damage can cause different DAM values for a sector. Favour
            // normal over deleted, and deleted over anything else.
            if self.dam != new_dam
                && (self.dam == AddressMark::Data || (self.dam == AddressMark::DeletedData && new_dam != AddressMark::Data))
            {
                return (SectorMerge::Unchanged, 0, improved_stats);
            }

            // Multiple good copies mean a difference in the gap data after a
            // good sector, perhaps due to a splice. Outside paranoia mode a
            // good CRC is trusted, so the extra copy is ignored.
            if !self.bad_data_crc && !opts.paranoia {
                return (SectorMerge::Unchanged, 0, improved_stats);
            }

            // Keep multiple copies the same size, whichever is shortest.
            let new_size = new_data.len().min(self.data[0].len());
            new_data.truncate(new_size);
            for data in &mut self.data {
                data.truncate(new_size);
            }
        }

        if self.are_copies_full(opts.max_copies) {
            self.limit_copies(opts.max_copies);
            ret = SectorMerge::NewDataOverLimit;
        }
        else {
            self.data.push(new_data);
        }

        self.bad_data_crc = bad_crc;
        self.dam = new_dam;

        (ret, 0, improved_stats)
    }

    fn process_merge_result(
        &mut self,
        ret: SectorMerge,
        new_read_attempts: i32,
        new_data_read_stats: DataReadStats,
        counter_mode: bool,
        affected_data_index: usize,
        improved_data_read_stats: DataReadStats,
    ) {
        match ret {
            SectorMerge::Unchanged | SectorMerge::NewDataOverLimit => {}
            SectorMerge::NewData => self.data_read_stats.push(new_data_read_stats),
            SectorMerge::Matched | SectorMerge::Improved => {
                if counter_mode {
                    if ret == SectorMerge::Matched {
                        self.data_read_stats[affected_data_index] += new_data_read_stats;
                    }
                    else {
                        self.data_read_stats.push(new_data_read_stats + improved_data_read_stats);
                    }
                }
                else {
                    // Read-rate combination: treat each source as an
                    // independent chance to observe this copy, then rescale
                    // to the combined attempt count.
                    let stats = if ret == SectorMerge::Matched {
                        self.data_read_stats[affected_data_index]
                    }
                    else {
                        improved_data_read_stats
                    };
                    let combined_attempts = self.read_attempts + new_read_attempts;
                    let read_rate = stats.read_count() as f64 / self.read_attempts.max(1) as f64;
                    let new_read_rate = new_data_read_stats.read_count() as f64 / new_read_attempts.max(1) as f64;
                    let combined_rate = read_rate + new_read_rate - read_rate * new_read_rate;
                    let combined_count = (combined_rate * combined_attempts as f64).round() as i32;
                    if ret == SectorMerge::Matched {
                        self.data_read_stats[affected_data_index] = DataReadStats::new(combined_count);
                    }
                    else {
                        self.data_read_stats.push(DataReadStats::new(combined_count));
                    }
                }
            }
        }
    }

    /// Merge another acquisition of the same sector into this one.
    ///
    /// Mixing different headers or encodings, or data rates that are not
    /// interchangeably equal, is a programming error and surfaces as
    /// [`TrackImageError::InconsistentState`].
    pub fn merge(&mut self, mut sector: Sector, opts: &MergeOptions) -> Result<SectorMerge, TrackImageError> {
        let mut ret = SectorMerge::Unchanged;

        // A bad new header CRC means the sector was never read; nothing to use.
        if sector.bad_id_crc {
            return Ok(ret);
        }

        if sector.data_rate != self.data_rate {
            if !are_interchangeable_data_rates(sector.data_rate, self.data_rate) {
                return Err(TrackImageError::InconsistentState);
            }
            sector.normalise_data_rate(self.data_rate);
        }
        if sector.header != self.header || sector.encoding != self.encoding {
            return Err(TrackImageError::InconsistentState);
        }

        // If the existing header is bad, repair it.
        if self.bad_id_crc {
            self.bad_id_crc = false;
            ret = SectorMerge::Improved;
        }

        // We can't repair good data with bad.
        if self.has_data() && !self.bad_data_crc && sector.bad_data_crc {
            self.read_attempts += sector.read_attempts;
            return Ok(ret);
        }

        let counter_mode = !sector.is_constant_disk();
        let copies = std::mem::take(&mut sector.data);
        let stats = std::mem::take(&mut sector.data_read_stats);
        for (data, data_stats) in copies.into_iter().zip(stats) {
            let add_ret = self.add(
                data,
                sector.bad_data_crc,
                sector.dam,
                sector.read_attempts,
                data_stats,
                counter_mode,
                false,
                opts,
            );
            // Keep the most important result.
            if add_ret != SectorMerge::Unchanged
                && (ret == SectorMerge::Unchanged
                    || ret == SectorMerge::Matched
                    || (ret == SectorMerge::Improved
                        && matches!(add_ret, SectorMerge::NewData | SectorMerge::NewDataOverLimit)))
            {
                ret = add_ret;
            }
        }
        self.read_attempts += sector.read_attempts;

        Ok(ret)
    }

    /// Whether an orphan data run of `orphan_data_size` bytes is long enough
    /// to be worth merging over this sector's existing data.
    pub fn accept_orphan_data_size_for_merging(&self, orphan_data_size: usize) -> bool {
        let this_physical_size = if self.is_orphan() {
            self.data_size()
        }
        else {
            // Parented copies hold the body only; the orphan run includes
            // the trailing CRC bytes.
            self.data_size() + 2
        };
        this_physical_size <= orphan_data_size
    }

    /// Reshape an orphan data sector so it looks like an acquisition of its
    /// parent: adopt the parent's header and offset, clip each copy to the
    /// parent's size plus CRC, and re-add the copies with their CRCs checked.
    pub fn convert_orphan_like_parent(&mut self, parent: &Sector, opts: &MergeOptions) {
        let sector_size = parent.size();

        self.header = parent.header;
        self.offset = parent.offset;

        if !self.has_data() {
            return;
        }

        let copies = std::mem::take(&mut self.data);
        let stats = std::mem::take(&mut self.data_read_stats);
        let dam = self.dam;
        self.remove_data();
        self.dam = dam;

        for (mut data, data_stats) in copies.into_iter().zip(stats) {
            data.truncate(sector_size + 2);
            let (body, bad_crc) = if data.len() == sector_size + 2 {
                let seed = if self.encoding == Encoding::Mfm { CRC_A1A1A1 } else { CRC_INIT };
                let mut crc = Crc16::new(seed);
                crc.update(self.dam.into());
                crc.update_slice(&data);
                let bad = crc.finalize() != 0;
                data.truncate(sector_size);
                (data, bad)
            }
            else {
                // The run ended at the next address mark or track end, so
                // there is no CRC to verify.
                data.truncate(sector_size.min(data.len()));
                (data, true)
            };
            // Zero read attempts keeps the existing attempt count correct.
            self.add(body, bad_crc, dam, 0, data_stats, true, true, opts);
        }
    }

    /// Merge an orphan data sector into this parented sector.
    pub fn merge_orphan_data_sector(&mut self, mut orphan: Sector, opts: &MergeOptions) -> Result<SectorMerge, TrackImageError> {
        if self.data_rate != orphan.data_rate && !are_interchangeable_data_rates(self.data_rate, orphan.data_rate) {
            return Err(TrackImageError::InconsistentState);
        }

        // Only merge if there is no previous data or the orphan run is at
        // least as long; a shorter orphan run is likely broken.
        if self.has_data() && !self.accept_orphan_data_size_for_merging(orphan.data_size()) {
            log::debug!(
                "merge_orphan_data_sector: not merging orphan data sector (offset={}, id.sector={})",
                orphan.offset,
                orphan.header.sector
            );
            return Ok(SectorMerge::Unchanged);
        }

        orphan.convert_orphan_like_parent(self, opts);
        self.merge(orphan, opts)
    }

    /// Same header and an offset within tolerance on the track ring.
    pub fn is_sector_tolerated_same(&self, other: &Sector, byte_tolerance_of_time: i32, tracklen: i32) -> bool {
        self.is_header_offset_tolerated_same(&other.header, other.offset, byte_tolerance_of_time, tracklen)
    }

    pub fn is_header_offset_tolerated_same(
        &self,
        other_header: &Header,
        other_offset: i32,
        byte_tolerance_of_time: i32,
        tracklen: i32,
    ) -> bool {
        are_offsets_tolerated_same(self.offset, other_offset, byte_tolerance_of_time, tracklen) && self.header == *other_header
    }

    /// Convert this sector's offset and rate to the target rate when the two
    /// rates are interchangeable.
    pub fn normalise_data_rate(&mut self, data_rate_target: DataRate) {
        if data_rate_target != self.data_rate && are_interchangeable_data_rates(self.data_rate, data_rate_target) {
            self.offset = convert_offset_by_data_rate(self.offset, self.data_rate, data_rate_target);
            self.data_rate = data_rate_target;
        }
    }

    /// Whether this sector (on a track of `this_tracklen`) and another (on a
    /// track of `other_tracklen`) describe the same physical record.
    pub fn has_same_record_properties(
        &self,
        this_tracklen: i32,
        other: &Sector,
        other_tracklen: i32,
        ignore_offsets: bool,
        byte_tolerance_of_time: i32,
    ) -> bool {
        if other.bad_id_crc || self.bad_id_crc || other.header != self.header {
            return false;
        }
        if other.encoding != self.encoding {
            return false;
        }
        if other.data_rate != self.data_rate && !are_interchangeable_data_rates(other.data_rate, self.data_rate) {
            return false;
        }
        if this_tracklen == 0 && other_tracklen == 0 {
            return true;
        }
        if this_tracklen == 0 || other_tracklen == 0 {
            log::warn!("comparing two sectors while exactly one has 0 tracklen is suspicious");
            return false;
        }
        if ignore_offsets {
            return true;
        }

        let mut offset_normalised = self.offset;
        if other.data_rate != self.data_rate {
            offset_normalised = convert_offset_by_data_rate(self.offset, self.data_rate, other.data_rate);
        }
        offset_normalised = (offset_normalised as f64 * other_tracklen as f64 / this_tracklen as f64).round() as i32;
        are_offsets_tolerated_same(offset_normalised, other.offset, byte_tolerance_of_time, other_tracklen)
    }

    /// The minimum rawbit distance to the next sector's ID on a normally
    /// formatted track.
    pub fn next_sector_offset_distance_min(&self) -> i32 {
        data_byte_pos_as_rawbit_offset(
            ibmpc::sector_overhead_with_gap3(self.data_rate, self.encoding, self.size()) as i32,
            self.encoding,
        )
    }

    /// Drop gap bytes read beyond the natural sector size, optionally keeping
    /// CRC bytes on bad sectors.
    pub fn remove_gap_data(&mut self, keep_crc: bool) {
        if !self.has_gap_data() {
            return;
        }
        let size = self.size();
        for data in &mut self.data {
            if keep_crc && self.bad_data_crc && data.len() >= size + 2 {
                data.truncate(size + 2);
            }
            else {
                data.truncate(size);
            }
        }
    }
}

impl Display for Sector {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::chs::ORPHAN_SECTOR_ID;

    fn test_sector() -> Sector {
        Sector::new(DataRate::Rate500Kbps, Encoding::Mfm, Header::new(0, 0, 1, 2))
    }

    fn body(fill: u8) -> Vec<u8> {
        vec![fill; 512]
    }

    #[test]
    fn first_copy_is_new_data() {
        let mut sector = test_sector();
        let opts = MergeOptions::default();
        assert_eq!(sector.add_with_read_stats(body(0xE5), false, AddressMark::Data, &opts), SectorMerge::NewData);
        assert_eq!(sector.copies(), 1);
        assert_eq!(sector.read_attempts(), 1);
        assert!(sector.has_good_data(false, true));
    }

    #[test]
    fn bad_id_sector_rejects_data() {
        let mut sector = test_sector();
        sector.set_bad_id_crc(true);
        let opts = MergeOptions::default();
        assert_eq!(sector.add_with_read_stats(body(0xE5), false, AddressMark::Data, &opts), SectorMerge::Unchanged);
        assert!(!sector.has_data());
    }

    #[test]
    fn good_data_is_not_replaced_by_bad() {
        let mut sector = test_sector();
        let opts = MergeOptions::default();
        sector.add_with_read_stats(body(0xE5), false, AddressMark::Data, &opts);
        assert_eq!(sector.add_with_read_stats(body(0x00), true, AddressMark::Data, &opts), SectorMerge::Unchanged);
        assert_eq!(sector.data_copy(0), &body(0xE5)[..]);
    }

    #[test]
    fn good_data_replaces_all_bad_copies() {
        let mut sector = test_sector();
        let opts = MergeOptions::default();
        sector.add_with_read_stats(body(0x11), true, AddressMark::Data, &opts);
        sector.add_with_read_stats(body(0x22), true, AddressMark::Data, &opts);
        assert_eq!(sector.copies(), 2);
        assert_eq!(sector.add_with_read_stats(body(0xE5), false, AddressMark::Data, &opts), SectorMerge::NewData);
        assert_eq!(sector.copies(), 1);
        assert!(!sector.has_bad_data_crc());
    }

    #[test]
    fn matching_copy_accumulates_read_stats() {
        let mut sector = test_sector();
        let opts = MergeOptions::default();
        sector.add_with_read_stats(body(0xE5), false, AddressMark::Data, &opts);
        assert_eq!(sector.add_with_read_stats(body(0xE5), false, AddressMark::Data, &opts), SectorMerge::Matched);
        assert_eq!(sector.copies(), 1);
        assert_eq!(sector.data_copy_read_stats(0).read_count(), 2);
        assert_eq!(sector.read_attempts(), 2);
    }

    #[test]
    fn dam_precedence_prefers_data_over_deleted() {
        let mut sector = test_sector();
        let opts = MergeOptions::default();
        // First acquisition: deleted DAM, good CRC.
        sector.add_with_read_stats(body(0xE5), false, AddressMark::DeletedData, &opts);
        assert_eq!(sector.dam, AddressMark::DeletedData);
        // Second acquisition: normal DAM, identical body.
        assert_eq!(sector.add_with_read_stats(body(0xE5), false, AddressMark::Data, &opts), SectorMerge::Matched);
        assert_eq!(sector.dam, AddressMark::Data);
        assert_eq!(sector.copies(), 1);
        assert_eq!(sector.data_copy_read_stats(0).read_count(), 2);
        // And a later deleted DAM must not displace the normal one.
        assert_eq!(sector.add_with_read_stats(body(0x00), true, AddressMark::DeletedData, &opts), SectorMerge::Unchanged);
        assert_eq!(sector.dam, AddressMark::Data);
    }

    #[test]
    fn bad_copies_accumulate_clipped_to_shortest() {
        let mut sector = test_sector();
        let opts = MergeOptions::default();
        sector.add_with_read_stats(vec![0x11; 512], true, AddressMark::Data, &opts);
        sector.add_with_read_stats(vec![0x22; 500], true, AddressMark::Data, &opts);
        assert_eq!(sector.copies(), 2);
        assert_eq!(sector.data_copy(0).len(), 500);
        assert_eq!(sector.data_copy(1).len(), 500);
    }

    #[test]
    fn copy_limit_is_enforced() {
        let mut sector = test_sector();
        let opts = MergeOptions {
            max_copies: 2,
            ..MergeOptions::default()
        };
        sector.add_with_read_stats(body(0x11), true, AddressMark::Data, &opts);
        sector.add_with_read_stats(body(0x22), true, AddressMark::Data, &opts);
        assert_eq!(sector.add_with_read_stats(body(0x33), true, AddressMark::Data, &opts), SectorMerge::NewDataOverLimit);
        assert_eq!(sector.copies(), 2);
        // Stats stay parallel to copies.
        assert_eq!(sector.data_read_stats().len(), sector.copies());
    }

    #[test]
    fn stats_stay_parallel_and_bounded_by_attempts() {
        let mut sector = test_sector();
        let opts = MergeOptions::default();
        for fill in [0x11, 0x22, 0x11, 0x33, 0x11] {
            sector.add_with_read_stats(body(fill), true, AddressMark::Data, &opts);
        }
        assert_eq!(sector.data_read_stats().len(), sector.copies());
        let total: i32 = sector.data_read_stats().iter().map(|s| s.read_count()).sum();
        assert!(total <= sector.read_attempts());
        // Best copy is the thrice-read one.
        assert_eq!(sector.data_best_copy(), &body(0x11)[..]);
    }

    #[test]
    fn rate_mode_combines_read_rates() {
        let mut sector = test_sector();
        let opts = MergeOptions::default();
        // 1 read of 2 attempts.
        sector.add(body(0xE5), false, AddressMark::Data, 2, DataReadStats::new(1), false, true, &opts);
        // Another 1 of 2; p = 0.5 + 0.5 - 0.25 = 0.75 over 4 attempts = 3.
        sector.add(body(0xE5), false, AddressMark::Data, 2, DataReadStats::new(1), false, true, &opts);
        assert_eq!(sector.read_attempts(), 4);
        assert_eq!(sector.data_copy_read_stats(0).read_count(), 3);
    }

    #[test]
    fn checksummable_8k_replaces_plain_copy() {
        let header = Header::new(0, 0, 1, 6);
        let mut sector = Sector::new(DataRate::Rate250Kbps, Encoding::Mfm, header);
        let opts = MergeOptions::default();

        sector.add_with_read_stats(vec![0x5A; 0x1900], true, AddressMark::Data, &opts);
        assert!(sector.is_8k_sector());
        assert!(!sector.is_checksummable_8k_sector());

        // Build a body whose trailing 16-bit big-endian sum validates.
        let mut checked = vec![0x01; CHECKSUMMABLE_8K_COMPLETE_SIZE];
        let sum = checked.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
        checked.extend_from_slice(&sum.to_be_bytes());
        checked.resize(0x1900, 0x00);

        assert_eq!(sector.add_with_read_stats(checked.clone(), true, AddressMark::Data, &opts), SectorMerge::NewData);
        assert_eq!(sector.copies(), 1);
        assert!(sector.is_checksummable_8k_sector());
        assert!(sector.has_good_data(true, false));

        // A later plain copy is ignored in favour of the checksummable one.
        assert_eq!(sector.add_with_read_stats(vec![0x77; 0x1900], true, AddressMark::Data, &opts), SectorMerge::Unchanged);
        assert_eq!(sector.data_copy(0), &checked[..]);
    }

    #[test]
    fn merge_repairs_bad_id_header() {
        let opts = MergeOptions::default();
        let mut bad = test_sector();
        bad.set_bad_id_crc(true);
        let mut good = test_sector();
        good.add_with_read_stats(body(0xE5), false, AddressMark::Data, &opts);

        let ret = bad.merge(good, &opts).unwrap();
        assert!(!bad.has_bad_id_crc());
        assert_eq!(ret, SectorMerge::NewData);
        assert_eq!(bad.copies(), 1);
    }

    #[test]
    fn merge_across_incompatible_rates_is_an_error() {
        let opts = MergeOptions::default();
        let mut sector = test_sector();
        let mut other = test_sector();
        other.data_rate = DataRate::Rate250Kbps;
        assert!(matches!(sector.merge(other, &opts), Err(TrackImageError::InconsistentState)));
    }

    #[test]
    fn merge_across_interchangeable_rates_normalises() {
        let opts = MergeOptions::default();
        let mut sector = Sector::new(DataRate::Rate250Kbps, Encoding::Mfm, Header::new(0, 0, 1, 2));
        let mut other = Sector::new(DataRate::Rate300Kbps, Encoding::Mfm, Header::new(0, 0, 1, 2));
        other.add_with_read_stats(body(0xE5), false, AddressMark::Data, &opts);
        assert_eq!(sector.merge(other, &opts).unwrap(), SectorMerge::NewData);
        assert_eq!(sector.copies(), 1);
    }

    #[test]
    fn orphan_conversion_checks_the_trailing_crc() {
        let opts = MergeOptions::default();
        let mut parent = Sector::new(DataRate::Rate500Kbps, Encoding::Mfm, Header::new(0, 0, 3, 0));
        parent.offset = 5000;

        // An orphan run: 128-byte body, valid CRC, then gap noise.
        let body = vec![0xA5u8; 128];
        let mut crc = Crc16::new(CRC_A1A1A1);
        crc.update(AddressMark::Data.into());
        crc.update_slice(&body);
        let mut run = body.clone();
        run.extend_from_slice(&crc.finalize_be_bytes());
        run.extend_from_slice(&[0x4E; 20]);

        let mut orphan = Sector::new(DataRate::Rate500Kbps, Encoding::Mfm, Header::new(0, 0, ORPHAN_SECTOR_ID, 0));
        orphan.offset = 5704;
        orphan.add_with_read_stats(run, true, AddressMark::Data, &opts);

        assert_eq!(parent.merge_orphan_data_sector(orphan, &opts).unwrap(), SectorMerge::NewData);
        assert_eq!(parent.copies(), 1);
        assert!(!parent.has_bad_data_crc());
        assert_eq!(parent.data_copy(0), &body[..]);
        assert_eq!(parent.offset, 5000);
    }

    #[test]
    fn tolerated_same_and_record_properties() {
        let mut a = test_sector();
        a.offset = 1000;
        let mut b = test_sector();
        b.offset = 1500;
        assert!(a.is_sector_tolerated_same(&b, 64, 100_000));
        b.offset = 3000;
        assert!(!a.is_sector_tolerated_same(&b, 64, 100_000));

        // Same record on tracks of different lengths: offsets scale.
        let mut c = test_sector();
        c.offset = 10_000;
        let mut d = test_sector();
        d.offset = 20_000;
        assert!(c.has_same_record_properties(100_000, &d, 200_000, false, 64));
        assert!(!c.has_same_record_properties(100_000, &d, 100_000, false, 64));
        assert!(c.has_same_record_properties(100_000, &d, 100_000, true, 64));
    }
}
