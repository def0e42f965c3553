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

    src/reconciler.rs

    Drive a floppy controller through timed scans, raw track reads and
    per-sector reads until the reading policy is satisfied.
*/

//! The `reconciler` module orchestrates track recovery against an external
//! [`FloppyController`]: timed scans establish the sector IDs and their
//! timing, raw track reads recover data (including orphan data the
//! controller itself cannot deliver), and targeted sector reads fill in
//! whatever is still missing. The loop runs until the caller's
//! [`DeviceReadingPolicy`] reports nothing more wanted, or the rescan and
//! retry budgets are exhausted.

use std::collections::HashMap;

use bitflags::bitflags;
use strum::IntoEnumIterator;
use thiserror::Error;

use crate::ibmpc;
use crate::orphan_track::OrphanDataCapableTrack;
use crate::rawtrack::RawTrackDecoder;
use crate::sector::{checksum_methods, MergeOptions, Sector};
use crate::timed_scan::TimedScanResult;
use crate::track::Track;
use crate::track_ids::{IdAndOffset, IdAndOffsetList};
use crate::types::chs::{CylHead, Header};
use crate::types::enums::{
    are_offsets_tolerated_same, data_byte_pos_as_rawbit_offset, time_us_to_rawbits, AddressMark, DataRate, Encoding,
};
use crate::TrackImageError;

bitflags! {
    /// Controller status bits for one read, in the spirit of the uPD765
    /// ST1/ST2 registers.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ControllerStatus: u16 {
        const DATA_CRC_ERROR    = 0b0000_0001;
        const ID_CRC_ERROR      = 0b0000_0010;
        const MISSING_AM        = 0b0000_0100;
        const NO_DATA           = 0b0000_1000;
        const END_OF_CYLINDER   = 0b0001_0000;
        const WRONG_CYLINDER    = 0b0010_0000;
        const DELETED_DATA      = 0b0100_0000;
    }
}

/// A device-level controller failure. Degraded reads are not errors; they
/// surface through [`ControllerStatus`] instead.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("controller device failure: {0}")]
    Device(String),
    #[error("the controller cannot produce the requested encoding or data rate")]
    UnsupportedEncRate,
}

impl From<ControllerError> for TrackImageError {
    fn from(err: ControllerError) -> Self {
        match err {
            ControllerError::Device(message) => TrackImageError::DeviceError(message),
            ControllerError::UnsupportedEncRate => TrackImageError::UnsupportedEncoding,
        }
    }
}

/// The outcome of one sector read command.
#[derive(Clone, Debug, Default)]
pub struct SectorReadResult {
    pub data:   Vec<u8>,
    pub status: ControllerStatus,
}

/// The opaque floppy controller surface the reconciler drives. Implementors
/// wrap a real device driver or a capture-backed simulator; the reconciler
/// never sees past this contract.
pub trait FloppyController {
    /// Select the encoding and data rate for subsequent commands.
    fn set_enc_rate(&mut self, encoding: Encoding, data_rate: DataRate) -> Result<(), ControllerError>;

    /// Whether the controller hardware supports a data rate at all.
    fn supports_data_rate(&self, data_rate: DataRate) -> bool;

    /// Read the next ID record that passes under the head, if any.
    fn read_id(&mut self, cylhead: CylHead) -> Result<Option<Header>, ControllerError>;

    /// Scan one revolution, returning every ID seen with its timing.
    fn timed_scan(&mut self, cylhead: CylHead) -> Result<TimedScanResult, ControllerError>;

    /// Read the raw bitstream of (at least) one revolution as one oversized
    /// sector.
    fn read_track_raw(&mut self, cylhead: CylHead) -> Result<Vec<u8>, ControllerError>;

    /// Read one addressed sector.
    fn read_sector(&mut self, cylhead: CylHead, header: Header) -> Result<SectorReadResult, ControllerError>;
}

/// An integer retry budget which can be re-armed whenever progress is
/// observed.
#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    count: i32,
    /// Re-arm the budget whenever the caller reports a change.
    pub since_last_change: bool,
}

impl RetryPolicy {
    pub fn new(count: i32, since_last_change: bool) -> Self {
        RetryPolicy { count, since_last_change }
    }

    pub fn count(&self) -> i32 {
        self.count
    }

    pub fn has_more(&self) -> bool {
        self.count >= 0
    }

    /// Consume one turn; true while the budget was not yet exhausted.
    pub fn take_turn(&mut self) -> bool {
        let more = self.count > 0;
        self.count -= 1;
        more
    }

    pub fn reset(&mut self, count: i32) {
        self.count = count;
    }
}

/// The caller's statement of which sectors it wants, and which it already
/// considers settled. The reconciler never invents its own sector set.
#[derive(Clone, Debug, Default)]
pub struct DeviceReadingPolicy {
    wanted_sector_ids: Option<Vec<u16>>,
    skippable_sectors: Vec<Sector>,
    look_for_possible_sectors: bool,
}

impl DeviceReadingPolicy {
    /// Want specific sector IDs only.
    pub fn wanting(sector_ids: Vec<u16>) -> Self {
        DeviceReadingPolicy {
            wanted_sector_ids: Some(sector_ids),
            skippable_sectors: Vec::new(),
            look_for_possible_sectors: false,
        }
    }

    /// Want whatever the track turns out to contain.
    pub fn wanting_anything() -> Self {
        DeviceReadingPolicy {
            wanted_sector_ids: None,
            skippable_sectors: Vec::new(),
            look_for_possible_sectors: true,
        }
    }

    pub fn skippable_sectors(&self) -> &[Sector] {
        &self.skippable_sectors
    }

    pub fn add_skippable_sectors(&mut self, sectors: Vec<Sector>) {
        self.skippable_sectors.extend(sectors);
    }

    /// Whether a sector is already settled under this policy.
    pub fn skippable_contains(&self, sector: &Sector, tracklen: i32, byte_tolerance_of_time: i32) -> bool {
        self.skippable_sectors
            .iter()
            .any(|s| s.is_sector_tolerated_same(sector, byte_tolerance_of_time, tracklen))
    }

    /// Whether scanning should continue looking for sectors.
    pub fn want_more_sectors(&self) -> bool {
        match &self.wanted_sector_ids {
            None => self.look_for_possible_sectors,
            Some(wanted) => wanted
                .iter()
                .any(|id| !self.skippable_sectors.iter().any(|s| s.header.sector == *id)),
        }
    }
}

/// Reconciler tuning; the merge options travel along to every sector and
/// track operation.
#[derive(Clone, Debug)]
pub struct ReconcilerOptions {
    pub merge: MergeOptions,
    /// Whole-track rescan budget; re-armed on progress.
    pub rescans: i32,
    /// Per-sector read budget.
    pub retries: i32,
    /// Force a data rate instead of probing for one.
    pub data_rate: Option<DataRate>,
    /// Force an encoding instead of probing for one.
    pub encoding: Option<Encoding>,
    /// First sector ID considered in-range on a normal disk.
    pub normal_sector_id_begin: u16,
    /// One past the last sector ID considered in-range on a normal disk
    /// (0 means unbounded).
    pub normal_sector_id_end: u16,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        ReconcilerOptions {
            merge: MergeOptions::default(),
            rescans: 2,
            retries: 5,
            data_rate: None,
            encoding: None,
            normal_sector_id_begin: 1,
            normal_sector_id_end: 0,
        }
    }
}

/// Per-track state remembered across calls: the detected encoding and rate,
/// the measured rotation time and the settled single-revolution length.
#[derive(Copy, Clone, Debug, Default)]
struct TrackInfo {
    encoding: Option<Encoding>,
    data_rate: Option<DataRate>,
    track_time: i32,
    tracklen_ideal: i32,
}

/// The accumulating dual view of one track: what the timed scans say, and
/// what the raw captures say.
#[derive(Clone, Debug, Default)]
pub struct DualTrack {
    /// Sector IDs and timing from the timed scans.
    pub timed_track: Track,
    /// Union of every raw capture, still multi-revolution.
    pub raw_multi: OrphanDataCapableTrack,
    /// The latest raw capture folded to a single revolution and synced to
    /// the timed track.
    pub last_raw_single: OrphanDataCapableTrack,
    last_raw_single_score: i32,
    /// The merged final view handed to the caller.
    pub final_track: Track,
}

/// Orchestrates (scan, decode, merge) rounds against a controller until the
/// reading policy is satisfied or the budgets run out.
pub struct DualTrackReconciler<C: FloppyController> {
    controller: C,
    opts: ReconcilerOptions,
    last_encoding: Option<Encoding>,
    last_data_rate: Option<DataRate>,
    track_info: HashMap<CylHead, TrackInfo>,
}

impl<C: FloppyController> DualTrackReconciler<C> {
    pub fn new(controller: C, opts: ReconcilerOptions) -> Self {
        DualTrackReconciler {
            controller,
            opts,
            last_encoding: None,
            last_data_rate: None,
            track_info: HashMap::new(),
        }
    }

    pub fn into_controller(self) -> C {
        self.controller
    }

    /// Recover one track. `abort` is observed before every controller
    /// round; the merge into the accumulator is the commit point, so no
    /// partial state crosses an iteration boundary.
    pub fn recover_track(
        &mut self,
        cylhead: CylHead,
        policy: &DeviceReadingPolicy,
        abort: &mut dyn FnMut() -> bool,
    ) -> Result<Track, TrackImageError> {
        let mut state = DualTrack::default();
        let mut scanning_policy = policy.clone();
        let mut timed_rescans = RetryPolicy::new(self.opts.rescans, true);
        let mut raw_rescans = RetryPolicy::new(self.opts.rescans.max(self.opts.retries), true);

        // Timed scanning rounds: collect sector IDs and timing until the
        // policy stops asking or the budget runs out.
        loop {
            if abort() {
                return Ok(state.final_track);
            }
            let Some(scan) = self.scan_and_detect(cylhead)? else {
                // Probably an unformatted track.
                return Ok(state.final_track);
            };
            let (encoding, data_rate) = self.enc_rate()?;

            if scan.tracktime > ibmpc::RPM_TIME_200 {
                return Err(TrackImageError::DiskSpeedError);
            }
            self.info_mut(cylhead).track_time = scan.tracktime as i32;

            if scan.count > 0 {
                if self.info(cylhead).tracklen_ideal <= 0 {
                    self.read_and_merge_raw(cylhead, &mut state)?;
                    raw_rescans.take_turn();
                }
                let mut new_timed = scan.decode(cylhead, data_rate, encoding, &self.opts.merge);
                let ideal = self.info(cylhead).tracklen_ideal;
                if ideal > 0 {
                    new_timed.set_tracklen_and_normalise(ideal);
                }

                let sector_amount_prev = state.timed_track.len();
                state.timed_track.add_track(new_timed, &self.opts.merge)?;
                if state.timed_track.len() > sector_amount_prev {
                    scanning_policy = policy.clone();
                    scanning_policy.add_skippable_sectors(state.timed_track.good_id_crc_sectors());
                    if timed_rescans.since_last_change {
                        timed_rescans.reset(self.opts.rescans);
                    }
                }
            }
            if !(timed_rescans.take_turn() && scanning_policy.want_more_sectors()) {
                break;
            }
        }

        // Raw track rounds: decode the bitstream for sectors the scans
        // cannot deliver, promote orphans, then read what is still wanted.
        loop {
            if abort() {
                break;
            }
            let found_new_sector = raw_rescans.has_more() && self.read_and_merge_raw(cylhead, &mut state)?;
            let ideal = self.info(cylhead).tracklen_ideal;
            if ideal > 0 && (found_new_sector || state.last_raw_single.is_empty()) {
                if self.sync_and_demulti_raw_to_timed(&mut state, ideal)? {
                    let sector_amount_prev = state.final_track.len();
                    let mut final_local = state.last_raw_single.parented.clone();
                    final_local.add_track(state.timed_track.clone(), &self.opts.merge)?;
                    self.guess_and_add_orphan_ids(&mut final_local, &state)?;
                    final_local.add_track(std::mem::take(&mut state.final_track), &self.opts.merge)?;
                    state.final_track = final_local;
                    if state.final_track.len() > sector_amount_prev {
                        scanning_policy = policy.clone();
                        scanning_policy.add_skippable_sectors(state.final_track.good_id_crc_sectors());
                    }
                }
            }
            if !scanning_policy.want_more_sectors() && self.read_sectors(cylhead, &mut state, policy)? {
                // Scanning and reading is complete.
                break;
            }
            if found_new_sector && raw_rescans.since_last_change {
                raw_rescans.reset(self.opts.rescans.max(self.opts.retries));
            }
            if !raw_rescans.take_turn() {
                break;
            }
        }

        // Sector headers whose body cannot fit before the track end are not
        // credible on a normal disk.
        if self.opts.merge.normal_disk {
            while let Some(sector) = state.final_track.sectors().last() {
                let record_bytes =
                    ibmpc::id_to_data_distance_bytes(sector.data_rate, sector.encoding) as i32 + 1 + sector.size() as i32 + 2;
                let record_rawbits = data_byte_pos_as_rawbit_offset(record_bytes, sector.encoding);
                if sector.offset + record_rawbits < state.final_track.tracklen {
                    break;
                }
                let last = state.final_track.len() - 1;
                state.final_track.remove(last);
            }
        }

        self.read_sectors(cylhead, &mut state, policy)?;

        Ok(state.final_track)
    }

    fn info(&self, cylhead: CylHead) -> TrackInfo {
        self.track_info.get(&cylhead).copied().unwrap_or_default()
    }

    fn info_mut(&mut self, cylhead: CylHead) -> &mut TrackInfo {
        self.track_info.entry(cylhead).or_default()
    }

    fn enc_rate(&self) -> Result<(Encoding, DataRate), TrackImageError> {
        match (self.last_encoding, self.last_data_rate) {
            (Some(encoding), Some(data_rate)) => Ok((encoding, data_rate)),
            _ => Err(TrackImageError::UnsupportedEncoding),
        }
    }

    /// Run a timed scan, first probing the encoding/data-rate matrix if the
    /// track's parameters are not yet known. `None` means nothing was
    /// detected (an unformatted or degaussed track).
    fn scan_and_detect(&mut self, cylhead: CylHead) -> Result<Option<TimedScanResult>, TrackImageError> {
        let info = self.info(cylhead);
        if let (Some(encoding), Some(data_rate)) = (info.encoding, info.data_rate) {
            if self.last_encoding != Some(encoding) || self.last_data_rate != Some(data_rate) {
                self.last_encoding = Some(encoding);
                self.last_data_rate = Some(data_rate);
                self.controller.set_enc_rate(encoding, data_rate)?;
            }
        }
        if let (Some(encoding), Some(data_rate)) = (self.last_encoding, self.last_data_rate) {
            // Try the last successful parameters first.
            let scan = self.controller.timed_scan(cylhead)?;
            if info.encoding.is_some() || scan.count > 0 {
                let entry = self.info_mut(cylhead);
                entry.encoding = Some(encoding);
                entry.data_rate = Some(data_rate);
                return Ok(Some(scan));
            }
        }

        if !self.detect_encoding_and_data_rate(cylhead)? {
            return Ok(None);
        }
        let (encoding, data_rate) = self.enc_rate()?;
        let entry = self.info_mut(cylhead);
        entry.encoding = Some(encoding);
        entry.data_rate = Some(data_rate);
        Ok(Some(self.controller.timed_scan(cylhead)?))
    }

    /// Probe the encoding/data-rate matrix by asking the controller to read
    /// any ID. MFM is preferred over FM and higher rates over lower; FM at
    /// 1Mbps is never probed. Returns whether anything was detected.
    fn detect_encoding_and_data_rate(&mut self, cylhead: CylHead) -> Result<bool, TrackImageError> {
        for encoding in Encoding::iter().filter(|e| matches!(e, Encoding::Mfm | Encoding::Fm)) {
            for data_rate in DataRate::iter().rev() {
                // FM at 1Mbps does not exist; skip combinations the caller
                // has excluded.
                if encoding == Encoding::Fm
                    && (self.opts.encoding == Some(Encoding::Mfm) || data_rate == DataRate::Rate1000Kbps)
                {
                    continue;
                }
                if let Some(forced) = self.opts.data_rate {
                    if data_rate != forced {
                        continue;
                    }
                }
                if let Some(forced) = self.opts.encoding {
                    if encoding != forced {
                        continue;
                    }
                }
                if !self.controller.supports_data_rate(data_rate) {
                    if self.opts.data_rate == Some(data_rate) {
                        return Err(TrackImageError::UnsupportedEncoding);
                    }
                    continue;
                }

                self.controller.set_enc_rate(encoding, data_rate)?;
                if self.controller.read_id(cylhead)?.is_some() {
                    // Remember the settings for the first try next time.
                    self.last_encoding = Some(encoding);
                    self.last_data_rate = Some(data_rate);
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Read one raw revolution-and-a-bit and merge its decode into the
    /// accumulator. Returns whether any new sector entry appeared. Settles
    /// the single-revolution track length when repetition allows it.
    fn read_and_merge_raw(&mut self, cylhead: CylHead, state: &mut DualTrack) -> Result<bool, TrackImageError> {
        let (encoding, data_rate) = self.enc_rate()?;
        let raw = self.controller.read_track_raw(cylhead)?;
        let odct = RawTrackDecoder::new(raw, data_rate, encoding).decode(cylhead, &self.opts.merge);

        let sector_id_amount_prev = state.raw_multi.parented.len();
        let sector_amount_prev = state.raw_multi.sector_count();
        state.raw_multi.merge(odct, &self.opts.merge)?;
        let found_new_sector_id = state.raw_multi.parented.len() > sector_id_amount_prev;
        let found_new_sector = state.raw_multi.sector_count() > sector_amount_prev;

        if self.info(cylhead).tracklen_ideal <= 0 && found_new_sector_id {
            let track_time = self.info(cylhead).track_time;
            let ideal_guess = time_us_to_rawbits(data_rate, encoding, track_time as f64);
            if let Some(best) = state.raw_multi.determine_best_track_len(ideal_guess) {
                self.info_mut(cylhead).tracklen_ideal = best;
                if state.timed_track.tracklen > 0 {
                    state.timed_track.set_tracklen_and_normalise(best);
                }
            }
        }
        Ok(found_new_sector)
    }

    /// Fold the accumulated raw capture to one revolution and line it up
    /// with the timed track. Returns whether the fold scored better than
    /// the previous one.
    fn sync_and_demulti_raw_to_timed(&mut self, state: &mut DualTrack, tracklen: i32) -> Result<bool, TrackImageError> {
        state.last_raw_single = state.raw_multi.clone();
        state.last_raw_single.sync_and_demulti_to_offset(0, tracklen, &self.opts.merge)?;

        if let Some(sync_offset) = state
            .last_raw_single
            .parented
            .find_sync_offset_compared_to(&state.timed_track, &self.opts.merge)
        {
            state.last_raw_single.sync_this_to_other_as_multi(sync_offset);
        }

        let score = state.last_raw_single.score();
        let found_new_valuable_something = score > state.last_raw_single_score;
        state.last_raw_single_score = score;
        Ok(found_new_valuable_something)
    }

    /// The index of the ID record in `track` whose gap2 window covers a data
    /// record at `data_offset`.
    fn find_parent_index_for_data(&self, track: &Track, data_offset: i32) -> Option<usize> {
        let (encoding, data_rate) = self.enc_rate().ok()?;
        let (min, max) = ibmpc::id_to_data_distance_bounds(data_rate, encoding);
        let tracklen = track.tracklen.max(1);
        track.sectors().iter().position(|sector| {
            let distance = (data_offset - sector.offset).rem_euclid(tracklen);
            distance >= min && distance <= max
        })
    }

    /// Promote orphans: when the track's interleave scheme can be discovered
    /// unambiguously, an orphan's offset pins down which sector slot its ID
    /// belonged to, and a parent sector is synthesized at a plausible offset.
    fn guess_and_add_orphan_ids(&mut self, track: &mut Track, state: &DualTrack) -> Result<(), TrackImageError> {
        if state.last_raw_single.cylhead_mismatch || state.last_raw_single.orphan_data.is_empty() {
            return Ok(());
        }
        let (encoding, data_rate) = self.enc_rate()?;
        let tracklen = state.last_raw_single.tracklen();
        if tracklen <= 0 {
            return Ok(());
        }

        let mut scheme: Option<IdAndOffsetList> = None;
        for orphan in state.last_raw_single.orphan_data.sectors() {
            if self.find_parent_index_for_data(track, orphan.offset).is_some() {
                continue;
            }
            log::debug!("guess_and_add_orphan_ids: orphan has no parent, offset={}", orphan.offset);

            if scheme.is_none() {
                let discovered = self.discover_track_sector_scheme(track);
                if discovered.is_empty() {
                    return Ok(());
                }
                scheme = Some(discovered);
            }
            let scheme = scheme.as_ref().unwrap();

            let expected_id_offset =
                ibmpc::reasonable_id_offset_for_data(orphan.offset, tracklen, data_rate, encoding);
            let slot_tolerance = self.opts.merge.byte_tolerance_of_time * 16 * 4;
            if let Some(slot) = scheme.find_slot_for_offset(expected_id_offset, tracklen, slot_tolerance) {
                if slot.id >= 0 {
                    let header = Header::new(
                        orphan.header.cyl,
                        orphan.header.head,
                        slot.id as u16,
                        orphan.header.size,
                    );
                    let mut parent = Sector::new(data_rate, encoding, header);
                    parent.offset = expected_id_offset;
                    parent.set_constant_disk(false);
                    parent.merge_orphan_data_sector(orphan.clone(), &self.opts.merge)?;
                    track.add(parent, &self.opts.merge)?;
                }
            }
        }
        Ok(())
    }

    /// Estimate the track's slot table from the sectors found so far, and
    /// complete the missing IDs from the interleave scheme if it is
    /// unambiguous.
    fn discover_track_sector_scheme(&self, track: &Track) -> IdAndOffsetList {
        let mut list = IdAndOffsetList::default();
        let first = match track.sectors().first() {
            Some(first) => first,
            None => return list,
        };
        if track.tracklen <= 0 {
            return list;
        }

        // Slot pitch: the median spacing between the sectors seen so far,
        // falling back to the nominal minimum for a lone sector.
        let pitch = if track.len() >= 2 {
            let mut deltas: Vec<i32> = track.sectors().windows(2).map(|w| w[1].offset - w[0].offset).collect();
            deltas.sort_unstable();
            deltas[deltas.len() / 2]
        }
        else {
            first.next_sector_offset_distance_min()
        };
        if pitch <= 0 {
            return list;
        }
        let slots = (track.tracklen / pitch).max(track.len() as i32);
        let origin = first.offset;

        for i in 0..slots {
            let slot_offset = (origin + i * pitch).rem_euclid(track.tracklen);
            let id = track
                .sectors()
                .iter()
                .find(|s| are_offsets_tolerated_same(s.offset, slot_offset, self.opts.merge.byte_tolerance_of_time, track.tracklen))
                .map_or(-1, |s| s.header.sector as i32);
            list.slots.push(IdAndOffset::new(id, slot_offset));
        }

        if !list.replace_missing_by_finding(track.len()) {
            return IdAndOffsetList::default();
        }
        list
    }

    /// Copy data for a still-missing sector from a matching orphan data
    /// record, if one exists. Returns whether the sector now has good data.
    fn get_sector_data_from_raw(&mut self, state: &mut DualTrack, index: usize) -> Result<bool, TrackImageError> {
        let normal_disk = self.opts.merge.normal_disk;
        {
            let sector = &state.final_track[index];
            if sector.has_bad_id_crc() {
                return Ok(false);
            }
            if sector.has_good_data(false, normal_disk) {
                return Ok(true);
            }
        }
        if state.last_raw_single.cylhead_mismatch || state.last_raw_single.orphan_data.is_empty() {
            return Ok(false);
        }

        let (encoding, data_rate) = self.enc_rate()?;
        let (min, max) = ibmpc::id_to_data_distance_bounds(data_rate, encoding);
        let tracklen = state.last_raw_single.tracklen().max(1);
        let id_offset = state.final_track[index].offset;

        let orphan = state
            .last_raw_single
            .orphan_data
            .sectors()
            .iter()
            .find(|orphan| {
                let distance = (orphan.offset - id_offset).rem_euclid(tracklen);
                distance >= min && distance <= max
            });

        // Only good orphan data is copied over; a still-bad run leaves the
        // sector unresolved for a later addressed read.
        if let Some(orphan) = orphan {
            if orphan.has_good_data(false, normal_disk) {
                let size = state.final_track[index].size();
                let mut data = orphan.data_copy(0).to_vec();
                data.truncate(size);
                let dam = orphan.dam;
                state.final_track[index].add_with_read_stats(data, false, dam, &self.opts.merge);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Read every still-wanted sector, alternating over the interleave so
    /// consecutive reads do not wait a full revolution. Returns whether all
    /// wanted data is now good.
    fn read_sectors(
        &mut self,
        cylhead: CylHead,
        state: &mut DualTrack,
        policy: &DeviceReadingPolicy,
    ) -> Result<bool, TrackImageError> {
        let normal_disk = self.opts.merge.normal_disk;
        let id_begin = self.opts.normal_sector_id_begin;
        let id_end = if self.opts.normal_sector_id_end > 0 {
            self.opts.normal_sector_id_end
        }
        else {
            u16::MAX
        };

        let mut all_data_good = true;
        let count = state.final_track.len();
        for j in 0..2 {
            for i in (j..count).step_by(2) {
                let wanted = {
                    let sector = &state.final_track[i];
                    !policy.skippable_contains(sector, state.final_track.tracklen, self.opts.merge.byte_tolerance_of_time)
                        && (!normal_disk || (sector.header.sector >= id_begin && sector.header.sector < id_end))
                };
                if wanted {
                    if state.final_track[i].read_attempts() == 0 {
                        self.read_sector(cylhead, &mut state.final_track, i)?;
                    }
                    if !self.get_sector_data_from_raw(state, i)? {
                        // Sector is still not good.
                        all_data_good = false;
                    }
                }
            }
        }
        Ok(all_data_good)
    }

    /// Read one sector with the per-sector retry budget, merging every
    /// result under the usual rules.
    fn read_sector(&mut self, cylhead: CylHead, track: &mut Track, index: usize) -> Result<(), TrackImageError> {
        let normal_disk = self.opts.merge.normal_disk;
        if track[index].has_bad_id_crc() || track[index].has_good_data(false, normal_disk) {
            return Ok(());
        }

        let header = track[index].header;
        let size = header.sector_size();

        for _ in 0..=self.opts.retries {
            let result = self.controller.read_sector(cylhead, header)?;

            // Try again if the header or data field went missing this pass.
            if result.status.intersects(ControllerStatus::MISSING_AM | ControllerStatus::NO_DATA) {
                track[index].add_read_attempts(1);
                continue;
            }
            if result.status.contains(ControllerStatus::END_OF_CYLINDER) {
                track[index].add_read_attempts(1);
                continue;
            }
            if normal_disk && (header.cyl != cylhead.cyl || header.head != cylhead.head) {
                log::warn!("read_sector: track's {} does not match sector's {}, ignoring this sector", cylhead, header);
                track[index].add_read_attempts(1);
                continue;
            }

            let data_crc_error = result.status.contains(ControllerStatus::DATA_CRC_ERROR);
            let dam = if result.status.contains(ControllerStatus::DELETED_DATA) {
                AddressMark::DeletedData
            }
            else {
                AddressMark::Data
            };

            let mut data = result.data;
            data.truncate(size);
            track[index].add_with_read_stats(data, data_crc_error, dam, &self.opts.merge);

            if !data_crc_error {
                break;
            }
            // Sectors that overlap the next field are unlikely to ever
            // succeed; 8K sectors are settled by a recognised checksum.
            if track.data_overlap(index) {
                break;
            }
            if track.is_8k_sector() && !checksum_methods(track[index].data_copy(0)).is_empty() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackFormat;
    use crate::track_builder::RawTrackBuilder;
    use crate::timed_scan::TimedScanHeader;
    use crate::types::enums::{data_bytes_time_us, rawbits_time_us};

    /// A capture-backed controller over one synthetic track.
    struct FakeController {
        format: TrackFormat,
        cylhead: CylHead,
        raw: Vec<u8>,
        selected: Option<(Encoding, DataRate)>,
        scan_calls: usize,
    }

    impl FakeController {
        fn new(cylhead: CylHead, format: TrackFormat) -> Self {
            let raw = RawTrackBuilder::build_format_track(cylhead, &format);
            FakeController {
                format,
                cylhead,
                raw,
                selected: None,
                scan_calls: 0,
            }
        }

        fn selected_matches(&self) -> bool {
            self.selected == Some((self.format.encoding, self.format.data_rate))
        }
    }

    impl FloppyController for FakeController {
        fn set_enc_rate(&mut self, encoding: Encoding, data_rate: DataRate) -> Result<(), ControllerError> {
            self.selected = Some((encoding, data_rate));
            Ok(())
        }

        fn supports_data_rate(&self, _data_rate: DataRate) -> bool {
            true
        }

        fn read_id(&mut self, _cylhead: CylHead) -> Result<Option<Header>, ControllerError> {
            if !self.selected_matches() {
                return Ok(None);
            }
            Ok(Some(Header::from_cylhead(self.cylhead, self.format.base as u16, self.format.size)))
        }

        fn timed_scan(&mut self, _cylhead: CylHead) -> Result<TimedScanResult, ControllerError> {
            self.scan_calls += 1;
            if !self.selected_matches() {
                return Ok(TimedScanResult::new(200_000, 0, Vec::new()));
            }
            let track = Track::format(self.cylhead, &self.format);
            let byte_us = data_bytes_time_us(self.format.data_rate, self.format.encoding, 1);
            let tracktime = rawbits_time_us(self.format.data_rate, self.format.encoding, track.tracklen as usize);
            let headers = track
                .sectors()
                .iter()
                .map(|s| TimedScanHeader {
                    cyl: s.header.cyl as u8,
                    head: s.header.head,
                    sector: s.header.sector as u8,
                    size: s.header.size,
                    reltime: (s.offset as f64 * byte_us / 16.0).round() as u32,
                })
                .collect();
            Ok(TimedScanResult::new(tracktime.round() as u32, 0, headers))
        }

        fn read_track_raw(&mut self, _cylhead: CylHead) -> Result<Vec<u8>, ControllerError> {
            if !self.selected_matches() {
                return Ok(Vec::new());
            }
            // A revolution and a half, as an overread would capture.
            let mut raw = self.raw.clone();
            raw.extend_from_slice(&self.raw[..self.raw.len() / 2]);
            Ok(raw)
        }

        fn read_sector(&mut self, _cylhead: CylHead, header: Header) -> Result<SectorReadResult, ControllerError> {
            if !self.selected_matches() {
                return Ok(SectorReadResult {
                    data: Vec::new(),
                    status: ControllerStatus::MISSING_AM,
                });
            }
            Ok(SectorReadResult {
                data: vec![self.format.fill; header.sector_size()],
                status: ControllerStatus::empty(),
            })
        }
    }

    #[test]
    fn retry_policy_budget_and_reset() {
        let mut policy = RetryPolicy::new(2, true);
        assert!(policy.take_turn());
        assert!(policy.take_turn());
        assert!(!policy.take_turn());
        policy.reset(1);
        assert!(policy.take_turn());
    }

    #[test]
    fn reading_policy_wants_until_satisfied() {
        let mut policy = DeviceReadingPolicy::wanting(vec![1, 2]);
        assert!(policy.want_more_sectors());
        let mut sector = Sector::new(DataRate::Rate250Kbps, Encoding::Mfm, Header::new(0, 0, 1, 2));
        sector.offset = 1_000;
        policy.add_skippable_sectors(vec![sector.clone()]);
        assert!(policy.want_more_sectors());
        let mut second = sector.clone();
        second.header.sector = 2;
        policy.add_skippable_sectors(vec![second]);
        assert!(!policy.want_more_sectors());

        assert!(policy.skippable_contains(&sector, 100_000, 64));
    }

    #[test]
    fn recovers_a_regular_track_end_to_end() {
        let cylhead = CylHead::new(0, 0);
        let format = TrackFormat {
            data_rate: DataRate::Rate250Kbps,
            sectors: 9,
            size: 2,
            fill: 0xE5,
            ..TrackFormat::default()
        };
        let controller = FakeController::new(cylhead, format);
        let mut reconciler = DualTrackReconciler::new(controller, ReconcilerOptions::default());

        let policy = DeviceReadingPolicy::wanting_anything();
        let track = reconciler.recover_track(cylhead, &policy, &mut || false).unwrap();

        assert_eq!(track.len(), 9);
        for sector in track.sectors() {
            assert!(!sector.has_bad_id_crc());
            assert!(sector.has_good_data(false, false), "sector {} lacks data", sector.header);
            assert_eq!(sector.data_best_copy(), &vec![0xE5u8; 512][..]);
        }
    }

    #[test]
    fn detection_matrix_finds_fm_at_low_rate() {
        let cylhead = CylHead::new(0, 0);
        let format = TrackFormat {
            data_rate: DataRate::Rate250Kbps,
            encoding: Encoding::Fm,
            sectors: 4,
            size: 1,
            gap3: 12,
            fill: 0x3C,
            ..TrackFormat::default()
        };
        let controller = FakeController::new(cylhead, format);
        let mut reconciler = DualTrackReconciler::new(controller, ReconcilerOptions::default());

        let policy = DeviceReadingPolicy::wanting_anything();
        let track = reconciler.recover_track(cylhead, &policy, &mut || false).unwrap();
        assert_eq!(track.len(), 4);
        assert_eq!(track.encoding(), Some(Encoding::Fm));
    }

    #[test]
    fn abort_predicate_stops_the_loop() {
        let cylhead = CylHead::new(0, 0);
        let controller = FakeController::new(cylhead, TrackFormat::default());
        let mut reconciler = DualTrackReconciler::new(controller, ReconcilerOptions::default());

        let policy = DeviceReadingPolicy::wanting_anything();
        let track = reconciler.recover_track(cylhead, &policy, &mut || true).unwrap();
        assert!(track.is_empty());
        assert_eq!(reconciler.into_controller().scan_calls, 0);
    }
}
