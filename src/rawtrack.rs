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

    src/rawtrack.rs

    Locate address-mark syncs in a captured rawbit stream and reconstruct
    ID and data records from it.
*/

//! The `rawtrack` module implements [`RawTrackDecoder`], which hunts for sync
//! patterns in a raw track capture bit by bit, extracts ID and data records,
//! validates their CRCs and classifies data records without a matching ID as
//! orphans.
//!
//! The decoder never fails on bad bits: malformed records degrade into CRC
//! flags on the sectors it emits, and an empty or too-short capture yields an
//! empty result.

use crate::bitbuf::BitByteBuffer;
use crate::bitpos::BitPosition;
use crate::crc::{Crc16, CRC_A1A1A1, CRC_INIT};
use crate::ibmpc;
use crate::orphan_track::OrphanDataCapableTrack;
use crate::record::RawRecord;
use crate::sector::{MergeOptions, Sector};
use crate::track_builder::{fm_cells, fm_cells_doubled, FM_CLOCK_AM, FM_CLOCK_INDEX};
use crate::types::chs::{CylHead, Header, ORPHAN_SECTOR_ID};
use crate::types::enums::{rawbits_time_us, AddressMark, DataRate, Encoding};

/// The 48-rawbit pattern of three 0xA1 bytes with missing clocks.
const MFM_A1_SYNC: u64 = 0x4489_4489_4489;
/// The 48-rawbit pattern of three 0xC2 bytes with missing clocks.
const MFM_C2_SYNC: u64 = 0x5224_5224_5224;
const MFM_SYNC_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// Decoder over one raw track capture: a packed rawbit stream (one rawbit per
/// bit, MSB-first) together with its data rate and encoding context.
pub struct RawTrackDecoder {
    raw: Vec<u8>,
    data_rate: DataRate,
    encoding:  Encoding,
}

impl RawTrackDecoder {
    pub fn new(raw: Vec<u8>, data_rate: DataRate, encoding: Encoding) -> Self {
        RawTrackDecoder { raw, data_rate, encoding }
    }

    /// Decode the capture into a track of parented sectors and orphan data
    /// records.
    pub fn decode(&self, cylhead: CylHead, opts: &MergeOptions) -> OrphanDataCapableTrack {
        let mut odct = OrphanDataCapableTrack::new();

        let bit_len = self.raw.len() * 8;
        // Anything shorter than one sync run plus a record is noise.
        if bit_len < ibmpc::sync_len(self.encoding) * self.encoding.rawbits_per_byte() * 2 {
            return odct;
        }

        odct.set_tracklen(bit_len as i32);
        odct.set_tracktime(rawbits_time_us(self.data_rate, self.encoding, bit_len).round() as i32);

        let mut buffer = BitByteBuffer::from(self.raw.as_slice());
        let records = match self.encoding {
            Encoding::Fm => self.scan_fm(&mut buffer),
            _ => self.scan_mfm(&mut buffer),
        };

        self.assemble(&mut buffer, &records, cylhead, opts, &mut odct);
        odct
    }

    /// Sync-hunt pass for MFM: slide a 48-bit window over the stream looking
    /// for the A1A1A1 and C2C2C2 missing-clock patterns, and classify the
    /// byte that follows each hit.
    fn scan_mfm(&self, buffer: &mut BitByteBuffer) -> Vec<RawRecord> {
        let mut records = Vec::new();
        let mut shift_reg = 0u64;
        let mut bits_seen = 0usize;

        buffer.set_pos(BitPosition::default());
        while let Some(bit) = buffer.read_bit() {
            shift_reg = (shift_reg << 1) | bit as u64;
            bits_seen += 1;
            if bits_seen < 48 {
                continue;
            }
            let offset = buffer.pos().total_bits() as i32;
            match shift_reg & MFM_SYNC_MASK {
                MFM_A1_SYNC => {
                    let mut pos = buffer.pos();
                    if let Some(value) = decode_mfm_byte(buffer, &mut pos) {
                        self.classify(buffer, offset, value, &mut records);
                    }
                }
                MFM_C2_SYNC => {
                    let mut pos = buffer.pos();
                    if decode_mfm_byte(buffer, &mut pos) == Some(AddressMark::Index.into()) {
                        records.push(RawRecord::Index { offset });
                    }
                }
                _ => {}
            }
        }
        records
    }

    /// Sync-hunt pass for FM: the address marks carry their own distinctive
    /// clock patterns, so the window matches a run of zero-sync cells
    /// followed directly by a clocked mark.
    fn scan_fm(&self, buffer: &mut BitByteBuffer) -> Vec<RawRecord> {
        const FM_MARK_VALUES: [u8; 7] = [0xFC, 0xFE, 0xFB, 0xFA, 0xF8, 0xF9, 0xFD];
        let patterns: Vec<(u64, u8)> = FM_MARK_VALUES
            .iter()
            .map(|&value| {
                let clock = if value == 0xFC { FM_CLOCK_INDEX } else { FM_CLOCK_AM };
                let sync_tail = fm_cells_doubled(0xAAAA) as u64;
                let mark = fm_cells_doubled(fm_cells(clock, value)) as u64;
                ((sync_tail << 32) | mark, value)
            })
            .collect();

        let mut records = Vec::new();
        let mut shift_reg = 0u64;
        let mut bits_seen = 0usize;

        buffer.set_pos(BitPosition::default());
        while let Some(bit) = buffer.read_bit() {
            shift_reg = (shift_reg << 1) | bit as u64;
            bits_seen += 1;
            if bits_seen < 64 {
                continue;
            }
            if let Some(&(_, value)) = patterns.iter().find(|(pattern, _)| *pattern == shift_reg) {
                // The mark itself occupies the last 32 rawbits of the window.
                let offset = buffer.pos().total_bits() as i32 - 32;
                if value == 0xFC {
                    records.push(RawRecord::Index { offset });
                }
                else {
                    self.classify(buffer, offset, value, &mut records);
                }
            }
        }
        records
    }

    fn classify(&self, buffer: &mut BitByteBuffer, offset: i32, value: u8, records: &mut Vec<RawRecord>) {
        let Ok(mark) = AddressMark::try_from(value) else {
            log::trace!("ignoring invalid address mark {value:#04X} at offset {offset}");
            return;
        };
        if mark.is_id() {
            if let Some(header) = self.read_id_record(buffer, offset) {
                records.push(RawRecord::Id { offset, header });
            }
        }
        else if mark.is_data() {
            records.push(RawRecord::DataRef { offset, dam: mark });
        }
    }

    /// Parse CHRN and CRC after an ID address mark. Records failing their CRC
    /// are dropped; their data record will surface as an orphan.
    fn read_id_record(&self, buffer: &mut BitByteBuffer, offset: i32) -> Option<Header> {
        let mut pos = BitPosition::new(offset as usize + self.encoding.rawbits_per_byte());
        let mut chrn_crc = [0u8; 6];
        for byte in &mut chrn_crc {
            *byte = self.decode_byte(buffer, &mut pos)?;
        }

        let mut crc = Crc16::new(self.crc_seed());
        crc.update(AddressMark::Id.into());
        crc.update_slice(&chrn_crc);
        if crc.finalize() != 0 {
            log::debug!("dropping ID record with bad CRC at offset {offset}");
            return None;
        }

        Some(Header::new(chrn_crc[0] as u16, chrn_crc[1], chrn_crc[2] as u16, chrn_crc[3]))
    }

    /// Second pass: turn the located records into sectors, attaching each
    /// data record to the ID whose gap2 window covers it and capturing the
    /// rest as orphans.
    fn assemble(
        &self,
        buffer: &mut BitByteBuffer,
        records: &[RawRecord],
        cylhead: CylHead,
        opts: &MergeOptions,
        odct: &mut OrphanDataCapableTrack,
    ) {
        let (window_min, window_max) = ibmpc::id_to_data_distance_bounds(self.data_rate, self.encoding);

        let ids: Vec<(i32, Header)> = records
            .iter()
            .filter_map(|r| match r {
                RawRecord::Id { offset, header } => Some((*offset, *header)),
                _ => None,
            })
            .collect();

        for record in records {
            match record {
                RawRecord::Index { offset } => {
                    if odct.track_index_offset == 0 {
                        odct.track_index_offset = *offset;
                    }
                }
                RawRecord::Id { offset, header } => {
                    if header.cyl != cylhead.cyl || header.head != cylhead.head {
                        log::warn!("ID record {} does not match physical {}", header, cylhead);
                        odct.cylhead_mismatch = true;
                    }
                    let mut sector = Sector::new(self.data_rate, self.encoding, *header);
                    sector.offset = *offset;
                    sector.set_constant_disk(false);
                    // The caller degrades merge errors; they cannot occur
                    // here since every sector shares one rate and encoding.
                    let _ = odct.parented.add(sector, opts);
                }
                RawRecord::DataRef { offset, dam } => {
                    let parent = ids
                        .iter()
                        .filter(|(id_offset, _)| {
                            let distance = offset - id_offset;
                            distance >= window_min && distance <= window_max
                        })
                        .max_by_key(|(id_offset, _)| *id_offset)
                        .copied();

                    match parent {
                        Some((id_offset, header)) => {
                            self.attach_parented_data(buffer, *offset, *dam, id_offset, header, opts, odct)
                        }
                        None => self.capture_orphan(buffer, records, *offset, *dam, cylhead, opts, odct),
                    }
                }
            }
        }
    }

    fn attach_parented_data(
        &self,
        buffer: &mut BitByteBuffer,
        data_offset: i32,
        dam: AddressMark,
        id_offset: i32,
        header: Header,
        opts: &MergeOptions,
        odct: &mut OrphanDataCapableTrack,
    ) {
        let size = header.sector_size();
        let available = self.bytes_available_from(buffer, data_offset);

        let (body, bad_crc) = if available < size + 2 {
            // The record straddles the track end; keep what is there.
            let mut pos = self.data_start(data_offset);
            let body = self.decode_bytes(buffer, &mut pos, available.min(size));
            (body, true)
        }
        else {
            let mut pos = self.data_start(data_offset);
            let mut body = self.decode_bytes(buffer, &mut pos, size + 2);
            let mut crc = Crc16::new(self.crc_seed());
            crc.update(dam.into());
            crc.update_slice(&body);
            let bad = crc.finalize() != 0;
            body.truncate(size);
            (body, bad)
        };

        let tolerance = opts.byte_tolerance_of_time;
        let tracklen = odct.parented.tracklen;
        if let Some(sector) = odct
            .parented
            .sectors_mut()
            .iter_mut()
            .find(|s| s.is_header_offset_tolerated_same(&header, id_offset, tolerance, tracklen))
        {
            sector.add_with_read_stats(body, bad_crc, dam, opts);
        }
    }

    fn capture_orphan(
        &self,
        buffer: &mut BitByteBuffer,
        records: &[RawRecord],
        data_offset: i32,
        dam: AddressMark,
        cylhead: CylHead,
        opts: &MergeOptions,
        odct: &mut OrphanDataCapableTrack,
    ) {
        let rawbits_per_byte = self.encoding.rawbits_per_byte() as i32;

        // The run ends where the next record's sync preamble begins, or at
        // the track end.
        let next_offset = records.iter().map(RawRecord::offset).find(|&o| o > data_offset);
        let end_bits = match next_offset {
            Some(next) => {
                let preamble = (ibmpc::sync_len(self.encoding) + ibmpc::am_overhead(self.encoding) - 1) as i32;
                next - preamble * rawbits_per_byte
            }
            None => (self.raw.len() * 8) as i32,
        };
        let available = ((end_bits - (data_offset + rawbits_per_byte)) / rawbits_per_byte).max(0) as usize;
        if available == 0 {
            return;
        }

        // The orphan's size code is the largest that fits the captured run.
        let mut size_code = 0u8;
        while size_code < 7 && Header::size_code_to_length(size_code + 1) <= available {
            size_code += 1;
        }

        let mut pos = self.data_start(data_offset);
        let body = self.decode_bytes(buffer, &mut pos, available);

        let fitted = Header::size_code_to_length(size_code);
        let bad_crc = if available >= fitted + 2 {
            let mut crc = Crc16::new(self.crc_seed());
            crc.update(dam.into());
            crc.update_slice(&body[..fitted + 2]);
            crc.finalize() != 0
        }
        else {
            true
        };

        let header = Header::from_cylhead(cylhead, ORPHAN_SECTOR_ID, size_code);
        let mut sector = Sector::new(self.data_rate, self.encoding, header);
        sector.offset = data_offset;
        sector.set_constant_disk(false);
        sector.add_with_read_stats(body, bad_crc, dam, opts);
        let _ = odct.orphan_data.add(sector, opts);
    }

    fn crc_seed(&self) -> u16 {
        match self.encoding {
            Encoding::Fm => CRC_INIT,
            _ => CRC_A1A1A1,
        }
    }

    /// Rawbit position of the first data byte after an address mark.
    fn data_start(&self, am_offset: i32) -> BitPosition {
        BitPosition::new(am_offset as usize + self.encoding.rawbits_per_byte())
    }

    /// Whole data bytes available between an address mark and the track end.
    fn bytes_available_from(&self, buffer: &BitByteBuffer, am_offset: i32) -> usize {
        let rawbits_per_byte = self.encoding.rawbits_per_byte();
        let start = am_offset as usize + rawbits_per_byte;
        buffer.bit_len().saturating_sub(start) / rawbits_per_byte
    }

    fn decode_byte(&self, buffer: &mut BitByteBuffer, pos: &mut BitPosition) -> Option<u8> {
        match self.encoding {
            Encoding::Fm => decode_fm_byte(buffer, pos),
            _ => decode_mfm_byte(buffer, pos),
        }
    }

    fn decode_bytes(&self, buffer: &mut BitByteBuffer, pos: &mut BitPosition, len: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(len);
        for _ in 0..len {
            match self.decode_byte(buffer, pos) {
                Some(byte) => bytes.push(byte),
                None => break,
            }
        }
        bytes
    }
}

/// Decode one MFM byte at `pos`: 16 rawbits, dropping the clock bit of each
/// cell pair. Never disturbs the buffer cursor.
fn decode_mfm_byte(buffer: &BitByteBuffer, pos: &mut BitPosition) -> Option<u8> {
    if pos.total_bits() + 16 > buffer.bit_len() {
        return None;
    }
    let mut byte = 0u8;
    for _ in 0..8 {
        pos.step_bit(); // clock
        let data = buffer.bit_at(*pos)?;
        pos.step_bit();
        byte = (byte << 1) | data as u8;
    }
    Some(byte)
}

/// Decode one FM byte at `pos`: 32 rawbits, four per data bit (a doubled
/// clock cell then a doubled data cell). Never disturbs the buffer cursor.
fn decode_fm_byte(buffer: &BitByteBuffer, pos: &mut BitPosition) -> Option<u8> {
    if pos.total_bits() + 32 > buffer.bit_len() {
        return None;
    }
    let mut byte = 0u8;
    for _ in 0..8 {
        pos.step_bit(); // clock cell
        pos.step_bit();
        let data = buffer.bit_at(*pos)?;
        pos.step_bit();
        pos.step_bit();
        byte = (byte << 1) | data as u8;
    }
    Some(byte)
}
