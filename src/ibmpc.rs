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

    src/ibmpc.rs

    IBM System 34 style track framing overheads for MFM and FM, per the
    WD177x / uPD765 specifications.
*/

//! Fixed framing constants for IBM PC format tracks. These bound where a data
//! address mark can legally appear relative to its ID address mark, and size
//! the gaps the track builder emits.

use crate::types::enums::{data_byte_pos_as_rawbit_offset, DataRate, Encoding};

pub const GAP_BYTE: u8 = 0x4E;
pub const SYNC_BYTE: u8 = 0x00;

pub const IBM_GAP4A: usize = 80;
pub const IBM_GAP1: usize = 50;

/// gap2 for MFM, except 1Mbps (ED)
pub const GAP2_MFM_DDHD: usize = 22;
/// gap2 for MFM 1Mbps (ED)
pub const GAP2_MFM_ED: usize = 41;
/// gap2 for FM (same bit size as MFM due to encoding)
pub const GAP2_FM: usize = 11;

pub const SYNC_LEN_MFM: usize = 12;
pub const SYNC_LEN_FM: usize = 6;

pub const FM_GAP4A: usize = 40;
pub const FM_GAP1: usize = 26;

/// 3xA1 + mark byte
pub const AM_OVERHEAD_MFM: usize = 4;
/// single mark byte
pub const AM_OVERHEAD_FM: usize = 1;

pub const IAM_SYNC_BYTES: [u8; 3] = [0xC2, 0xC2, 0xC2];
pub const AM_SYNC_BYTES: [u8; 3] = [0xA1, 0xA1, 0xA1];

pub const MIN_GAP3: usize = 1;
// arbitrary size, to leave a bit more space at the track end
pub const MAX_GAP3: usize = 82;

pub const MICROSEC_PER_MINUTE: u32 = 60_000_000;
pub const RPM_TIME_200: u32 = MICROSEC_PER_MINUTE / 200;
pub const RPM_TIME_300: u32 = MICROSEC_PER_MINUTE / 300;
pub const RPM_TIME_360: u32 = MICROSEC_PER_MINUTE / 360;

pub fn sync_len(encoding: Encoding) -> usize {
    match encoding {
        Encoding::Fm => SYNC_LEN_FM,
        _ => SYNC_LEN_MFM,
    }
}

pub fn am_overhead(encoding: Encoding) -> usize {
    match encoding {
        Encoding::Fm => AM_OVERHEAD_FM,
        _ => AM_OVERHEAD_MFM,
    }
}

pub fn gap2_bytes(data_rate: DataRate, encoding: Encoding) -> usize {
    match (encoding, data_rate) {
        (Encoding::Fm, _) => GAP2_FM,
        (_, DataRate::Rate1000Kbps) => GAP2_MFM_ED,
        _ => GAP2_MFM_DDHD,
    }
}

/// Bytes from the AM up to and including the ID record's CRC.
pub fn id_overhead(encoding: Encoding) -> usize {
    am_overhead(encoding) + 4 /*CHRN*/ + 2 /*crc*/
}

/// Bytes from the AM up to and including the data record's CRC, excluding the
/// data field itself.
pub fn data_overhead(encoding: Encoding) -> usize {
    am_overhead(encoding) + 2 /*crc*/
}

/// gap4a + sync + IAM + gap1.
pub fn track_overhead(encoding: Encoding) -> usize {
    match encoding {
        Encoding::Fm => FM_GAP4A + SYNC_LEN_FM + AM_OVERHEAD_FM + FM_GAP1,
        _ => IBM_GAP4A + SYNC_LEN_MFM + AM_OVERHEAD_MFM + IBM_GAP1,
    }
}

/// Per-sector framing overhead excluding the data field and gap3.
pub fn sector_overhead(data_rate: DataRate, encoding: Encoding) -> usize {
    sync_len(encoding) + id_overhead(encoding) + gap2_bytes(data_rate, encoding) + sync_len(encoding) + data_overhead(encoding)
}

/// Full nominal footprint of a sector on the track, in bytes, from its sync
/// run through its data CRC and a minimal gap3.
pub fn sector_overhead_with_gap3(data_rate: DataRate, encoding: Encoding, data_size: usize) -> usize {
    sector_overhead(data_rate, encoding) + data_size + MIN_GAP3
}

/// Byte distance between an ID address mark and the data address mark of the
/// same sector: the AM byte itself, CHRN and CRC, gap2, the following sync
/// run, and the marker sync bytes in front of the DAM.
pub fn id_to_data_distance_bytes(data_rate: DataRate, encoding: Encoding) -> usize {
    let marker_sync = am_overhead(encoding) - 1;
    1 + 4 + 2 + gap2_bytes(data_rate, encoding) + sync_len(encoding) + marker_sync
}

// Splices move the DAM sync around, so the legal window is widened
// asymmetrically: gap2 can shrink a little, and drives re-syncing after a
// weak ID can land the DAM late.
const DISTANCE_SLACK_BEFORE: usize = 8;
const DISTANCE_SLACK_AFTER: usize = 16;

/// The window, in rawbits relative to an ID record's offset, in which a data
/// record's offset must fall to be parented to that ID.
pub fn id_to_data_distance_bounds(data_rate: DataRate, encoding: Encoding) -> (i32, i32) {
    let nominal = id_to_data_distance_bytes(data_rate, encoding);
    let min = nominal.saturating_sub(DISTANCE_SLACK_BEFORE);
    let max = nominal + DISTANCE_SLACK_AFTER;
    (
        data_byte_pos_as_rawbit_offset(min as i32, encoding),
        data_byte_pos_as_rawbit_offset(max as i32, encoding),
    )
}

/// A plausible ID record offset for a data record found at `data_offset`,
/// one nominal ID-to-data distance earlier on the track ring.
pub fn reasonable_id_offset_for_data(data_offset: i32, tracklen: i32, data_rate: DataRate, encoding: Encoding) -> i32 {
    let distance = data_byte_pos_as_rawbit_offset(id_to_data_distance_bytes(data_rate, encoding) as i32, encoding);
    (data_offset - distance).rem_euclid(tracklen.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overhead_sums_match_the_specification() {
        // MFM: 146 track overhead, 62 sector overhead.
        assert_eq!(track_overhead(Encoding::Mfm), 146);
        assert_eq!(sector_overhead(DataRate::Rate250Kbps, Encoding::Mfm), 62);
        // FM: 73 track overhead, 33 sector overhead.
        assert_eq!(track_overhead(Encoding::Fm), 73);
        assert_eq!(sector_overhead(DataRate::Rate250Kbps, Encoding::Fm), 33);
    }

    #[test]
    fn gap2_variants() {
        assert_eq!(gap2_bytes(DataRate::Rate500Kbps, Encoding::Mfm), 22);
        assert_eq!(gap2_bytes(DataRate::Rate1000Kbps, Encoding::Mfm), 41);
        assert_eq!(gap2_bytes(DataRate::Rate250Kbps, Encoding::Fm), 11);
    }

    #[test]
    fn id_to_data_distance() {
        // MFM DD: 1 + CHRN(4) + CRC(2) + gap2(22) + sync(12) + 3xA1 = 44 bytes.
        assert_eq!(id_to_data_distance_bytes(DataRate::Rate250Kbps, Encoding::Mfm), 44);
        // FM: 1 + 4 + 2 + gap2(11) + sync(6) = 24 bytes.
        assert_eq!(id_to_data_distance_bytes(DataRate::Rate250Kbps, Encoding::Fm), 24);

        let (min, max) = id_to_data_distance_bounds(DataRate::Rate250Kbps, Encoding::Mfm);
        assert!(min <= 44 * 16 && 44 * 16 <= max);
    }

    #[test]
    fn reasonable_id_offset_wraps() {
        let tracklen = 100_000;
        let offset = reasonable_id_offset_for_data(100, tracklen, DataRate::Rate250Kbps, Encoding::Mfm);
        assert!(offset > 0 && offset < tracklen);
    }
}
