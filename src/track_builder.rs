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

    src/track_builder.rs

    Synthesize raw MFM/FM bitstreams for nominal track layouts.
*/

//! The `track_builder` module builds the rawbit stream a drive head would
//! produce over a nominally formatted track. MFM bytes are encoded with the
//! standard clock rule (a clock bit is raised between two zero data bits);
//! sync marks are written with their missing-clock patterns. FM bytes are
//! written as clock/data cell pairs at half the MFM cell rate, doubled up to
//! rawbit resolution.

use crate::bitbuf::{double_4bits, BitByteBuffer};
use crate::crc::{Crc16, CRC_A1A1A1, CRC_INIT};
use crate::ibmpc;
use crate::track::TrackFormat;
use crate::types::chs::{CylHead, Header};
use crate::types::enums::{AddressMark, DataRate, Encoding};

/// FM clock pattern for ordinary data bytes.
pub const FM_CLOCK_DATA: u8 = 0xFF;
/// FM clock pattern distinguishing ID/data address marks.
pub const FM_CLOCK_AM: u8 = 0xC7;
/// FM clock pattern distinguishing the index address mark.
pub const FM_CLOCK_INDEX: u8 = 0xD7;

/// Interleave a clock byte and a data byte into 16 FM cells, clock first.
pub fn fm_cells(clock: u8, data: u8) -> u16 {
    let mut cells = 0u16;
    for i in (0..8).rev() {
        cells = (cells << 1) | ((clock >> i) & 1) as u16;
        cells = (cells << 1) | ((data >> i) & 1) as u16;
    }
    cells
}

/// Expand 16 FM cells to their 32-rawbit doubled representation.
pub fn fm_cells_doubled(cells: u16) -> u32 {
    ((double_4bits((cells >> 12) as u8) as u32) << 24)
        | ((double_4bits((cells >> 8) as u8) as u32) << 16)
        | ((double_4bits((cells >> 4) as u8) as u32) << 8)
        | double_4bits(cells as u8) as u32
}

pub struct RawTrackBuilder {
    data_rate: DataRate,
    encoding:  Encoding,
    buffer:    BitByteBuffer,
    last_bit:  bool,
}

impl RawTrackBuilder {
    pub fn new(data_rate: DataRate, encoding: Encoding) -> Self {
        RawTrackBuilder {
            data_rate,
            encoding,
            buffer: BitByteBuffer::new(),
            last_bit: false,
        }
    }

    pub fn data_rate(&self) -> DataRate {
        self.data_rate
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Rawbit position of the next write.
    pub fn bit_pos(&self) -> i32 {
        self.buffer.pos().total_bits() as i32
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.into_bytes()
    }

    /// Append one data byte in the track encoding.
    pub fn add_byte(&mut self, byte: u8) {
        match self.encoding {
            Encoding::Fm => self.add_fm_byte(byte, FM_CLOCK_DATA),
            _ => self.add_mfm_byte(byte),
        }
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.add_byte(byte);
        }
    }

    pub fn add_fill(&mut self, byte: u8, count: usize) {
        for _ in 0..count {
            self.add_byte(byte);
        }
    }

    fn add_mfm_byte(&mut self, byte: u8) {
        let mut raw = 0u16;
        let mut prev = self.last_bit;
        for i in (0..8).rev() {
            let data = (byte >> i) & 1 != 0;
            let clock = !prev && !data;
            raw = (raw << 1) | clock as u16;
            raw = (raw << 1) | data as u16;
            prev = data;
        }
        self.last_bit = prev;
        self.buffer.write_byte((raw >> 8) as u8);
        self.buffer.write_byte(raw as u8);
    }

    fn add_fm_byte(&mut self, byte: u8, clock: u8) {
        let doubled = fm_cells_doubled(fm_cells(clock, byte));
        self.buffer.write_bytes(&doubled.to_be_bytes());
        self.last_bit = byte & 1 != 0;
    }

    /// The three 0xA1 sync bytes with their missing clock bits (raw 0x4489).
    pub fn add_a1_sync(&mut self) {
        for _ in 0..3 {
            self.buffer.write_byte(0x44);
            self.buffer.write_byte(0x89);
        }
        self.last_bit = true;
    }

    /// The three 0xC2 index sync bytes with their missing clock bits
    /// (raw 0x5224).
    pub fn add_c2_sync(&mut self) {
        for _ in 0..3 {
            self.buffer.write_byte(0x52);
            self.buffer.write_byte(0x24);
        }
        self.last_bit = false;
    }

    fn gap_byte(&self) -> u8 {
        match self.encoding {
            Encoding::Fm => 0x00,
            _ => ibmpc::GAP_BYTE,
        }
    }

    fn crc_seed(&self) -> u16 {
        match self.encoding {
            Encoding::Fm => CRC_INIT,
            _ => CRC_A1A1A1,
        }
    }

    /// Append an address mark with its sync preamble, returning the rawbit
    /// offset of the mark byte itself.
    pub fn add_am(&mut self, mark: AddressMark) -> i32 {
        match self.encoding {
            Encoding::Fm => {
                let clock = if mark == AddressMark::Index { FM_CLOCK_INDEX } else { FM_CLOCK_AM };
                let offset = self.bit_pos();
                self.add_fm_byte(mark.into(), clock);
                offset
            }
            _ => {
                if mark == AddressMark::Index {
                    self.add_c2_sync();
                }
                else {
                    self.add_a1_sync();
                }
                let offset = self.bit_pos();
                self.add_mfm_byte(mark.into());
                offset
            }
        }
    }

    /// gap4a, sync, index mark and gap1.
    pub fn add_track_start(&mut self) {
        match self.encoding {
            Encoding::Fm => {
                self.add_fill(0x00, ibmpc::FM_GAP4A);
                self.add_fill(ibmpc::SYNC_BYTE, ibmpc::SYNC_LEN_FM);
                self.add_am(AddressMark::Index);
                self.add_fill(0x00, ibmpc::FM_GAP1);
            }
            _ => {
                self.add_fill(ibmpc::GAP_BYTE, ibmpc::IBM_GAP4A);
                self.add_fill(ibmpc::SYNC_BYTE, ibmpc::SYNC_LEN_MFM);
                self.add_am(AddressMark::Index);
                self.add_fill(ibmpc::GAP_BYTE, ibmpc::IBM_GAP1);
            }
        }
    }

    /// Append a complete sector: sync, ID record, gap2, sync, data record and
    /// gap3. Returns the rawbit offset of the ID address mark.
    pub fn add_sector(&mut self, header: Header, dam: AddressMark, data: &[u8], gap3: usize) -> i32 {
        self.add_fill(ibmpc::SYNC_BYTE, ibmpc::sync_len(self.encoding));
        let id_offset = self.add_am(AddressMark::Id);

        let chrn = [header.cyl as u8, header.head, header.sector as u8, header.size];
        let mut crc = Crc16::new(self.crc_seed());
        crc.update(AddressMark::Id.into());
        crc.update_slice(&chrn);
        self.add_bytes(&chrn);
        let crc_bytes = crc.finalize_be_bytes();
        self.add_bytes(&crc_bytes);

        self.add_fill(self.gap_byte(), ibmpc::gap2_bytes(self.data_rate, self.encoding));

        self.add_fill(ibmpc::SYNC_BYTE, ibmpc::sync_len(self.encoding));
        self.add_am(dam);
        let mut crc = Crc16::new(self.crc_seed());
        crc.update(dam.into());
        crc.update_slice(data);
        self.add_bytes(data);
        let crc_bytes = crc.finalize_be_bytes();
        self.add_bytes(&crc_bytes);

        self.add_fill(self.gap_byte(), gap3);
        id_offset
    }

    /// Build the raw stream for a whole nominally formatted track, filled
    /// with the format's fill byte.
    pub fn build_format_track(cylhead: CylHead, format: &TrackFormat) -> Vec<u8> {
        let mut builder = RawTrackBuilder::new(format.data_rate, format.encoding);
        builder.add_track_start();
        let track = crate::track::Track::format(cylhead, format);
        let fill = vec![format.fill; Header::size_code_to_length(format.size)];
        for sector in track.sectors() {
            builder.add_sector(sector.header, AddressMark::Data, &fill, format.gap3 as usize);
        }
        builder.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fm_cells_interleave_clock_first() {
        // 0x00 data with 0xFF clock alternates 10, giving the FM sync cell
        // pattern.
        assert_eq!(fm_cells(0xFF, 0x00), 0xAAAA);
        assert_eq!(fm_cells_doubled(0xAAAA), 0xCCCC_CCCC);
        // The FM IDAM: data 0xFE under clock 0xC7.
        assert_eq!(fm_cells(FM_CLOCK_AM, 0xFE), 0xF57E);
        // And the FM DAM: data 0xFB under clock 0xC7.
        assert_eq!(fm_cells(FM_CLOCK_AM, 0xFB), 0xF56F);
    }

    #[test]
    fn mfm_clock_rule_inserts_clocks_between_zeros() {
        let mut builder = RawTrackBuilder::new(DataRate::Rate250Kbps, Encoding::Mfm);
        builder.add_byte(0x00);
        // All-zero data after an initial zero: clock on every cell except the
        // first pair's data bit follows a zero too, so 1010... with a leading
        // clock of 1.
        assert_eq!(builder.into_bytes(), vec![0xAA, 0xAA]);
    }

    #[test]
    fn a1_sync_uses_missing_clock_pattern() {
        let mut builder = RawTrackBuilder::new(DataRate::Rate250Kbps, Encoding::Mfm);
        builder.add_a1_sync();
        assert_eq!(builder.into_bytes(), vec![0x44, 0x89, 0x44, 0x89, 0x44, 0x89]);
    }

    #[test]
    fn sector_record_is_byte_aligned_and_crc_clean() {
        let mut builder = RawTrackBuilder::new(DataRate::Rate500Kbps, Encoding::Mfm);
        builder.add_track_start();
        let id_offset = builder.add_sector(Header::new(0, 0, 1, 2), AddressMark::Data, &[0xE5; 512], 0x54);
        assert_eq!(id_offset % 16, 0);
        let bytes = builder.into_bytes();
        // gap4a(80) + sync(12) + IAM(4) + gap1(50) + sync(12) + 3xA1, then the
        // ID mark byte.
        assert_eq!(id_offset as usize, (80 + 12 + 4 + 50 + 12 + 3) * 16);
        assert!(!bytes.is_empty());
    }
}
