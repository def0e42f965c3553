#![allow(dead_code)]

use trackfox::track::TrackFormat;
use trackfox::track_builder::RawTrackBuilder;
use trackfox::{CylHead, DataRate, Encoding};

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The PC 1.44M layout used by the round-trip tests: 18 sectors of 512 bytes
/// at 500kbps MFM.
pub fn hd_format() -> TrackFormat {
    TrackFormat {
        data_rate: DataRate::Rate500Kbps,
        encoding: Encoding::Mfm,
        sectors: 18,
        size: 2,
        gap3: 0x54,
        fill: 0xE5,
        base: 1,
        interleave: 1,
    }
}

/// The PC 360K layout: 9 sectors of 512 bytes at 250kbps MFM.
pub fn dd_format() -> TrackFormat {
    TrackFormat {
        data_rate: DataRate::Rate250Kbps,
        encoding: Encoding::Mfm,
        sectors: 9,
        size: 2,
        gap3: 0x54,
        fill: 0xE5,
        base: 1,
        interleave: 1,
    }
}

pub fn build_raw_track(cylhead: CylHead, format: &TrackFormat) -> Vec<u8> {
    RawTrackBuilder::build_format_track(cylhead, format)
}

/// Flip one data bit inside the size byte of the Nth sector's CHRN, making
/// that ID record's CRC fail.
pub fn corrupt_sector_id(raw: &mut [u8], format: &TrackFormat, index: usize) {
    // Data byte position of the CHRN size byte: sync run, three A1 bytes,
    // the ID mark, then cyl/head/sector.
    let size_byte = format.sector_start_bytes(index) + 12 + 3 + 1 + 3;
    // Two raw bytes per data byte; 0x40 lands on a data bit, not a clock.
    raw[size_byte * 2] ^= 0x40;
}

/// Flip one data bit inside the Nth sector's data field, making that data
/// record's CRC fail.
pub fn corrupt_sector_data(raw: &mut [u8], format: &TrackFormat, index: usize) {
    // Ten bytes into the body: sync, three A1 bytes, the ID mark, CHRN and
    // CRC, gap2, then the data record's sync, A1 run and mark.
    let data_byte = format.sector_start_bytes(index) + 12 + 3 + 1 + 4 + 2 + 22 + 12 + 3 + 1 + 10;
    raw[data_byte * 2] ^= 0x40;
}
