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

    src/timed_scan.rs

    The controller's timed-scan result and its assembly into a track of
    empty sectors at measured offsets.
*/

//! The `timed_scan` module parses the wire format of a timed ID scan — the
//! sequence of sector headers a controller saw during one revolution, each
//! stamped with microseconds from the index — and assembles it into a
//! [`Track`] whose sectors carry offsets but no data yet.

use binrw::{io::Cursor, BinRead};

use crate::sector::{MergeOptions, Sector};
use crate::track::Track;
use crate::types::chs::{CylHead, Header};
use crate::types::enums::{rawbits_time_us, DataRate, Encoding};
use crate::TrackImageError;

/// One scanned sector ID with its relative time from the index.
#[derive(BinRead, Copy, Clone, Debug, PartialEq, Eq)]
#[br(little)]
pub struct TimedScanHeader {
    pub cyl:    u8,
    pub head:   u8,
    pub sector: u8,
    pub size:   u8,
    /// Microseconds from the index pulse to this ID record.
    pub reltime: u32,
}

/// The complete result of one timed scan revolution.
#[derive(BinRead, Clone, Debug, Default)]
#[br(little)]
pub struct TimedScanResult {
    /// Measured rotation time in microseconds.
    pub tracktime: u32,
    /// Index of the header seen first, before reordering by the controller.
    pub firstseen: u16,
    pub count:     u16,
    #[br(count = count)]
    pub headers:   Vec<TimedScanHeader>,
}

impl TimedScanResult {
    /// Parse the result from the controller's wire representation.
    pub fn parse(bytes: &[u8]) -> Result<Self, TrackImageError> {
        TimedScanResult::read(&mut Cursor::new(bytes)).map_err(|e| TrackImageError::DeviceError(e.to_string()))
    }

    pub fn new(tracktime: u32, firstseen: u16, headers: Vec<TimedScanHeader>) -> Self {
        TimedScanResult {
            tracktime,
            firstseen,
            count: headers.len() as u16,
            headers,
        }
    }

    /// Assemble a track of data-less sectors from the scanned headers.
    ///
    /// Under `normal_disk` the scan rejects sectors whose cylinder/head does
    /// not match the physical location.
    pub fn decode(&self, cylhead: CylHead, data_rate: DataRate, encoding: Encoding, opts: &MergeOptions) -> Track {
        let mut track = Track::new();
        if self.headers.is_empty() {
            return track;
        }

        let rawbit_us = rawbits_time_us(data_rate, encoding, 1);
        track.tracktime = self.tracktime as i32;
        track.tracklen = (self.tracktime as f64 / rawbit_us).round() as i32;

        for scan_header in &self.headers {
            if opts.normal_disk && (scan_header.cyl as u16 != cylhead.cyl || scan_header.head != cylhead.head) {
                log::warn!(
                    "timed scan: track's {} does not match sector's cyl {} head {} sector {}, ignoring this sector",
                    cylhead,
                    scan_header.cyl,
                    scan_header.head,
                    scan_header.sector
                );
                continue;
            }
            let header = Header::new(scan_header.cyl as u16, scan_header.head, scan_header.sector as u16, scan_header.size);
            let mut sector = Sector::new(data_rate, encoding, header);
            sector.offset = (scan_header.reltime as f64 / rawbit_us).round() as i32;
            sector.set_constant_disk(false);
            // A shared rate and encoding cannot produce a merge error here.
            let _ = track.add(sector, opts);
        }
        track
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_header(sector: u8, reltime: u32) -> TimedScanHeader {
        TimedScanHeader {
            cyl: 0,
            head: 0,
            sector,
            size: 2,
            reltime,
        }
    }

    #[test]
    fn wire_format_round_trip() {
        // tracktime, firstseen, count, then (cyl, head, sector, size,
        // reltime) entries, all little-endian.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&200_000u32.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        for (sector, reltime) in [(1u8, 2_000u32), (2, 24_000)] {
            bytes.extend_from_slice(&[0, 0, sector, 2]);
            bytes.extend_from_slice(&reltime.to_le_bytes());
        }

        let result = TimedScanResult::parse(&bytes).unwrap();
        assert_eq!(result.tracktime, 200_000);
        assert_eq!(result.count, 2);
        assert_eq!(result.headers[1], scan_header(2, 24_000));
    }

    #[test]
    fn decode_converts_microseconds_to_rawbits() {
        let result = TimedScanResult::new(200_000, 0, vec![scan_header(1, 2_000), scan_header(2, 24_000)]);
        let track = result.decode(CylHead::new(0, 0), DataRate::Rate250Kbps, Encoding::Mfm, &MergeOptions::default());
        // 250kbps MFM: one rawbit is 2us, so the track is 100,000 rawbits.
        assert_eq!(track.tracklen, 100_000);
        assert_eq!(track.tracktime, 200_000);
        assert_eq!(track.len(), 2);
        assert_eq!(track[0].offset, 1_000);
        assert_eq!(track[1].offset, 12_000);
        assert!(!track[0].has_data());
        assert!(!track[0].is_constant_disk());
    }

    #[test]
    fn normal_disk_rejects_foreign_geometry() {
        let mut foreign = scan_header(3, 50_000);
        foreign.cyl = 39;
        let result = TimedScanResult::new(200_000, 0, vec![scan_header(1, 2_000), foreign]);
        let opts = MergeOptions {
            normal_disk: true,
            ..MergeOptions::default()
        };
        let track = result.decode(CylHead::new(0, 0), DataRate::Rate250Kbps, Encoding::Mfm, &opts);
        assert_eq!(track.len(), 1);
        assert_eq!(track[0].header.sector, 1);
    }
}
