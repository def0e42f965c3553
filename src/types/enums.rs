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

    src/types/enums.rs

    Data rates, encodings, address marks and the timing conversions between
    byte counts, microseconds and rawbits.
*/

use std::fmt::{self, Display, Formatter};

use crate::TrackImageError;

/// The media data rate of a track.
///
/// 250kbps and 300kbps describe the same media written at 300 and 360 RPM
/// respectively, so the two are treated as interchangeable when comparing
/// records between reads.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum DataRate {
    #[default]
    Rate250Kbps,
    Rate300Kbps,
    Rate500Kbps,
    Rate1000Kbps,
}

impl DataRate {
    /// Bits per second on the media.
    pub fn bits_per_second(&self) -> u32 {
        match self {
            DataRate::Rate250Kbps => 250_000,
            DataRate::Rate300Kbps => 300_000,
            DataRate::Rate500Kbps => 500_000,
            DataRate::Rate1000Kbps => 1_000_000,
        }
    }

    /// Nominal bitcell width in nanoseconds.
    pub fn bitcell_ns(&self) -> u32 {
        match self {
            DataRate::Rate250Kbps => 2000,
            DataRate::Rate300Kbps => 1667,
            DataRate::Rate500Kbps => 1000,
            DataRate::Rate1000Kbps => 500,
        }
    }
}

impl TryFrom<u32> for DataRate {
    type Error = TrackImageError;

    fn try_from(rate: u32) -> Result<Self, Self::Error> {
        match rate {
            250_000 => Ok(DataRate::Rate250Kbps),
            300_000 => Ok(DataRate::Rate300Kbps),
            500_000 => Ok(DataRate::Rate500Kbps),
            1_000_000 => Ok(DataRate::Rate1000Kbps),
            _ => Err(TrackImageError::UnsupportedEncoding),
        }
    }
}

impl Display for DataRate {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            DataRate::Rate250Kbps => write!(f, "250Kbps"),
            DataRate::Rate300Kbps => write!(f, "300Kbps"),
            DataRate::Rate500Kbps => write!(f, "500Kbps"),
            DataRate::Rate1000Kbps => write!(f, "1000Kbps"),
        }
    }
}

/// True when two data rates describe the same media rate on drives with
/// different rotation speeds (250kbps at 300 RPM vs 300kbps at 360 RPM).
pub fn are_interchangeable_data_rates(a: DataRate, b: DataRate) -> bool {
    matches!(a, DataRate::Rate250Kbps | DataRate::Rate300Kbps)
        && matches!(b, DataRate::Rate250Kbps | DataRate::Rate300Kbps)
}

/// Rescale an offset recorded at one data rate to another. The arithmetic is
/// done in 64 bits; the quotient would overflow 32-bit intermediates for long
/// ED tracks otherwise.
pub fn convert_offset_by_data_rate(offset: i32, source: DataRate, target: DataRate) -> i32 {
    (target.bits_per_second() as i64 * offset as i64 / source.bits_per_second() as i64) as i32
}

/// The bitcell encoding of a track.
///
/// Only FM and MFM are fully interpreted by the decoder; the remaining
/// variants exist so their tracks can be tagged and carried through.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum Encoding {
    #[default]
    Mfm,
    Fm,
    Rx02,
    Amiga,
    Gcr,
}

impl Encoding {
    /// Rawbits (halfbits) per data byte: MFM packs a byte into 16 rawbits,
    /// FM cells occupy twice the time so a byte spans 32.
    pub fn rawbits_per_byte(&self) -> usize {
        match self {
            Encoding::Fm => 32,
            _ => 16,
        }
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Encoding::Mfm => write!(f, "MFM"),
            Encoding::Fm => write!(f, "FM"),
            Encoding::Rx02 => write!(f, "RX02"),
            Encoding::Amiga => write!(f, "Amiga"),
            Encoding::Gcr => write!(f, "GCR"),
        }
    }
}

/// The one-byte address mark tag that opens every record on an IBM PC format
/// track.
///
/// See: https://deramp.com/downloads/floppy_drives/FD1771%20Floppy%20Controller.pdf
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum AddressMark {
    #[default]
    Undefined = 0,
    Index = 0xFC,
    Id = 0xFE,
    Data = 0xFB,
    AltData = 0xFA,
    DeletedData = 0xF8,
    AltDeletedData = 0xF9,
    Rx02 = 0xFD,
}

impl AddressMark {
    pub fn is_valid(value: u8) -> bool {
        AddressMark::try_from(value).is_ok()
    }

    pub fn is_id(&self) -> bool {
        matches!(self, AddressMark::Id)
    }

    /// True for any of the data address mark variants.
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            AddressMark::Data | AddressMark::AltData | AddressMark::DeletedData | AddressMark::AltDeletedData | AddressMark::Rx02
        )
    }

    pub fn is_deleted_data(&self) -> bool {
        matches!(self, AddressMark::DeletedData | AddressMark::AltDeletedData)
    }
}

impl TryFrom<u8> for AddressMark {
    type Error = TrackImageError;

    // 0xFF is not a valid mark; the FD1771 "bad track" value is left
    // undefined here.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(AddressMark::Undefined),
            0xFC => Ok(AddressMark::Index),
            0xFE => Ok(AddressMark::Id),
            0xFB => Ok(AddressMark::Data),
            0xFA => Ok(AddressMark::AltData),
            0xF8 => Ok(AddressMark::DeletedData),
            0xF9 => Ok(AddressMark::AltDeletedData),
            0xFD => Ok(AddressMark::Rx02),
            _ => Err(TrackImageError::ParameterError),
        }
    }
}

impl From<AddressMark> for u8 {
    fn from(mark: AddressMark) -> u8 {
        mark as u8
    }
}

impl Display for AddressMark {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            AddressMark::Undefined => write!(f, "UNDEFINED"),
            AddressMark::Index => write!(f, "INDEX"),
            AddressMark::Id => write!(f, "ID"),
            AddressMark::Data => write!(f, "DATA"),
            AddressMark::AltData => write!(f, "ALT_DATA"),
            AddressMark::DeletedData => write!(f, "DELETED_DATA"),
            AddressMark::AltDeletedData => write!(f, "ALT_DELETED_DATA"),
            AddressMark::Rx02 => write!(f, "RX02"),
        }
    }
}

/// Microseconds taken by `len_bytes` data bytes at the given rate. FM bytes
/// take twice as long as MFM bytes at the same rate.
pub fn data_bytes_time_us(data_rate: DataRate, encoding: Encoding, len_bytes: usize) -> f64 {
    let byte_us = 1_000_000.0 * if matches!(encoding, Encoding::Fm) { 2.0 } else { 1.0 }
        / (data_rate.bits_per_second() as f64 / 8.0);
    byte_us * len_bytes as f64
}

/// Microseconds taken by `len_rawbits` rawbits (halfbits) at the given rate.
pub fn rawbits_time_us(data_rate: DataRate, encoding: Encoding, len_rawbits: usize) -> f64 {
    data_bytes_time_us(data_rate, encoding, len_rawbits) / 16.0
}

/// Rawbit count closest to the given duration at the given rate.
pub fn time_us_to_rawbits(data_rate: DataRate, encoding: Encoding, time_us: f64) -> i32 {
    (time_us / rawbits_time_us(data_rate, encoding, 1)).round() as i32
}

/// Byte count closest to the given duration at the given rate.
pub fn time_us_to_data_bytes(data_rate: DataRate, encoding: Encoding, time_us: f64) -> i32 {
    (time_us / data_bytes_time_us(data_rate, encoding, 1)).round() as i32
}

/// A data byte position expressed as a rawbit offset.
pub fn data_byte_pos_as_rawbit_offset(bytes: i32, encoding: Encoding) -> i32 {
    bytes * encoding.rawbits_per_byte() as i32
}

/// Compare two track offsets for equality within a byte tolerance, on the
/// ring of `tracklen` rawbits. Zero offsets (or an unknown tracklen) always
/// compare equal, as there is nothing to measure against.
pub fn are_offsets_tolerated_same(offset1: i32, offset2: i32, byte_tolerance_of_time: i32, tracklen: i32) -> bool {
    if tracklen == 0 || offset1 == 0 || offset2 == 0 {
        return true;
    }
    let offset_min = offset1.min(offset2);
    let offset_max = offset1.max(offset2);
    let distance = (offset_max - offset_min).min(tracklen + offset_min - offset_max);

    distance <= byte_tolerance_of_time * 16
}
