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

    src/types/chs.rs

    Cylinder/head addressing and the four-component sector ID header.
*/

//! The `chs` module defines the physical track address ([`CylHead`]) and the
//! CHRN sector ID header ([`Header`]) used throughout the decoder and track
//! model.

use std::fmt::{self, Display, Formatter};

pub const MAX_CYLS: u16 = 128;
pub const MAX_HEADS: u8 = 2;

/// The sector ID given to a data record whose ID record could not be
/// recovered. Deliberately one past the largest value an on-disk sector
/// ID byte can hold; [`Header::sector`] is kept wider than a byte so the
/// sentinel can never collide with a real ID.
pub const ORPHAN_SECTOR_ID: u16 = 256;

/// A physical track address: cylinder and head.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CylHead {
    pub cyl:  u16,
    pub head: u8,
}

impl CylHead {
    pub fn new(cyl: u16, head: u8) -> Self {
        debug_assert!(cyl < MAX_CYLS && head < MAX_HEADS);
        CylHead { cyl, head }
    }

    pub fn next_cyl(&self) -> CylHead {
        CylHead::new(self.cyl + 1, self.head)
    }
}

impl Display for CylHead {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "cyl {} head {}", self.cyl, self.head)
    }
}

/// The four components of a sector ID record: cylinder, head, sector and
/// size code (CHRN).
///
/// Size code `n` encodes `128 << n` bytes, with the uPD765 clamp at 8.
/// The sector field is wider than the on-disk byte so [`ORPHAN_SECTOR_ID`]
/// stays representable.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Header {
    pub cyl:    u16,
    pub head:   u8,
    pub sector: u16,
    pub size:   u8,
}

impl Header {
    pub fn new(cyl: u16, head: u8, sector: u16, size: u8) -> Self {
        Header { cyl, head, sector, size }
    }

    pub fn from_cylhead(cylhead: CylHead, sector: u16, size: u8) -> Self {
        Header {
            cyl: cylhead.cyl,
            head: cylhead.head,
            sector,
            size,
        }
    }

    /// Map a size code to how the uPD765 FDC treats it: sizes above 8 are
    /// treated as 8 (32K).
    pub fn real_size_code(size: u8) -> u8 {
        size.min(8)
    }

    /// The sector length in bytes encoded by a size code.
    pub fn size_code_to_length(size: u8) -> usize {
        128usize << Header::real_size_code(size)
    }

    /// The sector length in bytes declared by this header.
    pub fn sector_size(&self) -> usize {
        Header::size_code_to_length(self.size)
    }

    pub fn cylhead(&self) -> CylHead {
        CylHead {
            cyl:  self.cyl,
            head: self.head,
        }
    }

    pub fn is_orphan(&self) -> bool {
        self.sector == ORPHAN_SECTOR_ID
    }

    pub fn compare_chrn(&self, rhs: &Header) -> bool {
        self == rhs
    }

    /// Compare cylinder, head and sector, ignoring the size code.
    pub fn compare_chr(&self, rhs: &Header) -> bool {
        self.cyl == rhs.cyl && self.head == rhs.head && self.sector == rhs.sector
    }
}

impl From<Header> for CylHead {
    fn from(header: Header) -> Self {
        header.cylhead()
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "sector {} (cyl {} head {} size {})", self.sector, self.cyl, self.head, self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_codes() {
        assert_eq!(Header::size_code_to_length(0), 128);
        assert_eq!(Header::size_code_to_length(2), 512);
        assert_eq!(Header::size_code_to_length(6), 8192);
        // The uPD765 clamps codes above 8.
        assert_eq!(Header::size_code_to_length(8), 32768);
        assert_eq!(Header::size_code_to_length(12), 32768);
    }

    #[test]
    fn header_ordering_is_lexicographic() {
        let a = Header::new(0, 0, 1, 2);
        let b = Header::new(0, 0, 2, 1);
        let c = Header::new(0, 1, 0, 0);
        let d = Header::new(1, 0, 0, 0);
        assert!(a < b && b < c && c < d);
    }

    #[test]
    fn orphan_sentinel_is_out_of_byte_range() {
        let orphan = Header::new(0, 0, ORPHAN_SECTOR_ID, 2);
        assert!(orphan.is_orphan());
        assert!(orphan.sector > u8::MAX as u16);
        // Clamping applies to length computation only, never the header.
        assert_eq!(orphan.sector, 256);
    }
}
