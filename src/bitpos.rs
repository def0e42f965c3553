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

    src/bitpos.rs

    A (byte, bit) cursor position into a bit-addressable byte buffer.
*/

use std::ops::{Add, AddAssign, Sub, SubAssign};

pub const BYTE_BIT_SIZE: usize = u8::BITS as usize;

/// An absolute position in a byte buffer with bit granularity.
///
/// The invariant `bit < 8` holds after every operation; arithmetic is carried
/// through the byte component.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BitPosition {
    // Field order matters for the derived ordering.
    byte: usize,
    bit:  u8,
}

impl BitPosition {
    pub fn new(total_bits: usize) -> Self {
        BitPosition {
            byte: total_bits / BYTE_BIT_SIZE,
            bit:  (total_bits % BYTE_BIT_SIZE) as u8,
        }
    }

    #[inline]
    pub fn byte(&self) -> usize {
        self.byte
    }

    #[inline]
    pub fn bit(&self) -> u8 {
        self.bit
    }

    #[inline]
    pub fn total_bits(&self) -> usize {
        self.byte * BYTE_BIT_SIZE + self.bit as usize
    }

    /// True when the position lies on a byte boundary.
    #[inline]
    pub fn is_byte_aligned(&self) -> bool {
        self.bit == 0
    }

    /// Advance by one bit.
    #[inline]
    pub fn step_bit(&mut self) {
        if self.bit < (BYTE_BIT_SIZE - 1) as u8 {
            self.bit += 1;
        }
        else {
            self.bit = 0;
            self.byte += 1;
        }
    }

    /// Step back by one bit.
    #[inline]
    pub fn step_bit_back(&mut self) {
        if self.bit > 0 {
            self.bit -= 1;
        }
        else {
            self.bit = (BYTE_BIT_SIZE - 1) as u8;
            self.byte -= 1;
        }
    }

    /// Advance by whole bytes, leaving the bit offset untouched.
    #[inline]
    pub fn step_bytes(&mut self, bytes: usize) {
        self.byte += bytes;
    }

    /// Step back by whole bytes, leaving the bit offset untouched.
    #[inline]
    pub fn step_bytes_back(&mut self, bytes: usize) {
        self.byte -= bytes;
    }

    /// The position `bytes` whole bytes further on.
    #[inline]
    pub fn add_bytes(&self, bytes: usize) -> Self {
        BitPosition {
            byte: self.byte + bytes,
            bit:  self.bit,
        }
    }
}

impl From<usize> for BitPosition {
    fn from(total_bits: usize) -> Self {
        BitPosition::new(total_bits)
    }
}

impl Add<usize> for BitPosition {
    type Output = BitPosition;

    fn add(self, bits: usize) -> BitPosition {
        BitPosition::new(self.total_bits() + bits)
    }
}

impl AddAssign<usize> for BitPosition {
    fn add_assign(&mut self, bits: usize) {
        *self = BitPosition::new(self.total_bits() + bits);
    }
}

impl Sub<usize> for BitPosition {
    type Output = BitPosition;

    fn sub(self, bits: usize) -> BitPosition {
        BitPosition::new(self.total_bits() - bits)
    }
}

impl SubAssign<usize> for BitPosition {
    fn sub_assign(&mut self, bits: usize) {
        *self = BitPosition::new(self.total_bits() - bits);
    }
}

impl Sub<BitPosition> for BitPosition {
    type Output = usize;

    /// Distance in bits between two positions.
    fn sub(self, rhs: BitPosition) -> usize {
        self.total_bits() - rhs.total_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_normalises() {
        let pos = BitPosition::new(21);
        assert_eq!(pos.byte(), 2);
        assert_eq!(pos.bit(), 5);
        assert_eq!(pos.total_bits(), 21);
    }

    #[test]
    fn bit_stepping_carries() {
        let mut pos = BitPosition::new(7);
        pos.step_bit();
        assert_eq!((pos.byte(), pos.bit()), (1, 0));
        pos.step_bit_back();
        assert_eq!((pos.byte(), pos.bit()), (0, 7));
    }

    #[test]
    fn arithmetic_keeps_bit_in_range() {
        let mut pos = BitPosition::new(3);
        pos += 13;
        assert!(pos.bit() < 8);
        assert_eq!(pos.total_bits(), 16);
        pos -= 9;
        assert_eq!(pos.total_bits(), 7);
        assert_eq!((pos + 1usize).total_bits(), 8);
    }

    #[test]
    fn ordering_is_total_bit_order() {
        assert!(BitPosition::new(15) < BitPosition::new(16));
        assert!(BitPosition::new(8) > BitPosition::new(7));
        assert_eq!(BitPosition::new(24) - BitPosition::new(7), 17);
    }
}
