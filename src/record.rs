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

    src/record.rs

    Record-level output of the raw track sync hunt.
*/

//! The `record` module defines the records the sync hunt yields before any
//! sector assembly happens. It sits below both the decoder and the track
//! types so neither needs to know about the other.

use crate::types::chs::Header;
use crate::types::enums::AddressMark;

/// One record located in a raw track stream. Offsets are rawbit positions of
/// the address mark byte, from the start of the capture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawRecord {
    /// A track index address mark (0xFC).
    Index { offset: i32 },
    /// An ID record with its parsed CHRN header. Only records whose CRC
    /// verified are emitted.
    Id { offset: i32, header: Header },
    /// A data record of any DAM variant. Data capture is deferred until
    /// parenting is known.
    DataRef { offset: i32, dam: AddressMark },
}

impl RawRecord {
    pub fn offset(&self) -> i32 {
        match self {
            RawRecord::Index { offset } | RawRecord::Id { offset, .. } | RawRecord::DataRef { offset, .. } => *offset,
        }
    }
}
