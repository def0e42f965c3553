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
*/

//! # trackfox
//!
//! trackfox is a Rust library for recovering clean sector data from raw
//! MFM/FM floppy track captures, of the kind produced by low-level floppy
//! controller reads on vintage IBM PCs and compatibles.
//!
//! It is designed around two complementary acquisition paths:
//!
//! * a **timed ID scan**, which yields every sector ID the controller saw in
//!   one revolution together with its timing from the index, and
//! * a **raw track read**, a rawbit capture of a revolution and a bit, which
//!   trackfox decodes itself — recovering sectors the controller cannot
//!   deliver, including data records whose ID was destroyed ("orphan data").
//!
//! The [`reconciler::DualTrackReconciler`] drives both paths against a
//! [`reconciler::FloppyController`] implementation until the caller's
//! [`reconciler::DeviceReadingPolicy`] is satisfied, folding every
//! acquisition into a single deduplicated [`Track`] of [`Sector`]s with
//! per-copy read statistics.
//!
//! The decoding core — [`rawtrack::RawTrackDecoder`] over a
//! [`bitbuf::BitByteBuffer`] — can also be used on its own to decode
//! captures from files or other sources.

pub mod bitbuf;
pub mod bitpos;
pub mod crc;
pub mod ibmpc;
pub mod orphan_track;
pub mod rawtrack;
pub mod record;
pub mod reconciler;
pub mod sector;
pub mod timed_scan;
pub mod track;
pub mod track_builder;
pub mod track_ids;
pub mod types;

use thiserror::Error;

/// The largest sector body any size code can declare (the uPD765 clamp).
pub const MAXIMUM_SECTOR_SIZE: usize = 32768;
pub const DEFAULT_SECTOR_SIZE: usize = 512;

#[derive(Debug, Error)]
pub enum TrackImageError {
    #[error("A device error occurred reading the drive or capture: {0}")]
    DeviceError(String),
    #[error("The requested encoding or data rate is not supported")]
    UnsupportedEncoding,
    #[error("An invalid function parameter was supplied")]
    ParameterError,
    #[error("Sector state is inconsistent; this indicates a logic error")]
    InconsistentState,
    #[error("The disk rotation speed is out of the tolerated range")]
    DiskSpeedError,
}

pub use crate::bitbuf::BitByteBuffer;
pub use crate::bitpos::BitPosition;
pub use crate::crc::Crc16;
pub use crate::orphan_track::OrphanDataCapableTrack;
pub use crate::rawtrack::RawTrackDecoder;
pub use crate::reconciler::{DeviceReadingPolicy, DualTrackReconciler, FloppyController};
pub use crate::sector::{DataReadStats, MergeOptions, Sector, SectorMerge};
pub use crate::timed_scan::TimedScanResult;
pub use crate::track::{AddResult, Track, TrackFormat};
pub use crate::track_builder::RawTrackBuilder;
pub use crate::types::chs::{CylHead, Header, ORPHAN_SECTOR_ID};
pub use crate::types::enums::{AddressMark, DataRate, Encoding};
