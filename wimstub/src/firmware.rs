//! Abstraction over the firmware storage surface consumed by discovery.
//!
//! The traits here mirror the handful of firmware primitives the pipeline
//! needs: a sized query against the handle database, opening a handle's
//! volume as its root directory, reading directory entries, and random
//! access reads of open files. The UEFI implementation lives in
//! [`crate::platform`]; tests drive the pipeline through in-memory doubles.
//!
//! Firmware file names are UCS-2; the portable core carries them as raw
//! `u16` units and narrows them to 8-bit registry names with
//! [`narrow_name`].

use alloc::{string::String, vec::Vec};

use uefi::Status;
use vdisk::{Content, ContentError};

/// The firmware surface the discovery pipeline runs against.
pub trait Firmware {
    /// An opaque handle to a device exposed by the firmware.
    type Handle: Copy;
    /// An open volume root directory.
    type Volume: Volume<File = Self::File>;
    /// An open file on a volume.
    type File: FileIo + 'static;

    /// Performs one sized query for candidate storage handles.
    ///
    /// `capacity` is the number of handles the caller has room for. A single
    /// query either succeeds, reports the required capacity, or fails with a
    /// firmware status; any retry policy belongs to the caller.
    ///
    /// # Errors
    ///
    /// [`LocateError::BufferTooSmall`] carries the capacity a repeated query
    /// needs; [`LocateError::Firmware`] is any other failure.
    fn locate_candidates(&self, capacity: usize) -> Result<Vec<Self::Handle>, LocateError>;

    /// Opens the volume behind `handle` and returns its root directory.
    ///
    /// # Errors
    ///
    /// Fails with the firmware status when the handle exposes no file
    /// system or the volume cannot be opened; most candidate handles are
    /// expected to fail here.
    fn open_volume(&self, handle: Self::Handle) -> Result<Self::Volume, Status>;
}

/// An open volume root directory.
pub trait Volume {
    /// An open file on this volume.
    type File;

    /// Opens the file called `name` (UCS-2 units, no terminator) for
    /// reading.
    ///
    /// # Errors
    ///
    /// Fails with the firmware status when the file does not exist or
    /// cannot be opened.
    fn open(&mut self, name: &[u16]) -> Result<Self::File, Status>;

    /// Reads the next directory entry.
    ///
    /// Returns `Ok(None)` on the zero-length read that marks the end of the
    /// directory.
    ///
    /// # Errors
    ///
    /// Fails with the firmware status of the underlying directory read.
    fn next_entry(&mut self) -> Result<Option<DirEntry>, Status>;
}

/// Random access reads against an open firmware file.
pub trait FileIo {
    /// Queries the file's size in bytes.
    ///
    /// # Errors
    ///
    /// Fails with the firmware status of the info query.
    fn size(&mut self) -> Result<u64, Status>;

    /// Fills `data` with file bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Fails with the firmware status of the positioning or read call.
    fn read_at(&mut self, offset: u64, data: &mut [u8]) -> Result<(), Status>;
}

/// A single directory entry as reported by the firmware.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// The native wide name of the entry.
    pub name: Vec<u16>,
    /// The file size reported alongside the entry.
    pub size: u64,
    /// Whether the entry is a subdirectory.
    pub directory: bool,
}

/// Various errors that can occur during a single candidate-handle query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocateError {
    /// The caller's buffer is too small.
    BufferTooSmall {
        /// The capacity, in handles, a repeated query needs.
        required: usize,
    },
    /// The query failed outright.
    Firmware(Status),
}

/// Adapts an open firmware file into a [`vdisk`] content source.
///
/// The wrapped handle is owned by the registry from registration on and is
/// never explicitly closed; the firmware reclaims it when the boot attempt
/// ends.
pub struct FirmwareContent<F>(pub F);

impl<F: FileIo> Content for FirmwareContent<F> {
    fn read_at(&mut self, offset: u64, data: &mut [u8]) -> Result<(), ContentError> {
        self.0.read_at(offset, data).map_err(ContentError)
    }
}

/// Encodes `name` as UCS-2 units without a terminator.
pub fn wide(name: &str) -> Vec<u16> {
    name.encode_utf16().collect()
}

/// Compares a firmware wide name against a known name, ignoring ASCII case.
pub fn name_matches(name: &[u16], known: &str) -> bool {
    let mut known = known.encode_utf16();
    for unit in name {
        match known.next() {
            Some(expected) if fold(*unit) == fold(expected) => {}
            _ => return false,
        }
    }
    known.next().is_none()
}

/// Narrows a wide name to the 8-bit form used for registry names.
///
/// Each unit keeps its low byte only; names longer than the registry bound
/// are truncated at registration time.
pub fn narrow_name(name: &[u16]) -> String {
    name.iter().map(|unit| (unit & 0xff) as u8 as char).collect()
}

fn fold(unit: u16) -> u16 {
    if (u16::from(b'A')..=u16::from(b'Z')).contains(&unit) {
        unit + 0x20
    } else {
        unit
    }
}
