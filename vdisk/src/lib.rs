//! The virtual file registry backing the emulated boot volume.
//!
//! Every file the emulated volume presents is registered here as a
//! [`VirtualFile`]: a bounded name, a declared size, a lazily-read content
//! source, and an ordered chain of patch transforms applied to every read.
//! No file content is materialized at registration time; bytes are produced
//! on demand when the block-emulation layer asks for them.
//!
//! The registry also acts as the arena for the firmware file handles opened
//! during discovery: a registered content source is owned here for the rest
//! of the boot attempt and is only reclaimed when the whole registry is
//! dropped. Releasing a handle earlier would invalidate a content source
//! that the emulated volume may still be asked to read.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{boxed::Box, vec::Vec};
use core::{error, fmt};

use arrayvec::ArrayString;
use uefi::Status;

/// Maximum length, in bytes, of a registered file name.
///
/// Longer names are silently truncated at registration time.
pub const NAME_LEN: usize = 32;

/// A random-access content source for a [`VirtualFile`].
///
/// Implementors must support reads at arbitrary `(offset, length)` windows
/// with `offset + length` no greater than the declared file size, repeatedly
/// and in any order; there is no streaming cursor.
pub trait Content {
    /// Fills `data` with the file bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns a [`ContentError`] if the underlying source fails; a failure
    /// here is not recoverable by the registry.
    fn read_at(&mut self, offset: u64, data: &mut [u8]) -> Result<(), ContentError>;
}

/// An error produced by a [`Content`] source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentError(pub Status);

impl fmt::Display for ContentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "content source failed: {}", self.0)
    }
}

impl error::Error for ContentError {}

/// A content transform applied to every read of a [`VirtualFile`].
///
/// Invoked with the absolute file offset of the read and the freshly filled
/// buffer; the transform mutates the buffer in place and must not change its
/// length. A transform only ever sees the bytes of the current read window.
pub type Patch = Box<dyn FnMut(u64, &mut [u8])>;

/// A handle to a file registered in a [`Registry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileRef(usize);

/// A single registered virtual file.
pub struct VirtualFile {
    name: ArrayString<NAME_LEN>,
    size: u64,
    content: Box<dyn Content>,
    patches: Vec<Patch>,
}

impl VirtualFile {
    /// The registered (possibly truncated) name of this file.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared size of this file, in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The number of patch transforms attached to this file.
    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }
}

/// The virtual file registry.
///
/// Registration order is preserved. Names are not deduplicated: registering
/// a name twice leaves both files in place.
#[derive(Default)]
pub struct Registry {
    files: Vec<VirtualFile>,
}

impl Registry {
    /// Creates an empty [`Registry`].
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    /// The number of registered files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if no file has been registered.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Registers a new virtual file and returns a handle to it.
    ///
    /// `name` is truncated to [`NAME_LEN`] bytes; `size` is the declared
    /// size reads will be validated against.
    pub fn register(&mut self, name: &str, size: u64, content: Box<dyn Content>) -> FileRef {
        let mut bounded = ArrayString::new();
        for character in name.chars() {
            if bounded.try_push(character).is_err() {
                break;
            }
        }

        self.files.push(VirtualFile {
            name: bounded,
            size,
            content,
            patches: Vec::new(),
        });
        FileRef(self.files.len() - 1)
    }

    /// Appends `patch` to the transform chain of `file`.
    ///
    /// Transforms run in attachment order on every subsequent read.
    pub fn attach_patch(&mut self, file: FileRef, patch: Patch) {
        self.files[file.0].patches.push(patch);
    }

    /// Returns the registered file behind `file`.
    pub fn file(&self, file: FileRef) -> &VirtualFile {
        &self.files[file.0]
    }

    /// Returns a handle to the first file registered under `name`.
    pub fn find(&self, name: &str) -> Option<FileRef> {
        self.files
            .iter()
            .position(|file| file.name() == name)
            .map(FileRef)
    }

    /// Iterates over the registered files in registration order.
    pub fn files(&self) -> impl Iterator<Item = &VirtualFile> {
        self.files.iter()
    }

    /// Reads `data.len()` bytes at `offset` from `file`.
    ///
    /// The content source fills the buffer, then the file's patch chain runs
    /// over it in attachment order with the absolute offset of this read.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::OutOfRange`] if the window extends past the
    /// declared file size, and [`ReadError::Content`] if the content source
    /// fails.
    pub fn read(&mut self, file: FileRef, offset: u64, data: &mut [u8]) -> Result<(), ReadError> {
        let file = &mut self.files[file.0];

        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= file.size);
        if end.is_none() {
            return Err(ReadError::OutOfRange {
                offset,
                length: data.len(),
                size: file.size,
            });
        }

        file.content.read_at(offset, data)?;
        for patch in file.patches.iter_mut() {
            patch(offset, data);
        }

        Ok(())
    }
}

/// Various errors that can occur while reading a registered file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadError {
    /// The requested window extends past the declared file size.
    OutOfRange {
        /// The requested offset.
        offset: u64,
        /// The requested length.
        length: usize,
        /// The declared size of the file.
        size: u64,
    },
    /// The content source failed.
    Content(ContentError),
}

impl From<ContentError> for ReadError {
    fn from(value: ContentError) -> Self {
        Self::Content(value)
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange {
                offset,
                length,
                size,
            } => write!(
                f,
                "read of {length} bytes at {offset:#x} exceeds declared size {size:#x}"
            ),
            Self::Content(error) => write!(f, "{error}"),
        }
    }
}

impl error::Error for ReadError {}
