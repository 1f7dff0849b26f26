//! Discovery of the boot volume and extraction of its root directory.
//!
//! Candidate handles are taken in firmware order and probed for the
//! signature file; failures before a candidate is confirmed are expected
//! (most handles are not storage at all) and simply move the loop along.
//! The first candidate whose signature file opens is the boot volume, and
//! from that point on every firmware failure is terminal: the volume was
//! confirmed, so a later error is breakage rather than a discovery miss.

use alloc::{boxed::Box, string::String, vec::Vec};
use core::{error, fmt, sync::atomic::AtomicBool};

use uefi::Status;
use vdisk::Registry;

use crate::{
    bcd,
    firmware::{
        name_matches, narrow_name, wide, FileIo, Firmware, FirmwareContent, LocateError, Volume,
    },
    Discovery, BCD_NAME, BOOT_ALIAS_NAME, BOOT_ARCH_NAME, SIGNATURE_NAME,
};

/// Capacity, in handles, of the first candidate query.
pub const PROBE_CAPACITY: usize = 16;

/// Returns the candidate storage handles in firmware order.
///
/// Queries with [`PROBE_CAPACITY`] first and, if the firmware reports a
/// larger requirement, re-queries exactly once at that size. Any other
/// failure, or a failing second query, yields no candidates; the caller
/// decides what an empty set means. This is the only retry in the pipeline.
pub fn candidate_handles<F: Firmware>(firmware: &F) -> Vec<F::Handle> {
    match firmware.locate_candidates(PROBE_CAPACITY) {
        Ok(handles) => handles,
        Err(LocateError::BufferTooSmall { required }) => firmware
            .locate_candidates(required)
            .unwrap_or_else(|_| Vec::new()),
        Err(LocateError::Firmware(status)) => {
            log::debug!("candidate query failed: {status}");
            Vec::new()
        }
    }
}

/// Finds the boot volume and registers every file in its root directory.
///
/// Candidates are tried in firmware order until one exposes
/// [`SIGNATURE_NAME`]; that volume's root is walked and no later candidate
/// is probed. Loader-name matches overwrite `resolved.boot_loader` per
/// entry, so with several matching entries the last one in directory order
/// wins; a `BCD` entry gets the rewrite transform gated on `raw_bcd`.
///
/// # Errors
///
/// [`DiscoverError::BootVolumeNotFound`] if no candidate carries the
/// signature file; any other variant is a firmware failure after the volume
/// was confirmed. Both are terminal for the boot attempt.
pub fn discover_boot_volume<F: Firmware>(
    firmware: &F,
    registry: &mut Registry,
    resolved: &mut Discovery,
    raw_bcd: &'static AtomicBool,
) -> Result<(), DiscoverError> {
    for (index, handle) in candidate_handles(firmware).into_iter().enumerate() {
        if try_volume(firmware, index, handle, registry, resolved, raw_bcd)? {
            return Ok(());
        }
    }

    Err(DiscoverError::BootVolumeNotFound)
}

/// Probes one candidate; `Ok(true)` means it was confirmed and walked.
fn try_volume<F: Firmware>(
    firmware: &F,
    index: usize,
    handle: F::Handle,
    registry: &mut Registry,
    resolved: &mut Discovery,
    raw_bcd: &'static AtomicBool,
) -> Result<bool, DiscoverError> {
    let mut root = match firmware.open_volume(handle) {
        Ok(root) => root,
        Err(status) => {
            log::debug!("skipping candidate {index}: no file system ({status})");
            return Ok(false);
        }
    };

    if let Err(status) = root.open(&wide(SIGNATURE_NAME)) {
        log::debug!("skipping candidate {index}: no signature file ({status})");
        return Ok(false);
    }
    log::debug!("found {SIGNATURE_NAME} on candidate {index}");

    walk_root::<F>(&mut root, registry, resolved, raw_bcd)?;
    Ok(true)
}

/// Walks a confirmed volume's root directory and registers its files.
fn walk_root<F: Firmware>(
    root: &mut F::Volume,
    registry: &mut Registry,
    resolved: &mut Discovery,
    raw_bcd: &'static AtomicBool,
) -> Result<(), DiscoverError> {
    loop {
        let entry = match root.next_entry().map_err(DiscoverError::ReadDirectory)? {
            Some(entry) => entry,
            None => break,
        };

        // Only the root is scanned; subdirectories are not descended into.
        if entry.directory {
            continue;
        }

        let mut file = root.open(&entry.name).map_err(|status| DiscoverError::OpenEntry {
            name: narrow_name(&entry.name),
            status,
        })?;
        let size = file.size().map_err(|status| DiscoverError::EntryInfo {
            name: narrow_name(&entry.name),
            status,
        })?;
        let name = narrow_name(&entry.name);
        let vfile = registry.register(&name, size, Box::new(FirmwareContent(file)));

        if name_is_loader(&entry.name) {
            log::debug!("found boot loader {name}");
            resolved.boot_loader = Some(vfile);
        }
        if name_matches(&entry.name, BCD_NAME) {
            log::debug!("found {BCD_NAME}");
            registry.attach_patch(vfile, bcd::patch(raw_bcd));
        }
    }

    Ok(())
}

fn name_is_loader(name: &[u16]) -> bool {
    name_matches(name, BOOT_ARCH_NAME) || name_matches(name, BOOT_ALIAS_NAME)
}

/// Various errors that can occur while discovering the boot volume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscoverError {
    /// No candidate volume carries the signature file.
    BootVolumeNotFound,
    /// A directory read failed on the confirmed volume.
    ReadDirectory(Status),
    /// A directory entry on the confirmed volume could not be opened.
    OpenEntry {
        /// The narrowed name of the entry.
        name: String,
        /// The firmware status of the failed open.
        status: Status,
    },
    /// An opened entry's size could not be queried.
    EntryInfo {
        /// The narrowed name of the entry.
        name: String,
        /// The firmware status of the failed query.
        status: Status,
    },
}

impl fmt::Display for DiscoverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BootVolumeNotFound => {
                write!(f, "no volume carrying {SIGNATURE_NAME} found")
            }
            Self::ReadDirectory(status) => {
                write!(f, "could not read root directory: {status}")
            }
            Self::OpenEntry { name, status } => {
                write!(f, "could not open {name:?}: {status}")
            }
            Self::EntryInfo { name, status } => {
                write!(f, "could not get file info for {name:?}: {status}")
            }
        }
    }
}

impl error::Error for DiscoverError {}
