//! The boot configuration database rewrite transform.
//!
//! Boot configuration databases routinely name loaders by their BIOS
//! executable names; rewriting `.exe` to `.efi` in flight lets one database
//! serve both firmware flavors. The transform scans each read window for
//! case-insensitive UTF-16LE occurrences of `.exe` at every byte offset and
//! overwrites them in place with the same-length `.efi`.
//!
//! The scan never reaches outside the window it was handed, so an
//! occurrence whose bytes are split across two separately-windowed reads is
//! not rewritten. That blind spot is part of the transform's observable
//! behavior and is kept as is.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, Ordering};

use vdisk::Patch;

/// UTF-16LE `.exe`.
const SEARCH: [u8; 8] = *b".\0e\0x\0e\0";
/// UTF-16LE `.efi`.
const REPLACE: [u8; 8] = *b".\0e\0f\0i\0";

/// Builds the rewrite transform for one registered database file.
///
/// `raw` disables the rewrite globally; it is read on every invocation, so
/// flipping it after registration still takes effect.
pub fn patch(raw: &'static AtomicBool) -> Patch {
    Box::new(move |offset, data| {
        if raw.load(Ordering::Relaxed) {
            return;
        }
        rewrite(offset, data);
    })
}

fn rewrite(offset: u64, data: &mut [u8]) {
    if data.len() < SEARCH.len() {
        return;
    }

    for position in 0..=data.len() - SEARCH.len() {
        let window = &data[position..position + SEARCH.len()];
        // Case folding applies to the letters; the zero high bytes must
        // match exactly.
        if window
            .iter()
            .zip(SEARCH)
            .all(|(byte, expected)| byte.eq_ignore_ascii_case(&expected))
        {
            data[position..position + REPLACE.len()].copy_from_slice(&REPLACE);
            log::debug!("patched BCD at {:#x}", offset + position as u64);
        }
    }
}
