//! Discovery of the volume or embedded WIM archive carrying a Windows boot
//! environment, and assembly of the virtual file set served to the firmware
//! boot path.
//!
//! The pipeline probes the firmware's storage handles for the volume marked
//! by [`SIGNATURE_NAME`], registers every file on that volume with the
//! [`vdisk`] registry as a lazily-read virtual file, resolves the platform
//! boot loader, locates the embedded WIM archive under its well-known name,
//! and falls back to extracting boot artifacts out of the archive when the
//! real volume lacks them. File content is never materialized up front;
//! reads are satisfied on demand and run through per-file patch chains, of
//! which the BCD `.exe` to `.efi` rewrite is the one concrete transform.
//!
//! The WIM parsing engine and the block-emulation layer consuming the
//! registry are external: the pipeline is generic over [`wim::WimEngine`],
//! and a downstream boot stub drives [`assemble`] (or, on UEFI targets,
//! `platform::prepare`) with its engine of choice.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use core::{error, fmt, sync::atomic::AtomicBool};

use vdisk::{FileRef, Registry};

use crate::{
    discover::DiscoverError,
    firmware::Firmware,
    wim::{LocateWimError, MissingBootLoaderError, WimEngine},
};

pub mod bcd;
pub mod cmdline;
pub mod discover;
pub mod firmware;
pub mod wim;

#[cfg(target_os = "uefi")]
pub mod logging;
#[cfg(target_os = "uefi")]
pub mod platform;

#[cfg(test)]
pub(crate) mod mock;

/// Name of the signature file whose presence marks the intended boot volume.
pub const SIGNATURE_NAME: &str = "_.QEMU_HDA._";

/// Generic alias for the platform boot loader, accepted on any architecture.
pub const BOOT_ALIAS_NAME: &str = "bootmgfw.efi";

/// Name of the boot configuration database file.
pub const BCD_NAME: &str = "BCD";

/// Architecture-specific removable-media boot loader name.
#[cfg(target_arch = "x86_64")]
pub const BOOT_ARCH_NAME: &str = "BOOTX64.EFI";
/// Architecture-specific removable-media boot loader name.
#[cfg(target_arch = "x86")]
pub const BOOT_ARCH_NAME: &str = "BOOTIA32.EFI";
/// Architecture-specific removable-media boot loader name.
#[cfg(target_arch = "arm")]
pub const BOOT_ARCH_NAME: &str = "BOOTARM.EFI";
/// Architecture-specific removable-media boot loader name.
#[cfg(target_arch = "aarch64")]
pub const BOOT_ARCH_NAME: &str = "BOOTAA64.EFI";
/// Architecture-specific removable-media boot loader name.
#[cfg(target_arch = "riscv64")]
pub const BOOT_ARCH_NAME: &str = "BOOTRISCV64.EFI";
/// Architecture-specific removable-media boot loader name.
#[cfg(target_arch = "loongarch64")]
pub const BOOT_ARCH_NAME: &str = "BOOTLOONGARCH64.EFI";

/// The outcome of the discovery strategies, threaded through the pipeline.
///
/// Both slots start unset, are written by the discovery components, and are
/// inspected once by the extraction orchestrator; they are never reset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Discovery {
    /// The virtual file resolved as the platform boot loader.
    ///
    /// During a directory walk every matching entry overwrites this slot, so
    /// the last match in directory order wins.
    pub boot_loader: Option<FileRef>,
    /// The virtual file representing the embedded WIM archive.
    pub wim: Option<FileRef>,
}

/// Runs the full discovery pipeline and assembles the virtual file set.
///
/// The WIM archive is located first when `wim_volume` names the handle that
/// carries it, then the boot volume is discovered and walked, and finally
/// the extraction orchestrator fills in whatever the real volume lacked.
/// Returns the populated registry together with the resolved boot loader.
///
/// `raw_bcd` is consulted by the BCD rewrite at read time; pass
/// [`cmdline::RAW_BCD`] outside of tests.
///
/// # Errors
///
/// Any failure past candidate probing is terminal for the boot attempt: see
/// [`AssembleError`].
pub fn assemble<F: Firmware, W: WimEngine>(
    firmware: &F,
    wim_volume: Option<F::Handle>,
    engine: &W,
    index: u32,
    raw_bcd: &'static AtomicBool,
) -> Result<(Registry, FileRef), AssembleError> {
    let mut registry = Registry::new();
    let mut resolved = Discovery::default();

    if let Some(handle) = wim_volume {
        wim::locate_wim(firmware, handle, &mut registry, &mut resolved)?;
    }
    discover::discover_boot_volume(firmware, &mut registry, &mut resolved, raw_bcd)?;
    let loader = wim::process(engine, &mut registry, &mut resolved, index)?;

    log::debug!(
        "assembled {} virtual files, booting {}",
        registry.len(),
        registry.file(loader).name()
    );
    Ok((registry, loader))
}

/// Various errors that can occur while assembling the virtual file set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssembleError {
    /// An error occurred while locating the WIM archive.
    LocateWim(LocateWimError),
    /// An error occurred while discovering the boot volume.
    Discover(DiscoverError),
    /// No strategy produced a usable boot loader.
    BootLoader(MissingBootLoaderError),
}

impl From<LocateWimError> for AssembleError {
    fn from(value: LocateWimError) -> Self {
        Self::LocateWim(value)
    }
}

impl From<DiscoverError> for AssembleError {
    fn from(value: DiscoverError) -> Self {
        Self::Discover(value)
    }
}

impl From<MissingBootLoaderError> for AssembleError {
    fn from(value: MissingBootLoaderError) -> Self {
        Self::BootLoader(value)
    }
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocateWim(error) => write!(f, "error locating WIM archive: {error}"),
            Self::Discover(error) => write!(f, "error discovering boot volume: {error}"),
            Self::BootLoader(error) => write!(f, "{error}"),
        }
    }
}

impl error::Error for AssembleError {}
