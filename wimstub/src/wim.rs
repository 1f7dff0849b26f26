//! Location of the embedded WIM archive and extraction of boot artifacts.
//!
//! The archive is a single file under a well-known name on a volume the
//! caller already trusts, registered like any other virtual file and read
//! through its patch chain. Parsing the archive's internal format is the
//! job of an external engine implementing [`WimEngine`]; this module only
//! orchestrates it: attach the engine's structural patch, fall back to an
//! extracted boot manager when the real volume had none, and pull the fixed
//! auxiliary file set out of the archive regardless.

use alloc::boxed::Box;
use core::{error, fmt};

use uefi::Status;
use vdisk::{FileRef, Patch, Registry};

use crate::{
    firmware::{wide, FileIo, Firmware, FirmwareContent, Volume},
    Discovery, BOOT_ALIAS_NAME, BOOT_ARCH_NAME,
};

/// Well-known name of the archive file on its volume.
pub const WIM_SOURCE_NAME: &str = "initrd";

/// Name the archive is registered under.
pub const WIM_FILE_NAME: &str = "boot.wim";

/// Path of the boot manager inside the archive.
pub const BOOT_MANAGER_PATH: &str = "\\Windows\\Boot\\EFI\\bootmgfw.efi";

/// Auxiliary paths extracted from the archive on a best-effort basis.
pub const AUX_PATHS: [&str; 7] = [
    "\\Windows\\Boot\\DVD\\EFI\\boot.sdi",
    "\\Windows\\Boot\\DVD\\EFI\\BCD",
    "\\Windows\\Boot\\Fonts\\segmono_boot.ttf",
    "\\Windows\\Boot\\Fonts\\segoen_slboot.ttf",
    "\\Windows\\Boot\\Fonts\\segoe_slboot.ttf",
    "\\Windows\\Boot\\Fonts\\wgl4_boot.ttf",
    "\\sms\\boot\\boot.sdi",
];

/// The external engine that understands the archive's internal format.
///
/// The engine reads archive bytes through the registry (and therefore
/// through the archive's patch chain) and registers whatever it extracts as
/// new virtual files.
pub trait WimEngine {
    /// Returns the fixed transform that performs archive-internal
    /// structural fixups on every read of the archive itself.
    fn structural_patch(&self) -> Patch;

    /// Extracts the file at `path` inside image `index` of `archive`,
    /// registering it under `output`.
    ///
    /// Returns `None` when the path is absent from the archive.
    fn extract_one(
        &self,
        registry: &mut Registry,
        archive: FileRef,
        index: u32,
        path: &str,
        output: &str,
    ) -> Option<FileRef>;

    /// Extracts every present path of `paths` from image `index` of
    /// `archive`, registering each under its final path component; absent
    /// paths are silently dropped.
    fn extract_set(&self, registry: &mut Registry, archive: FileRef, index: u32, paths: &[&str]);
}

/// Opens the archive under its well-known name on `handle` and registers it.
///
/// This path performs no candidate search: the caller already knows the
/// handle carries the archive, so every failure is terminal.
///
/// # Errors
///
/// Any [`LocateWimError`] is fatal for the boot attempt.
pub fn locate_wim<F: Firmware>(
    firmware: &F,
    handle: F::Handle,
    registry: &mut Registry,
    resolved: &mut Discovery,
) -> Result<(), LocateWimError> {
    let mut volume = firmware
        .open_volume(handle)
        .map_err(LocateWimError::OpenVolume)?;
    let mut file = volume
        .open(&wide(WIM_SOURCE_NAME))
        .map_err(LocateWimError::OpenSource)?;
    let size = file.size().map_err(LocateWimError::FileInfo)?;

    let vfile = registry.register(WIM_FILE_NAME, size, Box::new(FirmwareContent(file)));
    log::debug!("found WIM file {WIM_SOURCE_NAME} ({size} bytes)");
    resolved.wim = Some(vfile);

    Ok(())
}

/// Runs the extraction orchestrator over whatever discovery resolved.
///
/// With no archive located the engine is never consulted. Otherwise the
/// archive's virtual file gets the engine's structural patch; a boot
/// manager is extracted only when the real volume resolved none (real
/// volume files always take precedence), and the auxiliary set is extracted
/// unconditionally. Runs after both discovery strategies have had their
/// chance, and must.
///
/// # Errors
///
/// [`MissingBootLoaderError`] when no strategy produced a boot loader; the
/// auxiliary extraction has been attempted by then.
pub fn process<W: WimEngine>(
    engine: &W,
    registry: &mut Registry,
    resolved: &mut Discovery,
    index: u32,
) -> Result<FileRef, MissingBootLoaderError> {
    if let Some(archive) = resolved.wim {
        registry.attach_patch(archive, engine.structural_patch());

        if resolved.boot_loader.is_none() {
            if let Some(loader) =
                engine.extract_one(registry, archive, index, BOOT_MANAGER_PATH, BOOT_ARCH_NAME)
            {
                log::debug!("extracted {BOOT_MANAGER_PATH}");
                resolved.boot_loader = Some(loader);
            }
        }

        engine.extract_set(registry, archive, index, &AUX_PATHS);
    }

    resolved.boot_loader.ok_or(MissingBootLoaderError)
}

/// Various errors that can occur while locating the WIM archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocateWimError {
    /// The volume expected to carry the archive could not be opened.
    OpenVolume(Status),
    /// The archive file could not be opened.
    OpenSource(Status),
    /// The archive file's size could not be queried.
    FileInfo(Status),
}

impl fmt::Display for LocateWimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenVolume(status) => write!(f, "could not open WIM volume: {status}"),
            Self::OpenSource(status) => {
                write!(f, "could not open {WIM_SOURCE_NAME}: {status}")
            }
            Self::FileInfo(status) => {
                write!(f, "could not get {WIM_SOURCE_NAME} file info: {status}")
            }
        }
    }
}

impl error::Error for LocateWimError {}

/// No discovery strategy produced a usable boot loader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MissingBootLoaderError;

impl fmt::Display for MissingBootLoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no {BOOT_ARCH_NAME} or {BOOT_ALIAS_NAME} found")
    }
}

impl error::Error for MissingBootLoaderError {}

#[cfg(test)]
mod tests {
    use alloc::{boxed::Box, vec, vec::Vec};

    use vdisk::Registry;

    use super::{
        locate_wim, process, LocateWimError, MissingBootLoaderError, AUX_PATHS, BOOT_MANAGER_PATH,
        WIM_FILE_NAME,
    };
    use crate::{
        mock::{MockEngine, MockEntry, MockFirmware, MockVolume, StaticBytes, Step},
        Discovery, BOOT_ARCH_NAME,
    };

    fn registered_archive(registry: &mut Registry) -> Discovery {
        let archive = registry.register(WIM_FILE_NAME, 64, Box::new(StaticBytes(vec![0x4d; 64])));
        Discovery {
            boot_loader: None,
            wim: Some(archive),
        }
    }

    #[test]
    fn locating_registers_the_archive() {
        let mut firmware = MockFirmware::new(vec![0]);
        firmware.volume(
            0,
            MockVolume::with(vec![
                Step::Entry(MockEntry::file("initrd", vec![0x4d; 96])),
                Step::End,
            ]),
        );

        let mut registry = Registry::new();
        let mut resolved = Discovery::default();
        locate_wim(&firmware, 0, &mut registry, &mut resolved).unwrap();

        let archive = resolved.wim.unwrap();
        assert_eq!(registry.file(archive).name(), WIM_FILE_NAME);
        assert_eq!(registry.file(archive).size(), 96);
    }

    #[test]
    fn missing_archive_file_is_fatal() {
        let mut firmware = MockFirmware::new(vec![0]);
        firmware.volume(0, MockVolume::with(vec![Step::End]));

        let mut registry = Registry::new();
        let mut resolved = Discovery::default();
        let result = locate_wim(&firmware, 0, &mut registry, &mut resolved);

        assert!(matches!(result, Err(LocateWimError::OpenSource(_))));
        assert!(resolved.wim.is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn missing_volume_is_fatal() {
        let firmware = MockFirmware::new(vec![0]);

        let mut registry = Registry::new();
        let mut resolved = Discovery::default();
        let result = locate_wim(&firmware, 0, &mut registry, &mut resolved);

        assert!(matches!(result, Err(LocateWimError::OpenVolume(_))));
    }

    #[test]
    fn without_archive_the_engine_is_never_consulted() {
        let engine = MockEngine::new(Some(vec![1]));
        let mut registry = Registry::new();
        let loader = registry.register("loader", 0, Box::new(StaticBytes(Vec::new())));
        let mut resolved = Discovery {
            boot_loader: Some(loader),
            wim: None,
        };

        let result = process(&engine, &mut registry, &mut resolved, 0);

        assert_eq!(result, Ok(loader));
        assert_eq!(engine.extract_one_calls.get(), 0);
        assert_eq!(engine.extract_set_calls.get(), 0);
    }

    #[test]
    fn without_archive_or_loader_the_failure_is_terminal() {
        let engine = MockEngine::new(Some(vec![1]));
        let mut registry = Registry::new();
        let mut resolved = Discovery::default();

        let result = process(&engine, &mut registry, &mut resolved, 0);

        assert_eq!(result, Err(MissingBootLoaderError));
        assert_eq!(engine.extract_one_calls.get(), 0);
    }

    #[test]
    fn structural_patch_is_attached_to_the_archive() {
        let engine = MockEngine::new(Some(vec![1]));
        let mut registry = Registry::new();
        let mut resolved = registered_archive(&mut registry);
        let archive = resolved.wim.unwrap();

        process(&engine, &mut registry, &mut resolved, 0).unwrap();

        assert_eq!(registry.file(archive).patch_count(), 1);
        registry.read(archive, 0, &mut [0; 16]).unwrap();
        assert_eq!(engine.structural_reads.get(), 1);
    }

    #[test]
    fn real_volume_loader_takes_precedence_over_extraction() {
        let engine = MockEngine::new(Some(vec![1]));
        let mut registry = Registry::new();
        let mut resolved = registered_archive(&mut registry);
        let loader = registry.register("loader", 0, Box::new(StaticBytes(Vec::new())));
        resolved.boot_loader = Some(loader);

        let result = process(&engine, &mut registry, &mut resolved, 0);

        assert_eq!(result, Ok(loader));
        assert_eq!(engine.extract_one_calls.get(), 0);
        assert_eq!(engine.extract_set_calls.get(), 1);
    }

    #[test]
    fn boot_manager_is_extracted_when_no_loader_was_resolved() {
        let engine = MockEngine::new(Some(vec![0x4d, 0x5a]));
        let mut registry = Registry::new();
        let mut resolved = registered_archive(&mut registry);

        let loader = process(&engine, &mut registry, &mut resolved, 2).unwrap();

        assert_eq!(registry.file(loader).name(), BOOT_ARCH_NAME);
        assert_eq!(engine.extract_one_calls.get(), 1);
        assert_eq!(
            *engine.last_extract.borrow(),
            Some((2, BOOT_MANAGER_PATH.into(), BOOT_ARCH_NAME.into()))
        );
    }

    #[test]
    fn auxiliary_set_is_extracted_before_the_terminal_check() {
        let engine = MockEngine::new(None);
        let mut registry = Registry::new();
        let mut resolved = registered_archive(&mut registry);

        let result = process(&engine, &mut registry, &mut resolved, 0);

        assert_eq!(result, Err(MissingBootLoaderError));
        assert_eq!(engine.extract_one_calls.get(), 1);
        assert_eq!(engine.extract_set_calls.get(), 1);
        let aux = engine.aux_seen.borrow();
        let seen: Vec<&str> = aux.iter().map(|path| path.as_str()).collect();
        assert_eq!(seen, AUX_PATHS);
    }
}
