//! UEFI implementation of the firmware surface, plus the entry helper a
//! downstream boot stub drives.

use alloc::{
    string::{String, ToString},
    vec::Vec,
};
use core::{error, fmt};

use uefi::{
    boot::{self, ScopedProtocol, SearchType},
    proto::{
        device_path::DevicePath,
        loaded_image::{LoadOptionsError, LoadedImage},
        media::{
            file::{Directory, File, FileAttribute, FileInfo, FileMode, RegularFile},
            fs::SimpleFileSystem,
        },
    },
    CStr16, Handle, Status,
};
use vdisk::{FileRef, Registry};

use crate::{
    assemble, cmdline,
    cmdline::ParseCmdlineError,
    firmware::{DirEntry, FileIo, Firmware, LocateError, Volume},
    wim::WimEngine,
    AssembleError,
};

/// The live firmware surface.
pub struct Uefi;

impl Firmware for Uefi {
    type Handle = Handle;
    type Volume = UefiVolume;
    type File = UefiFile;

    fn locate_candidates(&self, capacity: usize) -> Result<Vec<Handle>, LocateError> {
        // Every device exposes a device path; whether a candidate is
        // storage is decided by the volume open that follows.
        let handles = boot::locate_handle_buffer(SearchType::from_proto::<DevicePath>())
            .map_err(|error| LocateError::Firmware(error.status()))?;

        // The binding sizes its own buffer, so the caller's capacity is
        // checked after the fact to keep its resize policy observable.
        if handles.len() > capacity {
            return Err(LocateError::BufferTooSmall {
                required: handles.len(),
            });
        }
        Ok(handles.iter().copied().collect())
    }

    fn open_volume(&self, handle: Handle) -> Result<UefiVolume, Status> {
        let mut fs: ScopedProtocol<SimpleFileSystem> =
            boot::open_protocol_exclusive(handle).map_err(|error| error.status())?;
        let root = fs.open_volume().map_err(|error| error.status())?;

        // The protocol is released when `fs` drops; the root directory
        // handle stays valid on its own.
        Ok(UefiVolume { root })
    }
}

/// An open volume root directory.
pub struct UefiVolume {
    root: Directory,
}

impl Volume for UefiVolume {
    type File = UefiFile;

    fn open(&mut self, name: &[u16]) -> Result<UefiFile, Status> {
        let mut buffer = Vec::with_capacity(name.len() + 1);
        buffer.extend_from_slice(name);
        buffer.push(0);
        let name = CStr16::from_u16_with_nul(&buffer).map_err(|_| Status::INVALID_PARAMETER)?;

        let handle = self
            .root
            .open(name, FileMode::Read, FileAttribute::empty())
            .map_err(|error| error.status())?;
        let file = handle.into_regular_file().ok_or(Status::UNSUPPORTED)?;
        Ok(UefiFile { file })
    }

    fn next_entry(&mut self) -> Result<Option<DirEntry>, Status> {
        let info = self
            .root
            .read_entry_boxed()
            .map_err(|error| error.status())?;

        Ok(info.map(|info| DirEntry {
            name: info.file_name().iter().map(|c| u16::from(*c)).collect(),
            size: info.file_size(),
            directory: info.attribute().contains(FileAttribute::DIRECTORY),
        }))
    }
}

/// An open file on a volume.
pub struct UefiFile {
    file: RegularFile,
}

impl FileIo for UefiFile {
    fn size(&mut self) -> Result<u64, Status> {
        let info = self
            .file
            .get_boxed_info::<FileInfo>()
            .map_err(|error| error.status())?;
        Ok(info.file_size())
    }

    fn read_at(&mut self, offset: u64, data: &mut [u8]) -> Result<(), Status> {
        self.file
            .set_position(offset)
            .map_err(|error| error.status())?;

        let mut filled = 0;
        while filled < data.len() {
            let read = self
                .file
                .read(&mut data[filled..])
                .map_err(|error| error.status())?;
            if read == 0 {
                return Err(Status::END_OF_FILE);
            }
            filled += read;
        }
        Ok(())
    }
}

/// Returns the device handle the stub itself was loaded from.
///
/// # Errors
///
/// Fails with the firmware status when the loaded image protocol is
/// unavailable or carries no device handle.
pub fn boot_device() -> Result<Handle, Status> {
    let loaded = boot::open_protocol_exclusive::<LoadedImage>(boot::image_handle())
        .map_err(|error| error.status())?;
    loaded.device().ok_or(Status::NOT_FOUND)
}

/// Returns the option string handed over with the loaded image.
///
/// # Errors
///
/// Fails with the firmware status when the loaded image protocol is
/// unavailable or its options are not a string.
pub fn load_options() -> Result<String, Status> {
    let loaded = boot::open_protocol_exclusive::<LoadedImage>(boot::image_handle())
        .map_err(|error| error.status())?;

    match loaded.load_options_as_cstr16() {
        Ok(options) => Ok(options.to_string()),
        Err(LoadOptionsError::NotSet) => Ok(String::new()),
        Err(_) => Err(Status::INVALID_PARAMETER),
    }
}

/// Parses the options, installs logging, and assembles the virtual file set
/// from the boot device using `engine` for archive extraction.
///
/// On success the returned registry holds every discovered and extracted
/// file, ready to be served by the block-emulation layer, and the
/// [`FileRef`] names the resolved boot loader.
///
/// # Errors
///
/// Any [`PrepareError`] is terminal for the boot attempt.
pub fn prepare<W: WimEngine>(engine: &W) -> Result<(Registry, FileRef), PrepareError> {
    let options = cmdline::parse(&load_options().map_err(PrepareError::Firmware)?)?;
    options.publish();
    crate::logging::init(options.quiet);

    let device = boot_device().map_err(PrepareError::Firmware)?;
    Ok(assemble(
        &Uefi,
        Some(device),
        engine,
        options.index,
        &cmdline::RAW_BCD,
    )?)
}

/// Various errors that can occur while preparing the virtual file set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrepareError {
    /// A firmware call failed during startup.
    Firmware(Status),
    /// The option string could not be parsed.
    Cmdline(ParseCmdlineError),
    /// The discovery pipeline failed.
    Assemble(AssembleError),
}

impl From<ParseCmdlineError> for PrepareError {
    fn from(value: ParseCmdlineError) -> Self {
        Self::Cmdline(value)
    }
}

impl From<AssembleError> for PrepareError {
    fn from(value: AssembleError) -> Self {
        Self::Assemble(value)
    }
}

impl fmt::Display for PrepareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Firmware(status) => write!(f, "firmware call failed: {status}"),
            Self::Cmdline(error) => write!(f, "error parsing options: {error}"),
            Self::Assemble(error) => write!(f, "{error}"),
        }
    }
}

impl error::Error for PrepareError {}
