//! In-memory doubles of the firmware surface and the WIM engine.

use alloc::{
    boxed::Box,
    collections::{BTreeMap, VecDeque},
    rc::Rc,
    string::String,
    vec::Vec,
};
use core::cell::{Cell, RefCell};

use uefi::Status;
use vdisk::{Content, ContentError, FileRef, Patch, Registry};

use crate::{
    firmware::{name_matches, narrow_name, wide, DirEntry, FileIo, Firmware, LocateError, Volume},
    wim::WimEngine,
};

/// Encodes `text` as UTF-16LE bytes.
pub(crate) fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}

/// A content source backed by an owned byte buffer.
pub(crate) struct StaticBytes(pub(crate) Vec<u8>);

impl Content for StaticBytes {
    fn read_at(&mut self, offset: u64, data: &mut [u8]) -> Result<(), ContentError> {
        let offset = offset as usize;
        let end = offset + data.len();
        if end > self.0.len() {
            return Err(ContentError(Status::DEVICE_ERROR));
        }
        data.copy_from_slice(&self.0[offset..end]);
        Ok(())
    }
}

/// One scripted outcome of a directory read.
#[derive(Clone)]
pub(crate) enum Step {
    /// A directory entry.
    Entry(MockEntry),
    /// The zero-length read ending the directory.
    End,
    /// A failing directory read.
    Fail(Status),
}

/// A file or subdirectory on a mock volume.
#[derive(Clone)]
pub(crate) struct MockEntry {
    pub(crate) name: String,
    pub(crate) data: Rc<Vec<u8>>,
    pub(crate) directory: bool,
    pub(crate) openable: bool,
    pub(crate) info_status: Option<Status>,
}

impl MockEntry {
    pub(crate) fn file(name: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data: Rc::new(data),
            directory: false,
            openable: true,
            info_status: None,
        }
    }

    pub(crate) fn directory(name: &str) -> Self {
        Self {
            directory: true,
            ..Self::file(name, Vec::new())
        }
    }

    pub(crate) fn unopenable(name: &str) -> Self {
        Self {
            openable: false,
            ..Self::file(name, Vec::new())
        }
    }

    pub(crate) fn info_fails(name: &str, status: Status) -> Self {
        Self {
            info_status: Some(status),
            ..Self::file(name, Vec::new())
        }
    }
}

/// A volume with a scripted root directory.
pub(crate) struct MockVolume {
    handle: usize,
    steps: Vec<Step>,
    cursor: usize,
    opens: Option<Rc<RefCell<Vec<(usize, String)>>>>,
}

impl MockVolume {
    pub(crate) fn with(steps: Vec<Step>) -> Self {
        Self {
            handle: 0,
            steps,
            cursor: 0,
            opens: None,
        }
    }
}

/// The handle a [`MockFirmware`] hands out for an opened volume.
pub(crate) struct VolumeRef(Rc<RefCell<MockVolume>>);

impl Volume for VolumeRef {
    type File = MockFile;

    fn open(&mut self, name: &[u16]) -> Result<MockFile, Status> {
        let volume = self.0.borrow();
        if let Some(log) = &volume.opens {
            log.borrow_mut().push((volume.handle, narrow_name(name)));
        }

        for step in &volume.steps {
            if let Step::Entry(entry) = step {
                if name_matches(name, &entry.name) {
                    if !entry.openable {
                        return Err(Status::DEVICE_ERROR);
                    }
                    return Ok(MockFile {
                        data: Rc::clone(&entry.data),
                        info_status: entry.info_status,
                    });
                }
            }
        }
        Err(Status::NOT_FOUND)
    }

    fn next_entry(&mut self) -> Result<Option<DirEntry>, Status> {
        let mut volume = self.0.borrow_mut();
        let step = volume.steps.get(volume.cursor).cloned();
        volume.cursor += 1;

        match step {
            None | Some(Step::End) => Ok(None),
            Some(Step::Fail(status)) => Err(status),
            Some(Step::Entry(entry)) => Ok(Some(DirEntry {
                name: wide(&entry.name),
                size: entry.data.len() as u64,
                directory: entry.directory,
            })),
        }
    }
}

/// An open file on a mock volume.
pub(crate) struct MockFile {
    data: Rc<Vec<u8>>,
    info_status: Option<Status>,
}

impl FileIo for MockFile {
    fn size(&mut self) -> Result<u64, Status> {
        if let Some(status) = self.info_status {
            return Err(status);
        }
        Ok(self.data.len() as u64)
    }

    fn read_at(&mut self, offset: u64, data: &mut [u8]) -> Result<(), Status> {
        let offset = offset as usize;
        let end = offset + data.len();
        if end > self.data.len() {
            return Err(Status::DEVICE_ERROR);
        }
        data.copy_from_slice(&self.data[offset..end]);
        Ok(())
    }
}

/// A firmware double with scripted handles and volumes.
pub(crate) struct MockFirmware {
    handles: Vec<usize>,
    volumes: BTreeMap<usize, Rc<RefCell<MockVolume>>>,
    /// Errors returned by upcoming candidate queries, in order.
    pub(crate) probe_errors: RefCell<VecDeque<LocateError>>,
    /// Number of candidate queries made so far.
    pub(crate) probe_calls: Cell<usize>,
    /// Every `(handle, narrowed name)` open attempted on any volume.
    pub(crate) opens: Rc<RefCell<Vec<(usize, String)>>>,
}

impl MockFirmware {
    pub(crate) fn new(handles: Vec<usize>) -> Self {
        Self {
            handles,
            volumes: BTreeMap::new(),
            probe_errors: RefCell::new(VecDeque::new()),
            probe_calls: Cell::new(0),
            opens: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Attaches a volume to `handle`; handles without one fail to open.
    pub(crate) fn volume(&mut self, handle: usize, mut volume: MockVolume) {
        volume.handle = handle;
        volume.opens = Some(Rc::clone(&self.opens));
        self.volumes.insert(handle, Rc::new(RefCell::new(volume)));
    }
}

impl Firmware for MockFirmware {
    type Handle = usize;
    type Volume = VolumeRef;
    type File = MockFile;

    fn locate_candidates(&self, capacity: usize) -> Result<Vec<usize>, LocateError> {
        self.probe_calls.set(self.probe_calls.get() + 1);

        if let Some(error) = self.probe_errors.borrow_mut().pop_front() {
            return Err(error);
        }
        if self.handles.len() > capacity {
            return Err(LocateError::BufferTooSmall {
                required: self.handles.len(),
            });
        }
        Ok(self.handles.clone())
    }

    fn open_volume(&self, handle: usize) -> Result<VolumeRef, Status> {
        self.volumes
            .get(&handle)
            .map(|volume| VolumeRef(Rc::clone(volume)))
            .ok_or(Status::UNSUPPORTED)
    }
}

/// A WIM engine double that records how it was driven.
pub(crate) struct MockEngine {
    /// Content of the boot manager inside the archive, if present.
    boot_manager: Option<Vec<u8>>,
    /// Number of [`WimEngine::extract_one`] calls.
    pub(crate) extract_one_calls: Cell<usize>,
    /// Number of [`WimEngine::extract_set`] calls.
    pub(crate) extract_set_calls: Cell<usize>,
    /// The `(index, path, output)` of the last single extraction.
    pub(crate) last_extract: RefCell<Option<(u32, String, String)>>,
    /// Every path handed to a set extraction.
    pub(crate) aux_seen: RefCell<Vec<String>>,
    /// Number of archive reads observed by the structural patch.
    pub(crate) structural_reads: Rc<Cell<usize>>,
}

impl MockEngine {
    pub(crate) fn new(boot_manager: Option<Vec<u8>>) -> Self {
        Self {
            boot_manager,
            extract_one_calls: Cell::new(0),
            extract_set_calls: Cell::new(0),
            last_extract: RefCell::new(None),
            aux_seen: RefCell::new(Vec::new()),
            structural_reads: Rc::new(Cell::new(0)),
        }
    }
}

impl WimEngine for MockEngine {
    fn structural_patch(&self) -> Patch {
        let reads = Rc::clone(&self.structural_reads);
        Box::new(move |_, _| reads.set(reads.get() + 1))
    }

    fn extract_one(
        &self,
        registry: &mut Registry,
        _archive: FileRef,
        index: u32,
        path: &str,
        output: &str,
    ) -> Option<FileRef> {
        self.extract_one_calls.set(self.extract_one_calls.get() + 1);
        *self.last_extract.borrow_mut() = Some((index, path.into(), output.into()));

        let data = self.boot_manager.clone()?;
        Some(registry.register(output, data.len() as u64, Box::new(StaticBytes(data))))
    }

    fn extract_set(
        &self,
        registry: &mut Registry,
        _archive: FileRef,
        _index: u32,
        paths: &[&str],
    ) {
        self.extract_set_calls.set(self.extract_set_calls.get() + 1);
        for path in paths {
            self.aux_seen.borrow_mut().push((*path).into());
            let name = path.rsplit('\\').next().unwrap_or(*path);
            registry.register(name, 0, Box::new(StaticBytes(Vec::new())));
        }
    }
}
