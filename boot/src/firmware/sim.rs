//! Simulated firmware for host tests.
//!
//! Physical memory is a sparse byte map so tests can tell "written zero" from
//! "never touched". Pool memory is real host memory, because callers build
//! slices over it. Every allocation or free bumps the map key, and each
//! allocation grows the memory map by `growth_per_alloc` descriptors.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::{BTreeMap, HashMap};
use std::ptr::NonNull;

use uefi::{CStr16, Status};

use super::{FirmwareServices, MapInfo, MapKey, MapLayout};

pub const DESCRIPTOR_SIZE: usize = 48;
pub const KERNEL_PATH: &str = "\\KERNEL.ELF";

/// Size of `EFI_FILE_INFO` without the file name.
const FILE_INFO_HEADER: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    LocateFs,
    OpenVolume,
    Open,
    /// First (size discovery) `GetInfo` call.
    InfoProbe,
    /// Second (populating) `GetInfo` call.
    InfoFill,
    Read,
    /// The n-th pool allocation, counting from zero.
    Alloc(usize),
    MapProbe,
    MapFill,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOp {
    Zero { dest: u64, len: usize },
    Copy { dest: u64, len: usize },
}

#[derive(Debug)]
pub struct SimFile {
    id: usize,
    entry: Option<usize>,
    pos: usize,
}

#[derive(Debug, Default)]
pub struct SimFirmware {
    files: Vec<(String, Vec<u8>)>,
    faults: Vec<(Fault, Status)>,
    memory: BTreeMap<u64, u8>,
    pub mem_ops: Vec<MemOp>,
    /// Sizes of every pool allocation attempted, in order.
    pub alloc_requests: Vec<usize>,
    live: HashMap<usize, Layout>,
    pub frees: usize,
    open: Vec<usize>,
    next_handle: usize,
    pub opened_paths: Vec<String>,
    /// Overrides the file size reported by `GetInfo`.
    pub reported_size: Option<u64>,
    /// Caps the bytes returned by a single `Read`.
    pub short_read: Option<usize>,
    pub map_descriptors: usize,
    pub growth_per_alloc: usize,
    map_key: usize,
    pub map_queries: usize,
    pub exit_calls: usize,
    pub exited: bool,
}

impl SimFirmware {
    pub fn new() -> Self {
        Self {
            map_descriptors: 8,
            growth_per_alloc: 1,
            ..Self::default()
        }
    }

    pub fn with_kernel(image: Vec<u8>) -> Self {
        let mut fw = Self::new();
        fw.files.push((KERNEL_PATH.to_string(), image));
        fw
    }

    pub fn fail(mut self, fault: Fault, status: Status) -> Self {
        self.faults.push((fault, status));
        self
    }

    fn fault(&self, fault: Fault) -> Option<Status> {
        self.faults
            .iter()
            .find(|(f, _)| *f == fault)
            .map(|(_, s)| *s)
    }

    fn assert_live(&self) {
        assert!(!self.exited, "firmware used after ExitBootServices");
    }

    fn bump_map(&mut self) {
        self.map_key += 1;
    }

    fn new_handle(&mut self, entry: Option<usize>) -> SimFile {
        self.next_handle += 1;
        self.open.push(self.next_handle);
        SimFile { id: self.next_handle, entry, pos: 0 }
    }

    /// Bytes written at `addr..addr + len`, or `None` if any byte was never
    /// touched.
    pub fn read_phys(&self, addr: u64, len: usize) -> Option<Vec<u8>> {
        (0..len as u64)
            .map(|i| self.memory.get(&(addr + i)).copied())
            .collect()
    }

    pub fn phys_bytes_written(&self) -> usize {
        self.memory.len()
    }

    pub fn open_handles(&self) -> usize {
        self.open.len()
    }

    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    pub fn current_key(&self) -> MapKey {
        MapKey(self.map_key)
    }
}

impl FirmwareServices for SimFirmware {
    type FileSystem = ();
    type File = SimFile;

    fn locate_boot_filesystem(&mut self) -> uefi::Result<()> {
        self.assert_live();
        match self.fault(Fault::LocateFs) {
            Some(s) => Err(s.into()),
            None => Ok(()),
        }
    }

    fn open_volume(&mut self, _fs: &mut ()) -> uefi::Result<SimFile> {
        self.assert_live();
        if let Some(s) = self.fault(Fault::OpenVolume) {
            return Err(s.into());
        }
        Ok(self.new_handle(None))
    }

    fn open_read_only(&mut self, dir: &mut SimFile, path: &CStr16) -> uefi::Result<SimFile> {
        self.assert_live();
        assert!(dir.entry.is_none(), "open below a regular file");
        let path = path.to_string();
        self.opened_paths.push(path.clone());
        if let Some(s) = self.fault(Fault::Open) {
            return Err(s.into());
        }
        match self.files.iter().position(|(p, _)| *p == path) {
            Some(i) => Ok(self.new_handle(Some(i))),
            None => Err(Status::NOT_FOUND.into()),
        }
    }

    fn file_info(&mut self, file: &mut SimFile, buffer: &mut [u8]) -> uefi::Result<usize, Option<usize>> {
        self.assert_live();
        let fault = if buffer.is_empty() { Fault::InfoProbe } else { Fault::InfoFill };
        if let Some(s) = self.fault(fault) {
            return Err(uefi::Error::new(s, None));
        }
        let entry = file.entry.expect("GetInfo on directory");
        let (name, data) = &self.files[entry];
        let required = FILE_INFO_HEADER + (name.len() + 1) * 2;
        if buffer.len() < required {
            return Err(uefi::Error::new(Status::BUFFER_TOO_SMALL, Some(required)));
        }
        let size = self.reported_size.unwrap_or(data.len() as u64);
        buffer[..required].fill(0);
        buffer[0..8].copy_from_slice(&(required as u64).to_le_bytes());
        buffer[8..16].copy_from_slice(&size.to_le_bytes());
        buffer[16..24].copy_from_slice(&size.to_le_bytes());
        Ok(required)
    }

    fn read(&mut self, file: &mut SimFile, buffer: &mut [u8]) -> uefi::Result<usize> {
        self.assert_live();
        if let Some(s) = self.fault(Fault::Read) {
            return Err(s.into());
        }
        let data = &self.files[file.entry.expect("Read on directory")].1;
        let rest = &data[file.pos.min(data.len())..];
        let n = rest
            .len()
            .min(buffer.len())
            .min(self.short_read.unwrap_or(usize::MAX));
        buffer[..n].copy_from_slice(&rest[..n]);
        file.pos += n;
        Ok(n)
    }

    fn close(&mut self, file: SimFile) {
        self.assert_live();
        let idx = self
            .open
            .iter()
            .position(|&id| id == file.id)
            .expect("double close");
        self.open.remove(idx);
    }

    fn allocate_pool(&mut self, size: usize) -> uefi::Result<NonNull<u8>> {
        self.assert_live();
        let nth = self.alloc_requests.len();
        self.alloc_requests.push(size);
        if let Some(s) = self.fault(Fault::Alloc(nth)) {
            return Err(s.into());
        }
        let layout = Layout::from_size_align(size.max(1), 8).map_err(|_| Status::OUT_OF_RESOURCES)?;
        // SAFETY: non-zero size.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(Status::OUT_OF_RESOURCES)?;
        self.live.insert(ptr.as_ptr() as usize, layout);
        self.map_descriptors += self.growth_per_alloc;
        self.bump_map();
        Ok(ptr)
    }

    unsafe fn free_pool(&mut self, ptr: NonNull<u8>) {
        self.assert_live();
        let layout = self
            .live
            .remove(&(ptr.as_ptr() as usize))
            .expect("free of unknown pool pointer");
        dealloc(ptr.as_ptr(), layout);
        self.frees += 1;
        self.bump_map();
    }

    unsafe fn set_mem(&mut self, dest: u64, len: usize, value: u8) {
        self.assert_live();
        self.mem_ops.push(MemOp::Zero { dest, len });
        for i in 0..len as u64 {
            self.memory.insert(dest + i, value);
        }
    }

    unsafe fn copy_mem(&mut self, dest: u64, src: *const u8, len: usize) {
        self.assert_live();
        self.mem_ops.push(MemOp::Copy { dest, len });
        let src = std::slice::from_raw_parts(src, len);
        for (i, b) in src.iter().enumerate() {
            self.memory.insert(dest + i as u64, *b);
        }
    }

    fn memory_map(&mut self, buffer: &mut [u8]) -> uefi::Result<MapInfo, Option<MapLayout>> {
        self.assert_live();
        self.map_queries += 1;
        let fault = if buffer.is_empty() { Fault::MapProbe } else { Fault::MapFill };
        if let Some(s) = self.fault(fault) {
            return Err(uefi::Error::new(s, None));
        }
        let required = self.map_descriptors * DESCRIPTOR_SIZE;
        if buffer.len() < required {
            return Err(uefi::Error::new(
                Status::BUFFER_TOO_SMALL,
                Some(MapLayout { map_size: required, descriptor_size: DESCRIPTOR_SIZE }),
            ));
        }
        for (i, desc) in buffer[..required].chunks_exact_mut(DESCRIPTOR_SIZE).enumerate() {
            // Alternate conventional memory (7) and boot-services data (4).
            let ty: u32 = if i % 2 == 0 { 7 } else { 4 };
            desc.fill(0);
            desc[0..4].copy_from_slice(&ty.to_le_bytes());
            desc[8..16].copy_from_slice(&((i as u64) * 0x10_0000).to_le_bytes());
            desc[24..32].copy_from_slice(&0x100u64.to_le_bytes());
            desc[32..40].copy_from_slice(&0xFu64.to_le_bytes());
        }
        Ok(MapInfo {
            map_size: required,
            map_key: MapKey(self.map_key),
            descriptor_size: DESCRIPTOR_SIZE,
            descriptor_version: 1,
        })
    }

    unsafe fn exit_boot_services(&mut self, key: MapKey) -> uefi::Result {
        self.assert_live();
        self.exit_calls += 1;
        if let Some(s) = self.fault(Fault::Exit) {
            return Err(s.into());
        }
        if key != MapKey(self.map_key) {
            return Err(Status::INVALID_PARAMETER.into());
        }
        self.exited = true;
        Ok(())
    }
}
