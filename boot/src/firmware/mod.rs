//! Firmware capability surface.
//!
//! The shim never reaches for a global system table. Each stage receives a
//! [`FirmwareServices`] value that enumerates exactly the boot-service calls
//! the loader needs. Results follow `uefi`'s convention: an undersized buffer
//! comes back as `BUFFER_TOO_SMALL` with the required size as error data.

use core::ptr::NonNull;
use uefi::CStr16;

pub mod uefi_fw;

#[cfg(test)]
pub mod sim;

pub use uefi_fw::UefiFirmware;

/// Validity token of a memory-map snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapKey(pub usize);

/// Sizes reported by an undersized `GetMemoryMap` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapLayout {
    pub map_size: usize,
    pub descriptor_size: usize,
}

/// Metadata of a populated memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapInfo {
    pub map_size: usize,
    pub map_key: MapKey,
    pub descriptor_size: usize,
    pub descriptor_version: u32,
}

pub trait FirmwareServices {
    /// Simple-file-system protocol instance of the boot volume.
    type FileSystem;
    /// Open `EFI_FILE_PROTOCOL` handle, directory or regular file.
    type File;

    /// Resolve the file system the running image was loaded from.
    fn locate_boot_filesystem(&mut self) -> uefi::Result<Self::FileSystem>;

    /// Open the root directory of `fs`.
    fn open_volume(&mut self, fs: &mut Self::FileSystem) -> uefi::Result<Self::File>;

    /// Open `path` below `dir` in read-only mode.
    fn open_read_only(&mut self, dir: &mut Self::File, path: &CStr16) -> uefi::Result<Self::File>;

    /// Raw `EFI_FILE_INFO` query into `buffer`, returning the bytes written.
    fn file_info(&mut self, file: &mut Self::File, buffer: &mut [u8]) -> uefi::Result<usize, Option<usize>>;

    /// Read from the current position, returning the bytes read.
    fn read(&mut self, file: &mut Self::File, buffer: &mut [u8]) -> uefi::Result<usize>;

    fn close(&mut self, file: Self::File);

    /// Allocate `size` bytes of loader-data pool memory.
    fn allocate_pool(&mut self, size: usize) -> uefi::Result<NonNull<u8>>;

    /// # Safety
    /// `ptr` must come from [`allocate_pool`](Self::allocate_pool) and not be
    /// used afterwards.
    unsafe fn free_pool(&mut self, ptr: NonNull<u8>);

    /// Fill `len` bytes of physical memory at `dest` with `value`.
    ///
    /// # Safety
    /// `dest..dest + len` must be identity-mapped memory nothing else owns.
    unsafe fn set_mem(&mut self, dest: u64, len: usize, value: u8);

    /// Copy `len` bytes from `src` to physical address `dest`.
    ///
    /// # Safety
    /// As for [`set_mem`](Self::set_mem); `src` must be valid for `len` reads.
    unsafe fn copy_mem(&mut self, dest: u64, src: *const u8, len: usize);

    /// `GetMemoryMap` into `buffer`.
    fn memory_map(&mut self, buffer: &mut [u8]) -> uefi::Result<MapInfo, Option<MapLayout>>;

    /// `ExitBootServices` for the running image.
    ///
    /// # Safety
    /// On success every other method of this trait becomes invalid.
    unsafe fn exit_boot_services(&mut self, key: MapKey) -> uefi::Result;
}

impl<F: FirmwareServices + ?Sized> FirmwareServices for &mut F {
    type FileSystem = F::FileSystem;
    type File = F::File;

    fn locate_boot_filesystem(&mut self) -> uefi::Result<Self::FileSystem> {
        (**self).locate_boot_filesystem()
    }

    fn open_volume(&mut self, fs: &mut Self::FileSystem) -> uefi::Result<Self::File> {
        (**self).open_volume(fs)
    }

    fn open_read_only(&mut self, dir: &mut Self::File, path: &CStr16) -> uefi::Result<Self::File> {
        (**self).open_read_only(dir, path)
    }

    fn file_info(&mut self, file: &mut Self::File, buffer: &mut [u8]) -> uefi::Result<usize, Option<usize>> {
        (**self).file_info(file, buffer)
    }

    fn read(&mut self, file: &mut Self::File, buffer: &mut [u8]) -> uefi::Result<usize> {
        (**self).read(file, buffer)
    }

    fn close(&mut self, file: Self::File) {
        (**self).close(file)
    }

    fn allocate_pool(&mut self, size: usize) -> uefi::Result<NonNull<u8>> {
        (**self).allocate_pool(size)
    }

    unsafe fn free_pool(&mut self, ptr: NonNull<u8>) {
        (**self).free_pool(ptr)
    }

    unsafe fn set_mem(&mut self, dest: u64, len: usize, value: u8) {
        (**self).set_mem(dest, len, value)
    }

    unsafe fn copy_mem(&mut self, dest: u64, src: *const u8, len: usize) {
        (**self).copy_mem(dest, src, len)
    }

    fn memory_map(&mut self, buffer: &mut [u8]) -> uefi::Result<MapInfo, Option<MapLayout>> {
        (**self).memory_map(buffer)
    }

    unsafe fn exit_boot_services(&mut self, key: MapKey) -> uefi::Result {
        (**self).exit_boot_services(key)
    }
}
