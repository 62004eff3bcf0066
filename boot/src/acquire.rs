//! Kernel image acquisition from the boot volume.
//!
//! Pure I/O: the file is read verbatim into pool memory, nothing about its
//! format is interpreted here. Handles are closed on every path, and pool
//! memory is returned on every failure path.

use core::ptr::{self, NonNull};
use core::slice;

use log::{debug, info};
use uefi::{CStr16, Status};
use zerocopy::byteorder::{LittleEndian, U64};
use zerocopy::{FromBytes, Unaligned};

use crate::config::MIN_IMAGE_SIZE;
use crate::error::BootError;
use crate::firmware::FirmwareServices;
use crate::record::read_record;

/// Fixed prefix of `EFI_FILE_INFO`.
#[allow(dead_code)]
#[derive(FromBytes, Unaligned)]
#[repr(C)]
struct RawFileInfo {
    size: U64<LittleEndian>,
    file_size: U64<LittleEndian>,
    physical_size: U64<LittleEndian>,
}

/// The raw kernel file, held in firmware pool memory.
///
/// There is deliberately no `Drop`: the buffer either goes back to firmware
/// through [`release`](Self::release) or is handed to the kernel through
/// [`into_raw_parts`](Self::into_raw_parts) and never reclaimed here.
#[must_use]
#[derive(Debug)]
pub struct ImageBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

impl ImageBuffer {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `ptr` is a live pool allocation of at least `len` initialised
        // bytes, exclusively owned by `self`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Give the pool memory back to firmware.
    pub fn release<F: FirmwareServices>(self, fw: &mut F) {
        // SAFETY: allocated by `fw` in `acquire_image`; `self` is consumed.
        unsafe { fw.free_pool(self.ptr) }
    }

    /// Move the buffer out to the successor image.
    pub fn into_raw_parts(self) -> (NonNull<u8>, usize) {
        (self.ptr, self.len)
    }
}

/// Read the file at `path` on the boot volume into a fresh [`ImageBuffer`].
pub fn acquire_image<F: FirmwareServices>(fw: &mut F, path: &CStr16) -> Result<ImageBuffer, BootError> {
    let mut fs = fw
        .locate_boot_filesystem()
        .map_err(|e| BootError::ProtocolResolution(e.status()))?;
    debug!(target: "acquire", "found boot file system");

    let mut root = fw
        .open_volume(&mut fs)
        .map_err(|e| BootError::VolumeOpen(e.status()))?;
    debug!(target: "acquire", "opened file system root");

    let opened = fw.open_read_only(&mut root, path);
    fw.close(root);
    let mut file = opened.map_err(|e| BootError::FileOpen(e.status()))?;

    let image = read_file(fw, &mut file);
    fw.close(file);
    image
}

fn read_file<F: FirmwareServices>(fw: &mut F, file: &mut F::File) -> Result<ImageBuffer, BootError> {
    let size = file_size(fw, file)?;
    info!(target: "acquire", "found kernel, size {}", size);
    if size < MIN_IMAGE_SIZE as u64 {
        return Err(BootError::ImageTooSmall { size });
    }

    let len = usize::try_from(size).map_err(|_| BootError::OutOfMemory { requested: usize::MAX })?;
    let ptr = zeroed_pool(fw, len)?;
    // SAFETY: fresh, zeroed allocation of `len` bytes.
    let buffer = unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), len) };

    let read = match fw.read(file, buffer) {
        Ok(n) => n,
        Err(e) => {
            // SAFETY: allocated above, never exposed.
            unsafe { fw.free_pool(ptr) };
            return Err(BootError::Read(e.status()));
        }
    };
    if read < MIN_IMAGE_SIZE {
        // SAFETY: allocated above, never exposed.
        unsafe { fw.free_pool(ptr) };
        return Err(BootError::ImageTooSmall { size: read as u64 });
    }
    if read != len {
        debug!(target: "acquire", "short read: {} of {} bytes", read, len);
    }
    Ok(ImageBuffer { ptr, len: read })
}

/// Two-call `GetInfo`: probe for the record size, then fetch the record.
fn file_size<F: FirmwareServices>(fw: &mut F, file: &mut F::File) -> Result<u64, BootError> {
    let required = match fw.file_info(file, &mut []) {
        Err(e) if e.status() == Status::BUFFER_TOO_SMALL => {
            (*e.data()).ok_or(BootError::SizeQuery(Status::BUFFER_TOO_SMALL))?
        }
        Err(e) => return Err(BootError::SizeQuery(e.status())),
        // An empty buffer cannot hold the record; firmware is confused.
        Ok(_) => return Err(BootError::SizeQuery(Status::SUCCESS)),
    };

    let info = zeroed_pool(fw, required)?;
    // SAFETY: fresh, zeroed allocation of `required` bytes.
    let buffer = unsafe { slice::from_raw_parts_mut(info.as_ptr(), required) };
    let size = match fw.file_info(file, buffer) {
        Ok(_) => read_record::<RawFileInfo>(buffer, 0)
            .map(|record| record.file_size.get())
            .map_err(BootError::from),
        Err(e) => Err(BootError::SizeQuery(e.status())),
    };
    // SAFETY: `buffer` is not used past this point.
    unsafe { fw.free_pool(info) };
    size
}

fn zeroed_pool<F: FirmwareServices>(fw: &mut F, len: usize) -> Result<NonNull<u8>, BootError> {
    let ptr = fw
        .allocate_pool(len)
        .map_err(|_| BootError::OutOfMemory { requested: len })?;
    // SAFETY: firmware returned `len` writable bytes.
    unsafe { ptr::write_bytes(ptr.as_ptr(), 0, len) };
    Ok(ptr)
}
