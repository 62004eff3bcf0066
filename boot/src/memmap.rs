//! Memory-map snapshot taken right before `ExitBootServices`.
//!
//! Probe for the size, allocate with slack, then populate. The allocation is
//! the last one this shim makes: any later allocation changes the map and
//! stales the key, so callers must not log or allocate between [`capture`] and
//! the exit call.

use core::ptr::{self, NonNull};
use core::slice;

use log::debug;
use uefi::Status;

use crate::error::BootError;
use crate::firmware::{FirmwareServices, MapInfo, MapKey, MapLayout};

/// Firmware memory map plus the key that validates it.
///
/// Like [`ImageBuffer`](crate::acquire::ImageBuffer) the buffer is never freed
/// here; it is passed to the kernel by pointer.
#[must_use]
#[derive(Debug)]
pub struct MemoryMapSnapshot {
    buffer: NonNull<u8>,
    capacity: usize,
    info: MapInfo,
}

impl MemoryMapSnapshot {
    #[inline]
    pub fn key(&self) -> MapKey {
        self.info.map_key
    }

    /// Bytes of descriptors actually written by firmware.
    #[inline]
    pub fn map_size(&self) -> usize {
        self.info.map_size
    }

    #[inline]
    pub fn descriptor_size(&self) -> usize {
        self.info.descriptor_size
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        let len = self.info.map_size.min(self.capacity);
        // SAFETY: live pool allocation of `capacity` zero-initialised bytes.
        unsafe { slice::from_raw_parts(self.buffer.as_ptr(), len) }
    }

    /// Move the map out to the successor image.
    pub fn into_raw_parts(self) -> (NonNull<u8>, MapInfo) {
        (self.buffer, self.info)
    }
}

/// Probe, allocate with `slack_descriptors` spare entries, populate.
pub fn capture<F: FirmwareServices>(fw: &mut F, slack_descriptors: usize) -> Result<MemoryMapSnapshot, BootError> {
    let layout = match fw.memory_map(&mut []) {
        Err(e) if e.status() == Status::BUFFER_TOO_SMALL => {
            (*e.data()).ok_or(BootError::MemoryMapQuery(Status::BUFFER_TOO_SMALL))?
        }
        // An empty map still needs a buffer for the populate call.
        Ok(info) => MapLayout {
            map_size: info.map_size,
            descriptor_size: info.descriptor_size,
        },
        Err(e) => return Err(BootError::MemoryMapQuery(e.status())),
    };

    let capacity = slack_descriptors
        .checked_mul(layout.descriptor_size)
        .and_then(|slack| slack.checked_add(layout.map_size))
        .ok_or(BootError::OutOfMemory { requested: usize::MAX })?;
    // Last log record before the exit call; see the module docs.
    debug!(
        target: "memmap",
        "memory map: {} bytes, descriptor stride {}, buffer {} bytes",
        layout.map_size, layout.descriptor_size, capacity
    );
    let buffer = fw
        .allocate_pool(capacity)
        .map_err(|_| BootError::OutOfMemory { requested: capacity })?;
    // SAFETY: firmware returned `capacity` writable bytes, owned from here on.
    let bytes = unsafe {
        ptr::write_bytes(buffer.as_ptr(), 0, capacity);
        slice::from_raw_parts_mut(buffer.as_ptr(), capacity)
    };

    let info = fw
        .memory_map(bytes)
        .map_err(|e| BootError::MemoryMapQuery(e.status()))?;
    Ok(MemoryMapSnapshot { buffer, capacity, info })
}
