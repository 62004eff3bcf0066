//! Boot handoff: exit boot services, then enter the kernel.
//!
//! # Kernel entry contract
//! The kernel entry point is called once, never returns, and receives exactly
//! five arguments in the System V order:
//!
//! | reg | value                                 |
//! |-----|---------------------------------------|
//! | rdi | memory-map size in bytes              |
//! | rsi | memory-map descriptor stride          |
//! | rdx | kernel image size in bytes            |
//! | rcx | pointer to the memory map             |
//! | r8  | pointer to the raw kernel image       |
//!
//! Both buffers are loader-data pool memory that now belongs to the kernel.
//! No other context is passed; boot services are gone by the time it runs.

use log::error;

use crate::acquire::ImageBuffer;
use crate::error::BootError;
use crate::firmware::FirmwareServices;
use crate::memmap::MemoryMapSnapshot;

#[cfg(target_arch = "x86_64")]
pub type KernelEntry = extern "sysv64" fn(u64, u64, u64, *mut u8, *mut u8) -> !;
#[cfg(not(target_arch = "x86_64"))]
pub type KernelEntry = extern "C" fn(u64, u64, u64, *mut u8, *mut u8) -> !;

/// Arguments of the kernel entry call, in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryArgs {
    pub memory_map_size: u64,
    pub descriptor_size: u64,
    pub image_size: u64,
    pub memory_map: *mut u8,
    pub image: *mut u8,
}

/// Everything needed to jump, once boot services are gone.
#[derive(Debug)]
pub struct Launch {
    entry: u64,
    args: EntryArgs,
}

impl Launch {
    #[inline]
    pub fn entry(&self) -> u64 {
        self.entry
    }

    #[inline]
    pub fn args(&self) -> &EntryArgs {
        &self.args
    }

    /// Transfer control to the kernel.
    ///
    /// # Safety
    /// Boot services must have been exited and `entry` must point into a
    /// segment placed by the loader.
    pub unsafe fn enter(self) -> ! {
        let entry: KernelEntry = core::mem::transmute(self.entry as usize);
        let a = self.args;
        entry(a.memory_map_size, a.descriptor_size, a.image_size, a.memory_map, a.image)
    }
}

/// Exit boot services with the snapshot's key.
///
/// Takes the firmware by value: after this call, successful or not, no
/// firmware service is reachable through it. The image and map buffers move
/// into the returned [`Launch`]; on failure they are simply abandoned, since
/// the caller halts.
pub fn exit_boot_services<F: FirmwareServices>(
    mut fw: F,
    snapshot: MemoryMapSnapshot,
    image: ImageBuffer,
    entry: u64,
) -> Result<Launch, BootError> {
    // SAFETY: `fw` is consumed, so nothing can call into boot services after
    // a successful exit.
    if let Err(e) = unsafe { fw.exit_boot_services(snapshot.key()) } {
        error!(target: "handoff", "ExitBootServices failed: {:?}", e.status());
        return Err(BootError::ServicesExit(e.status()));
    }

    let (map, info) = snapshot.into_raw_parts();
    let (image, image_size) = image.into_raw_parts();
    Ok(Launch {
        entry,
        args: EntryArgs {
            memory_map_size: info.map_size as u64,
            descriptor_size: info.descriptor_size as u64,
            image_size: image_size as u64,
            memory_map: map.as_ptr(),
            image: image.as_ptr(),
        },
    })
}

/// Park the CPU for good.
pub fn halt() -> ! {
    loop {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: `hlt` only waits for the next interrupt.
        unsafe {
            core::arch::asm!("hlt", options(nomem, nostack, preserves_flags));
        }
        #[cfg(not(target_arch = "x86_64"))]
        core::hint::spin_loop();
    }
}
