//! Real firmware backend.
//!
//! Protocol lookup and file I/O go straight through the raw `r-efi` function
//! tables rather than `uefi`'s safe wrappers: the loader needs the exact
//! status of every call (the two-call size discovery depends on it), and
//! `ExitBootServices` has to be called with the map key the loader captured,
//! not one fetched behind its back.

use core::ffi::c_void;
use core::ptr::{null_mut, NonNull};

use r_efi::efi;
use r_efi::protocols::{file, loaded_image, simple_file_system};
use uefi::table::{Boot, SystemTable};
use uefi::{CStr16, Handle, Status};

use super::{FirmwareServices, MapInfo, MapKey, MapLayout};

pub struct UefiFirmware {
    image: efi::Handle,
    boot_services: NonNull<efi::BootServices>,
}

/// Open `EFI_FILE_PROTOCOL` instance.
pub struct RawFile(NonNull<file::Protocol>);

#[inline]
fn to_status(raw: efi::Status) -> Status {
    Status(raw.as_usize())
}

#[inline]
fn check(raw: efi::Status) -> uefi::Result {
    let status = to_status(raw);
    if status.is_success() {
        Ok(())
    } else {
        Err(status.into())
    }
}

impl UefiFirmware {
    /// # Safety
    /// `st` must be the system table passed to the image entry point, with
    /// boot services still active.
    pub unsafe fn new(image: Handle, st: &SystemTable<Boot>) -> Self {
        let raw = st.as_ptr() as *const efi::SystemTable;
        Self {
            image: image.as_ptr(),
            boot_services: NonNull::new_unchecked((*raw).boot_services),
        }
    }

    #[inline]
    fn bs(&self) -> &efi::BootServices {
        // SAFETY: valid until ExitBootServices, after which `self` is consumed.
        unsafe { self.boot_services.as_ref() }
    }

    fn handle_protocol(&self, handle: efi::Handle, guid: &efi::Guid) -> uefi::Result<NonNull<c_void>> {
        let mut guid = *guid;
        let mut iface: *mut c_void = null_mut();
        check(unsafe { (self.bs().handle_protocol)(handle, &mut guid, &mut iface) })?;
        NonNull::new(iface).ok_or_else(|| Status::NOT_FOUND.into())
    }
}

impl FirmwareServices for UefiFirmware {
    type FileSystem = NonNull<simple_file_system::Protocol>;
    type File = RawFile;

    fn locate_boot_filesystem(&mut self) -> uefi::Result<Self::FileSystem> {
        let image = self
            .handle_protocol(self.image, &loaded_image::PROTOCOL_GUID)?
            .cast::<loaded_image::Protocol>();
        // SAFETY: firmware returned a live loaded-image protocol.
        let device = unsafe { image.as_ref().device_handle };
        Ok(self
            .handle_protocol(device, &simple_file_system::PROTOCOL_GUID)?
            .cast())
    }

    fn open_volume(&mut self, fs: &mut Self::FileSystem) -> uefi::Result<Self::File> {
        let mut root: *mut file::Protocol = null_mut();
        // SAFETY: `fs` came from locate_boot_filesystem.
        check(unsafe { (fs.as_ref().open_volume)(fs.as_ptr(), &mut root) })?;
        NonNull::new(root).map(RawFile).ok_or_else(|| Status::NOT_FOUND.into())
    }

    fn open_read_only(&mut self, dir: &mut Self::File, path: &CStr16) -> uefi::Result<Self::File> {
        let mut out: *mut file::Protocol = null_mut();
        let dir = dir.0;
        // SAFETY: `path` is NUL-terminated UCS-2; firmware only reads it.
        check(unsafe {
            (dir.as_ref().open)(
                dir.as_ptr(),
                &mut out,
                path.as_ptr() as *mut efi::Char16,
                file::MODE_READ,
                0,
            )
        })?;
        NonNull::new(out).map(RawFile).ok_or_else(|| Status::NOT_FOUND.into())
    }

    fn file_info(&mut self, file: &mut Self::File, buffer: &mut [u8]) -> uefi::Result<usize, Option<usize>> {
        let mut guid = file::INFO_ID;
        let mut size = buffer.len();
        let out = if buffer.is_empty() {
            null_mut()
        } else {
            buffer.as_mut_ptr().cast::<c_void>()
        };
        let f = file.0;
        let status = to_status(unsafe { (f.as_ref().get_info)(f.as_ptr(), &mut guid, &mut size, out) });
        match status {
            Status::SUCCESS => Ok(size),
            Status::BUFFER_TOO_SMALL => Err(uefi::Error::new(status, Some(size))),
            _ => Err(uefi::Error::new(status, None)),
        }
    }

    fn read(&mut self, file: &mut Self::File, buffer: &mut [u8]) -> uefi::Result<usize> {
        let mut size = buffer.len();
        let f = file.0;
        check(unsafe { (f.as_ref().read)(f.as_ptr(), &mut size, buffer.as_mut_ptr().cast()) })?;
        Ok(size)
    }

    fn close(&mut self, file: Self::File) {
        let f = file.0;
        // Close cannot meaningfully fail for a read-only handle.
        let _ = unsafe { (f.as_ref().close)(f.as_ptr()) };
    }

    fn allocate_pool(&mut self, size: usize) -> uefi::Result<NonNull<u8>> {
        let mut out: *mut c_void = null_mut();
        check(unsafe { (self.bs().allocate_pool)(efi::LOADER_DATA, size, &mut out) })?;
        NonNull::new(out.cast()).ok_or_else(|| Status::OUT_OF_RESOURCES.into())
    }

    unsafe fn free_pool(&mut self, ptr: NonNull<u8>) {
        let _ = (self.bs().free_pool)(ptr.as_ptr().cast());
    }

    unsafe fn set_mem(&mut self, dest: u64, len: usize, value: u8) {
        (self.bs().set_mem)(dest as usize as *mut c_void, len, value);
    }

    unsafe fn copy_mem(&mut self, dest: u64, src: *const u8, len: usize) {
        (self.bs().copy_mem)(dest as usize as *mut c_void, src as *mut c_void, len);
    }

    fn memory_map(&mut self, buffer: &mut [u8]) -> uefi::Result<MapInfo, Option<MapLayout>> {
        let mut map_size = buffer.len();
        let mut map_key = 0usize;
        let mut descriptor_size = 0usize;
        let mut descriptor_version = 0u32;
        let out = if buffer.is_empty() {
            null_mut()
        } else {
            buffer.as_mut_ptr().cast::<efi::MemoryDescriptor>()
        };
        let status = to_status(unsafe {
            (self.bs().get_memory_map)(
                &mut map_size,
                out,
                &mut map_key,
                &mut descriptor_size,
                &mut descriptor_version,
            )
        });
        match status {
            Status::SUCCESS => Ok(MapInfo {
                map_size,
                map_key: MapKey(map_key),
                descriptor_size,
                descriptor_version,
            }),
            Status::BUFFER_TOO_SMALL => Err(uefi::Error::new(
                status,
                Some(MapLayout { map_size, descriptor_size }),
            )),
            _ => Err(uefi::Error::new(status, None)),
        }
    }

    unsafe fn exit_boot_services(&mut self, key: MapKey) -> uefi::Result {
        check((self.bs().exit_boot_services)(self.image, key.0))
    }
}
