//! The boot flow, start to just-before-the-jump.

use log::info;

use crate::acquire::{acquire_image, ImageBuffer};
use crate::config::BootConfig;
use crate::elf::ExecutableHeader;
use crate::error::BootError;
use crate::firmware::FirmwareServices;
use crate::handoff::{self, Launch};
use crate::loader::{load_segments, LoadSummary};
use crate::memmap;

/// A kernel whose segments are in place, still waiting for the handoff.
#[derive(Debug)]
pub struct LoadedKernel {
    pub image: ImageBuffer,
    pub header: ExecutableHeader,
    pub summary: LoadSummary,
}

/// Read, validate and place the kernel. On failure the image buffer goes
/// back to firmware.
pub fn load_kernel<F: FirmwareServices>(fw: &mut F, config: &BootConfig) -> Result<LoadedKernel, BootError> {
    let image = acquire_image(fw, config.kernel_path)?;

    let staged = ExecutableHeader::parse(image.as_bytes()).and_then(|header| {
        info!(target: "elf", "kernel entry point: {:#x}", header.entry);
        load_segments(fw, image.as_bytes(), &header).map(|summary| (header, summary))
    });

    match staged {
        Ok((header, summary)) => Ok(LoadedKernel { image, header, summary }),
        Err(e) => {
            image.release(fw);
            Err(e)
        }
    }
}

/// Run the whole pipeline up to, not including, the jump.
///
/// Consumes the firmware: on success boot services have been exited.
pub fn prepare_handoff<F: FirmwareServices>(mut fw: F, config: &BootConfig) -> Result<Launch, BootError> {
    let kernel = load_kernel(&mut fw, config)?;
    info!(
        target: "boot",
        "{} segment(s) loaded; exiting boot services and jumping to entry {:#x}",
        kernel.summary.segments, kernel.header.entry
    );

    // Last allocation before exit. Nothing may log or allocate past here.
    let snapshot = memmap::capture(&mut fw, config.map_slack_descriptors)?;
    handoff::exit_boot_services(fw, snapshot, kernel.image, kernel.header.entry)
}
