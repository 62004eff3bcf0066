//! UEFI entry point of the shim.
//!
//! On a UEFI target this is the firmware-facing binary; on any other target
//! it only says so, which keeps `cargo test` on the host building the bin.

#![cfg_attr(target_os = "uefi", no_std, no_main)]

#[cfg(target_os = "uefi")]
mod efi {
    use log::{error, info};
    use uefi::prelude::*;

    use efi_kernel_shim::firmware::UefiFirmware;
    use efi_kernel_shim::{handoff, prepare_handoff, ui, BootConfig};

    #[entry]
    fn efi_main(image: Handle, mut st: SystemTable<Boot>) -> Status {
        if uefi_services::init(&mut st).is_err() {
            return Status::LOAD_ERROR;
        }
        let config = BootConfig::default();
        log::set_max_level(config.log_level);

        ui::draw_boot_banner(&mut st);
        info!(target: "boot", "loading {}", config.kernel_path);

        // SAFETY: `image` and `st` are the live pair handed to us by firmware.
        let fw = unsafe { UefiFirmware::new(image, &st) };
        match prepare_handoff(fw, &config) {
            // SAFETY: boot services are gone and the entry lies in a placed segment.
            Ok(launch) => unsafe { launch.enter() },
            Err(err) => {
                if !err.halts() {
                    error!(target: err.stage(), "{}", err);
                }
                ui::display_failure(&mut st, &err);
                if err.halts() {
                    handoff::halt();
                }
                err.status()
            }
        }
    }
}

#[cfg(not(target_os = "uefi"))]
fn main() {
    eprintln!("efi-kernel-shim only runs as a UEFI application (build for x86_64-unknown-uefi)");
}
