//! efi-kernel-shim: stage-2 UEFI loader for a static ELF64 kernel
//!
//! Pipeline, each stage fully succeeding before the next:
//! - `acquire`: read `\KERNEL.ELF` from the boot volume into pool memory
//! - `elf`: validate the ELF64 header (fixed-offset, bounds-checked reads)
//! - `loader`: zero-fill and copy every PT_LOAD segment to its physical address
//! - `memmap`: snapshot the firmware memory map as the last allocation
//! - `handoff`: exit boot services with that map key and jump to the entry
//!
//! Every stage talks to the firmware through [`firmware::FirmwareServices`],
//! which is what lets the whole flow run on the host against a simulated
//! firmware in tests.

#![cfg_attr(not(test), no_std)]

pub mod acquire;
pub mod boot;
pub mod config;
pub mod elf;
pub mod error;
pub mod firmware;
pub mod handoff;
pub mod loader;
pub mod memmap;
mod record;
pub mod ui;

pub use boot::prepare_handoff;
pub use config::BootConfig;
pub use error::{BootError, FormatError};
pub use firmware::FirmwareServices;
pub use handoff::Launch;
