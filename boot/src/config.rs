//! Build-time boot configuration.
//!
//! There is no configuration file: the shim runs before anything could parse
//! one. Knobs are constants plus the `logging` / `verbose` Cargo features.

use log::LevelFilter;
use uefi::{cstr16, CStr16};

/// Size of an ELF64 file header. Images shorter than this are rejected.
pub const MIN_IMAGE_SIZE: usize = 64;

/// Size of an ELF64 program header entry.
pub const MIN_PHDR_ENTRY_SIZE: usize = 56;

/// Extra descriptors reserved in the memory-map buffer, absorbing the growth
/// caused by allocating the buffer itself.
pub const MEMORY_MAP_SLACK_DESCRIPTORS: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct BootConfig {
    /// Kernel image path, relative to the root of the boot volume.
    pub kernel_path: &'static CStr16,
    pub map_slack_descriptors: usize,
    pub log_level: LevelFilter,
}

impl BootConfig {
    fn feature_log_level() -> LevelFilter {
        if cfg!(feature = "verbose") {
            LevelFilter::Debug
        } else if cfg!(feature = "logging") {
            LevelFilter::Info
        } else {
            LevelFilter::Off
        }
    }
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            kernel_path: cstr16!("\\KERNEL.ELF"),
            map_slack_descriptors: MEMORY_MAP_SLACK_DESCRIPTORS,
            log_level: Self::feature_log_level(),
        }
    }
}
