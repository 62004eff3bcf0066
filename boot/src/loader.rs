//! PT_LOAD placement.
//!
//! Each loadable segment is zero-filled for `p_memsz` bytes at `p_vaddr`, then
//! `p_filesz` bytes are copied over the start of it. No relocation: firmware
//! runs identity-mapped, so the link address is used as a physical address.
//! The kernel sets up its own paging after the handoff.

use core::ops::Range;

use log::{debug, info};

use crate::elf::{ExecutableHeader, ProgramHeaderEntry};
use crate::error::{BootError, FormatError};
use crate::firmware::FirmwareServices;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub segments: usize,
    pub bytes_copied: u64,
    pub bytes_zeroed: u64,
}

/// Where one segment goes and where its file bytes come from.
struct Placement {
    dest: u64,
    mem_len: usize,
    src: Range<usize>,
}

fn placement(ph: &ProgramHeaderEntry, image_len: usize) -> Result<Placement, FormatError> {
    let index = ph.index;
    if ph.file_size > ph.mem_size {
        return Err(FormatError::SegmentSizeMismatch { index });
    }
    let out_of_image = FormatError::SegmentOutOfImage { index };

    // An empty file range reads nothing, so its offset is irrelevant.
    let src = if ph.file_size == 0 {
        0..0
    } else {
        let start = usize::try_from(ph.file_offset).map_err(|_| out_of_image)?;
        let len = usize::try_from(ph.file_size).map_err(|_| out_of_image)?;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= image_len)
            .ok_or(out_of_image)?;
        start..end
    };
    let mem_len = usize::try_from(ph.mem_size).map_err(|_| out_of_image)?;
    ph.vaddr.checked_add(ph.mem_size).ok_or(out_of_image)?;

    Ok(Placement {
        dest: ph.vaddr,
        mem_len,
        src,
    })
}

/// Place every PT_LOAD segment of `image` in physical memory.
///
/// The whole program-header table is validated first, so a malformed image
/// is rejected without a single byte written.
pub fn load_segments<F: FirmwareServices>(
    fw: &mut F,
    image: &[u8],
    header: &ExecutableHeader,
) -> Result<LoadSummary, BootError> {
    info!(
        target: "loader",
        "PHDR: offset {} entry size {} count {}",
        header.phdr_offset, header.phdr_entry_size, header.phdr_count
    );

    for ph in header.program_headers(image)? {
        let ph = ph?;
        if ph.is_load() {
            placement(&ph, image.len())?;
        }
    }

    let mut summary = LoadSummary::default();
    for ph in header.program_headers(image)? {
        let ph = ph?;
        if !ph.is_load() {
            debug!(target: "loader", "skipping phdr {} (type {:#x})", ph.index, ph.kind);
            continue;
        }
        let seg = placement(&ph, image.len())?;
        info!(
            target: "loader",
            "PT_LOAD: off {:#x} vaddr {:#x} filesz {:#x} memsz {:#x} {}",
            ph.file_offset, ph.vaddr, ph.file_size, ph.mem_size, ph.flags
        );

        let file_bytes = &image[seg.src];
        // SAFETY: identity-mapped firmware environment; the kernel was linked
        // to own these addresses and nothing after this stage reuses them.
        unsafe {
            fw.set_mem(seg.dest, seg.mem_len, 0);
            if !file_bytes.is_empty() {
                fw.copy_mem(seg.dest, file_bytes.as_ptr(), file_bytes.len());
            }
        }

        summary.segments += 1;
        summary.bytes_zeroed += ph.mem_size;
        summary.bytes_copied += ph.file_size;
    }
    Ok(summary)
}
