//! ELF64 header and program-header view.
//!
//! Layout (little-endian), only the fields the loader acts on:
//!   e_ident[0..4]   magic  0x7F 'E' 'L' 'F'
//!   e_ident[4]      class  (2 = 64-bit)
//!   16  e_type      u16    (2 = ET_EXEC)
//!   24  e_entry     u64
//!   32  e_phoff     u64
//!   54  e_phentsize u16
//!   56  e_phnum     u16
//!
//! Program header entry:
//!   0 p_type u32, 4 p_flags u32, 8 p_offset u64, 16 p_vaddr u64,
//!   32 p_filesz u64, 40 p_memsz u64
//!
//! Nothing here touches memory outside the image buffer; every read goes
//! through [`read_record`].

use core::fmt;

use bitflags::bitflags;
use zerocopy::byteorder::{LittleEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::config::MIN_PHDR_ENTRY_SIZE;
use crate::error::{BootError, FormatError};
use crate::record::read_record;

pub const ELF_MAGIC: [u8; 4] = *b"\x7FELF";
pub const ELFCLASS64: u8 = 2;
pub const ET_EXEC: u16 = 2;
pub const PT_LOAD: u32 = 1;

type Le16 = U16<LittleEndian>;
type Le32 = U32<LittleEndian>;
type Le64 = U64<LittleEndian>;

/// On-disk `Elf64_Ehdr`.
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub(crate) struct RawFileHeader {
    pub ident: [u8; 16],
    pub e_type: Le16,
    pub machine: Le16,
    pub version: Le32,
    pub entry: Le64,
    pub phoff: Le64,
    pub shoff: Le64,
    pub flags: Le32,
    pub ehsize: Le16,
    pub phentsize: Le16,
    pub phnum: Le16,
    pub shentsize: Le16,
    pub shnum: Le16,
    pub shstrndx: Le16,
}

/// On-disk `Elf64_Phdr`.
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub(crate) struct RawProgramHeader {
    pub p_type: Le32,
    pub flags: Le32,
    pub offset: Le64,
    pub vaddr: Le64,
    pub paddr: Le64,
    pub filesz: Le64,
    pub memsz: Le64,
    pub align: Le64,
}

bitflags! {
    /// `p_flags` permission bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        const EXECUTE = 1 << 0;
        const WRITE = 1 << 1;
        const READ = 1 << 2;
    }
}

impl fmt::Display for SegmentFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bit = |flag, c| if self.contains(flag) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            bit(Self::READ, 'R'),
            bit(Self::WRITE, 'W'),
            bit(Self::EXECUTE, 'X')
        )
    }
}

/// Validated ELF64 executable header. Plain values copied out of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutableHeader {
    pub machine: u16,
    pub entry: u64,
    pub phdr_offset: u64,
    pub phdr_entry_size: u16,
    pub phdr_count: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeaderEntry {
    pub index: u16,
    pub kind: u32,
    pub flags: SegmentFlags,
    pub file_offset: u64,
    pub vaddr: u64,
    pub file_size: u64,
    pub mem_size: u64,
}

impl ProgramHeaderEntry {
    #[inline]
    pub fn is_load(&self) -> bool {
        self.kind == PT_LOAD
    }
}

impl ExecutableHeader {
    /// Validate magic, class and object type, in that order.
    pub fn parse(image: &[u8]) -> Result<Self, BootError> {
        if image.len() < ELF_MAGIC.len() {
            return Err(FormatError::Truncated { offset: 0, len: 64 }.into());
        }
        if image[..4] != ELF_MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(&image[..4]);
            return Err(BootError::InvalidMagic { found });
        }

        let raw: &RawFileHeader = read_record(image, 0)?;
        let class = raw.ident[4];
        if class != ELFCLASS64 {
            return Err(FormatError::WordSize(class).into());
        }
        let object_type = raw.e_type.get();
        if object_type != ET_EXEC {
            return Err(FormatError::ObjectType(object_type).into());
        }

        Ok(Self {
            machine: raw.machine.get(),
            entry: raw.entry.get(),
            phdr_offset: raw.phoff.get(),
            phdr_entry_size: raw.phentsize.get(),
            phdr_count: raw.phnum.get(),
        })
    }

    /// Iterate the program-header table of `image`.
    ///
    /// Fails up front when entries are smaller than an ELF64 program header;
    /// each entry is then read with its own bounds check.
    pub fn program_headers<'a>(&self, image: &'a [u8]) -> Result<ProgramHeaders<'a>, FormatError> {
        if (self.phdr_entry_size as usize) < MIN_PHDR_ENTRY_SIZE {
            return Err(FormatError::ProgramHeaderTooSmall(self.phdr_entry_size));
        }
        Ok(ProgramHeaders {
            image,
            offset: self.phdr_offset,
            stride: self.phdr_entry_size as u64,
            count: self.phdr_count,
            next: 0,
        })
    }
}

pub struct ProgramHeaders<'a> {
    image: &'a [u8],
    offset: u64,
    stride: u64,
    count: u16,
    next: u16,
}

impl<'a> Iterator for ProgramHeaders<'a> {
    type Item = Result<ProgramHeaderEntry, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.count {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let at = (index as u64)
            .checked_mul(self.stride)
            .and_then(|rel| rel.checked_add(self.offset));
        let Some(at) = at else {
            self.next = self.count;
            return Some(Err(FormatError::Truncated {
                offset: self.offset,
                len: self.stride,
            }));
        };
        Some(read_record::<RawProgramHeader>(self.image, at).map(|raw| ProgramHeaderEntry {
            index,
            kind: raw.p_type.get(),
            flags: SegmentFlags::from_bits_truncate(raw.flags.get()),
            file_offset: raw.offset.get(),
            vaddr: raw.vaddr.get(),
            file_size: raw.filesz.get(),
            mem_size: raw.memsz.get(),
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.count - self.next) as usize;
        (left, Some(left))
    }
}
