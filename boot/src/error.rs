//! Boot failure taxonomy.
//!
//! Every failure is terminal for the boot attempt. A failed `GetMemoryMap` or
//! `ExitBootServices` call halts the machine, since the firmware state can no
//! longer be trusted to accept a return. Every other failure goes back to
//! firmware as a status, including running out of pool memory for the
//! memory-map buffer.

use core::fmt;
use uefi::Status;

/// Reasons an image is structurally unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// `EI_CLASS` is not ELFCLASS64.
    WordSize(u8),
    /// `e_type` is not ET_EXEC.
    ObjectType(u16),
    /// `e_phentsize` smaller than an ELF64 program header.
    ProgramHeaderTooSmall(u16),
    /// A fixed-offset read of `len` bytes at `offset` would leave the buffer.
    Truncated { offset: u64, len: u64 },
    /// Segment file range lies outside the image.
    SegmentOutOfImage { index: u16 },
    /// Segment claims more file bytes than memory bytes.
    SegmentSizeMismatch { index: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    ProtocolResolution(Status),
    VolumeOpen(Status),
    FileOpen(Status),
    SizeQuery(Status),
    OutOfMemory { requested: usize },
    ImageTooSmall { size: u64 },
    Read(Status),
    InvalidMagic { found: [u8; 4] },
    UnsupportedFormat(FormatError),
    MemoryMapQuery(Status),
    ServicesExit(Status),
}

impl BootError {
    /// Short label of the failing stage, used as log target and on console.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::ProtocolResolution(_) | Self::VolumeOpen(_) => "volume",
            Self::FileOpen(_) | Self::SizeQuery(_) | Self::Read(_) | Self::ImageTooSmall { .. } => {
                "acquire"
            }
            Self::OutOfMemory { .. } => "alloc",
            Self::InvalidMagic { .. } | Self::UnsupportedFormat(_) => "elf",
            Self::MemoryMapQuery(_) => "memmap",
            Self::ServicesExit(_) => "handoff",
        }
    }

    /// Status handed back to firmware for failures that return.
    pub fn status(&self) -> Status {
        match self {
            Self::OutOfMemory { .. } => Status::OUT_OF_RESOURCES,
            _ => Status::LOAD_ERROR,
        }
    }

    /// Status reported by the firmware call that failed, if any.
    pub fn firmware_status(&self) -> Option<Status> {
        match *self {
            Self::ProtocolResolution(s)
            | Self::VolumeOpen(s)
            | Self::FileOpen(s)
            | Self::SizeQuery(s)
            | Self::Read(s)
            | Self::MemoryMapQuery(s)
            | Self::ServicesExit(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this failure halts instead of returning to firmware.
    pub fn halts(&self) -> bool {
        matches!(self, Self::MemoryMapQuery(_) | Self::ServicesExit(_))
    }
}

impl From<FormatError> for BootError {
    fn from(e: FormatError) -> Self {
        Self::UnsupportedFormat(e)
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::WordSize(class) => write!(f, "not a 64-bit image (class {})", class),
            Self::ObjectType(ty) => write!(f, "not a static executable (e_type {})", ty),
            Self::ProgramHeaderTooSmall(size) => {
                write!(f, "program header entry size too small ({})", size)
            }
            Self::Truncated { offset, len } => {
                write!(f, "read of {} bytes at {:#x} exceeds image", len, offset)
            }
            Self::SegmentOutOfImage { index } => {
                write!(f, "segment {} file range exceeds image", index)
            }
            Self::SegmentSizeMismatch { index } => {
                write!(f, "segment {} filesz larger than memsz", index)
            }
        }
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtocolResolution(s) => write!(f, "boot file system protocol not found: {:?}", s),
            Self::VolumeOpen(s) => write!(f, "OpenVolume failed: {:?}", s),
            Self::FileOpen(s) => write!(f, "kernel open failed: {:?}", s),
            Self::SizeQuery(s) => write!(f, "kernel GetInfo failed: {:?}", s),
            Self::OutOfMemory { requested } => write!(f, "AllocatePool({}) failed", requested),
            Self::ImageTooSmall { size } => write!(f, "kernel image too small ({})", size),
            Self::Read(s) => write!(f, "kernel read failed: {:?}", s),
            Self::InvalidMagic { found } => write!(f, "kernel ELF magic {:02x?}", found),
            Self::UnsupportedFormat(e) => write!(f, "unsupported kernel format: {}", e),
            Self::MemoryMapQuery(s) => write!(f, "GetMemoryMap failed: {:?}", s),
            Self::ServicesExit(s) => write!(f, "ExitBootServices failed: {:?}", s),
        }
    }
}
