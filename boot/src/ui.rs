//! Console output on the firmware text console.
//!
//! Nothing is printed between the memory-map snapshot and the exit call. The
//! failure block is shown for every failed boot; after a failed
//! `ExitBootServices` writing it is best effort.

use core::fmt::{self, Write};

use uefi::proto::console::text::Color;
use uefi::table::{Boot, SystemTable};

use crate::error::BootError;

const RULE: &str = "----------------------------------------------------------------";

fn write_banner<W: Write>(out: &mut W) -> fmt::Result {
    write!(out, "\r\n{}\r\n", RULE)?;
    write!(
        out,
        "  efi-kernel-shim {} :: load ELF64 kernel, exit boot services, jump\r\n",
        env!("CARGO_PKG_VERSION")
    )?;
    write!(out, "{}\r\n", RULE)
}

/// Failure block shown before returning to firmware.
pub fn write_failure<W: Write>(out: &mut W, err: &BootError) -> fmt::Result {
    write!(out, "\r\n{}\r\n", RULE)?;
    write!(out, "[!] boot failed at {}: {}\r\n", err.stage(), err)?;
    if let Some(status) = err.firmware_status() {
        write!(out, "    firmware status: {:?}\r\n", status)?;
    }
    if err.halts() {
        write!(out, "    system halted\r\n")?;
    } else {
        write!(out, "    returning {:?} to firmware\r\n", err.status())?;
    }
    write!(out, "{}\r\n", RULE)
}

pub fn draw_boot_banner(st: &mut SystemTable<Boot>) {
    let out = st.stdout();
    let _ = out.set_color(Color::LightCyan, Color::Black);
    let _ = write_banner(out);
    let _ = out.set_color(Color::LightGray, Color::Black);
}

pub fn display_failure(st: &mut SystemTable<Boot>, err: &BootError) {
    let out = st.stdout();
    let _ = out.set_color(Color::Red, Color::Black);
    let _ = write_failure(out, err);
    let _ = out.set_color(Color::LightGray, Color::Black);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormatError;
    use uefi::Status;

    #[test]
    fn banner_names_the_shim() {
        let mut s = String::new();
        write_banner(&mut s).unwrap();
        assert!(s.contains("efi-kernel-shim"));
        assert!(s.ends_with("\r\n"));
    }

    #[test]
    fn returning_failure_shows_status() {
        let mut s = String::new();
        write_failure(&mut s, &BootError::FileOpen(Status::NOT_FOUND)).unwrap();
        assert!(s.contains("boot failed at acquire"));
        assert!(s.contains("NOT_FOUND"));
        assert!(s.contains("returning LOAD_ERROR"));
    }

    #[test]
    fn halting_failure_says_so() {
        let mut s = String::new();
        write_failure(&mut s, &BootError::ServicesExit(Status::INVALID_PARAMETER)).unwrap();
        assert!(s.contains("system halted"));
        assert!(!s.contains("returning"));
    }

    #[test]
    fn format_failure_has_no_firmware_status() {
        let mut s = String::new();
        let err = BootError::UnsupportedFormat(FormatError::WordSize(1));
        write_failure(&mut s, &err).unwrap();
        assert!(s.contains("boot failed at elf"));
        assert!(!s.contains("firmware status"));
    }
}
