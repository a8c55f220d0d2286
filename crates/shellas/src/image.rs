//! Tracee executable-image inspection.
//!
//! The driver needs the address of the first instruction that belongs to the
//! new binary itself, the one the dynamic linker jumps to when resolution is
//! done. The ELF header of `/proc/<pid>/exe` declares it; for
//! position-independent executables the kernel's non-randomized load base is
//! added on top. The bases below are only valid because the tracer disables
//! address-space layout randomization in the child before exec.

use std::fs::File;
use std::io::{self, Read};

use goblin::elf::header::{
    self, EI_CLASS, ELFCLASS32, ELFCLASS64, EM_ARM, ET_DYN,
};
use goblin::elf::Elf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("read /proc/{pid}/exe: {source}")]
    Read { pid: i32, source: io::Error },

    #[error("parse ELF header of /proc/{pid}/exe: {message}")]
    Parse { pid: i32, message: String },
}

/// Effective entry address of the tracee's binary under disabled ASLR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    pub address: u64,
    /// 32-bit ARM only: the entry executes in ARM (wide) mode rather than
    /// thumb. The driver cannot inject into wide-mode entry points.
    pub wide_mode: bool,
}

// Fixed load bases the kernel picks for PIE binaries when randomization is
// disabled, per family and word size.
#[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
const PIE_BASE_32: u64 = 0xAAAA_A000;
#[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
const PIE_BASE_64: u64 = 0x55_5555_5000;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
const PIE_BASE_32: u64 = 0x5655_5000;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
const PIE_BASE_64: u64 = 0x5555_5555_4000;

/// Computes the effective entry point of the binary `pid` is executing.
pub fn entry_point(pid: i32) -> Result<EntryPoint, ImageError> {
    let mut prefix = [0u8; header::header64::SIZEOF_EHDR];
    let mut file = File::open(format!("/proc/{pid}/exe"))
        .map_err(|source| ImageError::Read { pid, source })?;
    file.read_exact(&mut prefix)
        .map_err(|source| ImageError::Read { pid, source })?;
    parse_entry(pid, &prefix)
}

fn parse_entry(pid: i32, prefix: &[u8]) -> Result<EntryPoint, ImageError> {
    let hdr = Elf::parse_header(prefix).map_err(|err| ImageError::Parse {
        pid,
        message: err.to_string(),
    })?;

    let base = match hdr.e_ident[EI_CLASS] {
        ELFCLASS32 => PIE_BASE_32,
        ELFCLASS64 => PIE_BASE_64,
        other => {
            return Err(ImageError::Parse {
                pid,
                message: format!("unsupported ELF class {other}"),
            });
        }
    };

    let mut address = hdr.e_entry;
    if hdr.e_type == ET_DYN {
        address += base;
    }

    // On 32-bit ARM the low entry bit selects the instruction set: 1 is
    // thumb, 0 is ARM.
    let mut wide_mode = false;
    if hdr.e_machine == EM_ARM {
        wide_mode = address & 1 == 0;
        address &= !1;
    }

    Ok(EntryPoint { address, wide_mode })
}

#[cfg(test)]
mod tests {
    use super::*;
    use goblin::elf::header::{header32, EM_X86_64, ET_EXEC};

    /// Builds a 64-byte buffer holding a 32-bit ELF header.
    fn elf32_header(e_type: u16, e_machine: u16, e_entry: u32) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..4].copy_from_slice(&header::ELFMAG[..]);
        bytes[EI_CLASS] = ELFCLASS32;
        bytes[header::EI_DATA] = header::ELFDATA2LSB;
        bytes[header::EI_VERSION] = 1;
        bytes[16..18].copy_from_slice(&e_type.to_le_bytes());
        bytes[18..20].copy_from_slice(&e_machine.to_le_bytes());
        bytes[20..24].copy_from_slice(&1u32.to_le_bytes());
        bytes[24..28].copy_from_slice(&e_entry.to_le_bytes());
        bytes[40..42].copy_from_slice(&(header32::SIZEOF_EHDR as u16).to_le_bytes());
        bytes
    }

    #[test]
    fn fixed_executable_uses_header_entry() {
        let bytes = elf32_header(ET_EXEC, EM_X86_64, 0x8048_1000);
        let entry = parse_entry(1, &bytes).unwrap();
        assert_eq!(entry.address, 0x8048_1000);
        assert!(!entry.wide_mode);
    }

    #[test]
    fn pie_executable_adds_load_base() {
        let bytes = elf32_header(ET_DYN, EM_X86_64, 0x1000);
        let entry = parse_entry(1, &bytes).unwrap();
        assert_eq!(entry.address, PIE_BASE_32 + 0x1000);
    }

    #[test]
    fn arm_thumb_bit_is_cleared() {
        let bytes = elf32_header(ET_EXEC, EM_ARM, 0x9001);
        let entry = parse_entry(1, &bytes).unwrap();
        assert_eq!(entry.address, 0x9000);
        assert!(!entry.wide_mode);
    }

    #[test]
    fn arm_even_entry_is_wide_mode() {
        let bytes = elf32_header(ET_EXEC, EM_ARM, 0x9000);
        let entry = parse_entry(1, &bytes).unwrap();
        assert_eq!(entry.address, 0x9000);
        assert!(entry.wide_mode);
    }

    #[test]
    fn garbage_is_rejected() {
        let bytes = [0u8; 64];
        assert!(matches!(
            parse_entry(1, &bytes),
            Err(ImageError::Parse { .. })
        ));
    }

    #[test]
    fn own_image_has_a_plausible_entry() {
        let pid = std::process::id() as i32;
        let entry = entry_point(pid).unwrap();
        assert_ne!(entry.address, 0);
        assert!(!entry.wide_mode);
    }
}
