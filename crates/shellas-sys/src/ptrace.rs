//! Word-granular tracee memory access.
//!
//! ptrace moves one machine word per `PEEKDATA`/`POKEDATA` request, while the
//! payload buffers are neither word-sized nor word-aligned. Byte access is
//! therefore implemented as word read-modify-write, keeping word-size and
//! alignment concerns out of the callers. This is not the fastest way to move
//! tracee memory, but the transfers here are tens of bytes.
//!
//! All helpers assume the tracee is stopped; the kernel rejects the requests
//! otherwise.

use rustix::io::Errno;

use crate::last_errno;

fn peek_word(pid: libc::pid_t, addr: usize) -> Result<libc::c_long, Errno> {
    // PEEKDATA returns the word in the result, so -1 is a legal value and
    // errno has to be cleared first and consulted afterwards.
    // SAFETY: PEEKDATA only reads from the tracee.
    unsafe {
        *libc::__errno_location() = 0;
        let word = libc::ptrace(libc::PTRACE_PEEKDATA, pid, addr as *mut libc::c_void, 0usize);
        let raw = *libc::__errno_location();
        if word == -1 && raw != 0 {
            Err(Errno::from_raw_os_error(raw))
        } else {
            Ok(word)
        }
    }
}

fn poke_word(pid: libc::pid_t, addr: usize, word: libc::c_long) -> Result<(), Errno> {
    // SAFETY: POKEDATA writes one word at `addr` in the stopped tracee.
    let ret = unsafe { libc::ptrace(libc::PTRACE_POKEDATA, pid, addr as *mut libc::c_void, word) };
    if ret == -1 { Err(last_errno()) } else { Ok(()) }
}

/// Reads one byte of tracee memory.
pub fn read_byte(pid: libc::pid_t, addr: usize) -> Result<u8, Errno> {
    // Low byte of the word is the byte at `addr` on the (little-endian)
    // supported architectures.
    Ok(peek_word(pid, addr)?.to_ne_bytes()[0])
}

/// Writes one byte of tracee memory, preserving the rest of the word.
pub fn write_byte(pid: libc::pid_t, addr: usize, value: u8) -> Result<(), Errno> {
    let mut word = peek_word(pid, addr)?.to_ne_bytes();
    word[0] = value;
    poke_word(pid, addr, libc::c_long::from_ne_bytes(word))
}

/// Fills `buf` from tracee memory starting at `addr`.
pub fn read_bytes(pid: libc::pid_t, addr: usize, buf: &mut [u8]) -> Result<(), Errno> {
    for (offset, byte) in buf.iter_mut().enumerate() {
        *byte = read_byte(pid, addr + offset)?;
    }
    Ok(())
}

/// Copies `bytes` into tracee memory starting at `addr`.
pub fn write_bytes(pid: libc::pid_t, addr: usize, bytes: &[u8]) -> Result<(), Errno> {
    for (offset, &byte) in bytes.iter().enumerate() {
        write_byte(pid, addr + offset, byte)?;
    }
    Ok(())
}
