//! Injected payload registry.
//!
//! Two pieces of position-independent code are copied into the tracee: a
//! breakpoint used to stop at the binary's entry point, and a routine that
//! rewrites the calling thread's SELinux attribute and then stops itself.
//!
//! The SELinux routine opens `/proc/thread-self/attr/current`, writes the
//! NUL-terminated label that the registry appends directly after the code
//! bytes, closes the node, and raises `SIGSTOP`. The driver snapshots and
//! restores every register and every overwritten byte around a payload run,
//! so payloads may clobber registers freely; the only state that escapes is
//! the stop signal itself.
//!
//! The blobs are per-architecture data; the registry's other job is to make
//! sure the pages holding them are mapped readable and executable before
//! first use.

use std::sync::OnceLock;

use nix::sys::signal::Signal;
use rustix::io::Errno;

/// Signal the set-label payload raises when it is done.
pub const STOP_SIGNAL: Signal = Signal::SIGSTOP;

/// SELinux attribute node the set-label payload writes to.
const ATTR_PATH: &[u8] = b"/proc/thread-self/attr/current\0";

#[cfg(target_arch = "x86_64")]
mod blobs {
    /// openat(AT_FDCWD, path, O_WRONLY); strlen(label); write(fd, label, len);
    /// close(fd); kill(getpid(), SIGSTOP). The attribute path lives at offset
    /// 0x52, the label at 0x71; both lea displacements encode those offsets.
    pub static SETCON_STUB: [u8; 82] = [
        0x48, 0x8d, 0x35, 0x4b, 0x00, 0x00, 0x00, // lea    rsi, [rip+0x4b]   ; path
        0xbf, 0x9c, 0xff, 0xff, 0xff, // mov    edi, -100         ; AT_FDCWD
        0xba, 0x01, 0x00, 0x00, 0x00, // mov    edx, 1            ; O_WRONLY
        0xb8, 0x01, 0x01, 0x00, 0x00, // mov    eax, 257          ; openat
        0x0f, 0x05, // syscall
        0x89, 0xc7, // mov    edi, eax          ; fd
        0x48, 0x8d, 0x35, 0x50, 0x00, 0x00, 0x00, // lea    rsi, [rip+0x50]   ; label
        0x31, 0xd2, // xor    edx, edx
        0x80, 0x3c, 0x16, 0x00, // cmp    byte [rsi+rdx], 0
        0x74, 0x05, // je     write
        0x48, 0xff, 0xc2, // inc    rdx
        0xeb, 0xf5, // jmp    strlen
        0xb8, 0x01, 0x00, 0x00, 0x00, // mov    eax, 1            ; write
        0x0f, 0x05, // syscall
        0xb8, 0x03, 0x00, 0x00, 0x00, // mov    eax, 3            ; close
        0x0f, 0x05, // syscall
        0xb8, 0x27, 0x00, 0x00, 0x00, // mov    eax, 39           ; getpid
        0x0f, 0x05, // syscall
        0x89, 0xc7, // mov    edi, eax
        0xbe, 0x13, 0x00, 0x00, 0x00, // mov    esi, 19           ; SIGSTOP
        0xb8, 0x3e, 0x00, 0x00, 0x00, // mov    eax, 62           ; kill
        0x0f, 0x05, // syscall
        0xcc, // int3                             ; unreachable guard
    ];

    /// `int3`.
    pub static TRAP: [u8; 1] = [0xcc];
}

#[cfg(target_arch = "x86")]
mod blobs {
    /// Same flow through the i386 syscall numbers (open=5, write=4, close=6,
    /// getpid=20, kill=37); a call/pop pair stands in for rip-relative
    /// addressing. Path at offset 0x51, label at 0x70.
    pub static SETCON_STUB: [u8; 81] = [
        0xe8, 0x00, 0x00, 0x00, 0x00, // call   +0                ; push eip
        0x5d, // pop    ebp
        0x8d, 0x9d, 0x4c, 0x00, 0x00, 0x00, // lea    ebx, [ebp+0x4c]   ; path
        0xb9, 0x01, 0x00, 0x00, 0x00, // mov    ecx, 1            ; O_WRONLY
        0xb8, 0x05, 0x00, 0x00, 0x00, // mov    eax, 5            ; open
        0xcd, 0x80, // int    0x80
        0x89, 0xc7, // mov    edi, eax          ; fd
        0x8d, 0x8d, 0x6b, 0x00, 0x00, 0x00, // lea    ecx, [ebp+0x6b]   ; label
        0x31, 0xd2, // xor    edx, edx
        0x80, 0x3c, 0x11, 0x00, // cmp    byte [ecx+edx], 0
        0x74, 0x03, // je     write
        0x42, // inc    edx
        0xeb, 0xf7, // jmp    strlen
        0x89, 0xfb, // mov    ebx, edi
        0xb8, 0x04, 0x00, 0x00, 0x00, // mov    eax, 4            ; write
        0xcd, 0x80, // int    0x80
        0xb8, 0x06, 0x00, 0x00, 0x00, // mov    eax, 6            ; close
        0xcd, 0x80, // int    0x80
        0xb8, 0x14, 0x00, 0x00, 0x00, // mov    eax, 20           ; getpid
        0xcd, 0x80, // int    0x80
        0x89, 0xc3, // mov    ebx, eax
        0xb9, 0x13, 0x00, 0x00, 0x00, // mov    ecx, 19           ; SIGSTOP
        0xb8, 0x25, 0x00, 0x00, 0x00, // mov    eax, 37           ; kill
        0xcd, 0x80, // int    0x80
        0xcc, // int3
    ];

    /// `int3`.
    pub static TRAP: [u8; 1] = [0xcc];
}

#[cfg(target_arch = "aarch64")]
mod blobs {
    /// aarch64 syscall numbers: openat=56, write=64, close=57, getpid=172,
    /// kill=129. Path at offset 96, label at 127.
    pub static SETCON_STUB: [u8; 96] = [
        0x01, 0x03, 0x00, 0x10, // adr    x1, path
        0x60, 0x0c, 0x80, 0x92, // movn   x0, #99           ; AT_FDCWD
        0x22, 0x00, 0x80, 0xd2, // mov    x2, #1            ; O_WRONLY
        0x08, 0x07, 0x80, 0xd2, // mov    x8, #56           ; openat
        0x01, 0x00, 0x00, 0xd4, // svc    #0
        0xe3, 0x03, 0x00, 0xaa, // mov    x3, x0            ; fd
        0x21, 0x03, 0x00, 0x70, // adr    x1, label
        0x02, 0x00, 0x80, 0xd2, // mov    x2, #0
        0x24, 0x68, 0x62, 0x38, // ldrb   w4, [x1, x2]
        0x64, 0x00, 0x00, 0x34, // cbz    w4, write
        0x42, 0x04, 0x00, 0x91, // add    x2, x2, #1
        0xfd, 0xff, 0xff, 0x17, // b      strlen
        0xe0, 0x03, 0x03, 0xaa, // mov    x0, x3
        0x08, 0x08, 0x80, 0xd2, // mov    x8, #64           ; write
        0x01, 0x00, 0x00, 0xd4, // svc    #0
        0xe0, 0x03, 0x03, 0xaa, // mov    x0, x3
        0x28, 0x07, 0x80, 0xd2, // mov    x8, #57           ; close
        0x01, 0x00, 0x00, 0xd4, // svc    #0
        0x88, 0x15, 0x80, 0xd2, // mov    x8, #172          ; getpid
        0x01, 0x00, 0x00, 0xd4, // svc    #0
        0x61, 0x02, 0x80, 0xd2, // mov    x1, #19           ; SIGSTOP
        0x28, 0x10, 0x80, 0xd2, // mov    x8, #129          ; kill
        0x01, 0x00, 0x00, 0xd4, // svc    #0
        0x00, 0x00, 0x20, 0xd4, // brk    #0
    ];

    /// `brk #0`.
    pub static TRAP: [u8; 4] = [0x00, 0x00, 0x20, 0xd4];
}

#[cfg(target_arch = "arm")]
mod blobs {
    /// Thumb encoding; EABI syscall numbers (open=5, write=4, close=6,
    /// getpid=20, kill=37). Path at offset 52, label at 83.
    pub static SETCON_STUB: [u8; 52] = [
        0x78, 0x46, // mov    r0, pc
        0x30, 0x30, // adds   r0, #48           ; path
        0x01, 0x21, // movs   r1, #1            ; O_WRONLY
        0x05, 0x27, // movs   r7, #5            ; open
        0x00, 0xdf, // svc    0
        0x04, 0x46, // mov    r4, r0            ; fd
        0x79, 0x46, // mov    r1, pc
        0x43, 0x31, // adds   r1, #67           ; label
        0x00, 0x22, // movs   r2, #0
        0x8b, 0x5c, // ldrb   r3, [r1, r2]
        0x00, 0x2b, // cmp    r3, #0
        0x01, 0xd0, // beq    write
        0x01, 0x32, // adds   r2, #1
        0xfa, 0xe7, // b      strlen
        0x20, 0x46, // mov    r0, r4
        0x04, 0x27, // movs   r7, #4            ; write
        0x00, 0xdf, // svc    0
        0x20, 0x46, // mov    r0, r4
        0x06, 0x27, // movs   r7, #6            ; close
        0x00, 0xdf, // svc    0
        0x14, 0x27, // movs   r7, #20           ; getpid, pid lands in r0
        0x00, 0xdf, // svc    0
        0x13, 0x21, // movs   r1, #19           ; SIGSTOP
        0x25, 0x27, // movs   r7, #37           ; kill
        0x00, 0xdf, // svc    0
        0x00, 0xbe, // bkpt   #0
    ];

    /// `bkpt #0`.
    pub static TRAP: [u8; 2] = [0x00, 0xbe];
}

/// Marks the pages holding the static blobs readable and executable.
fn ensure_executable() -> Result<(), Errno> {
    static MAPPED: OnceLock<Result<(), Errno>> = OnceLock::new();
    *MAPPED.get_or_init(|| {
        remap(blobs::SETCON_STUB.as_ptr(), blobs::SETCON_STUB.len())?;
        remap(blobs::TRAP.as_ptr(), blobs::TRAP.len())
    })
}

fn remap(addr: *const u8, len: usize) -> Result<(), Errno> {
    // SAFETY: sysconf(_SC_PAGESIZE) is always valid.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    let start = addr as usize & !(page - 1);
    let end = (addr as usize + len + page - 1) & !(page - 1);
    // SAFETY: the range covers live static data; adding exec to its pages
    // does not invalidate any reference.
    let ret = unsafe {
        libc::mprotect(
            start as *mut libc::c_void,
            end - start,
            libc::PROT_READ | libc::PROT_EXEC,
        )
    };
    if ret != 0 {
        Err(shellas_sys::last_errno())
    } else {
        Ok(())
    }
}

/// The breakpoint blob and the signal it raises.
pub fn trap_payload() -> Result<(&'static [u8], Signal), Errno> {
    ensure_executable()?;
    Ok((&blobs::TRAP, Signal::SIGTRAP))
}

/// The set-label code with `label` appended, NUL-terminated.
pub fn mac_label_payload(label: &str) -> Result<Vec<u8>, Errno> {
    ensure_executable()?;
    let mut payload =
        Vec::with_capacity(blobs::SETCON_STUB.len() + ATTR_PATH.len() + label.len() + 1);
    payload.extend_from_slice(&blobs::SETCON_STUB);
    payload.extend_from_slice(ATTR_PATH);
    payload.extend_from_slice(label.as_bytes());
    payload.push(0);
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_follows_code_and_path() {
        let payload = mac_label_payload("u:r:untrusted_app:s0").unwrap();
        let label_offset = blobs::SETCON_STUB.len() + ATTR_PATH.len();
        assert_eq!(
            &payload[label_offset..],
            b"u:r:untrusted_app:s0\0".as_slice()
        );
        assert_eq!(&payload[..blobs::SETCON_STUB.len()], &blobs::SETCON_STUB[..]);
    }

    #[test]
    fn attr_path_is_nul_terminated_inside_payload() {
        let payload = mac_label_payload("x").unwrap();
        let path_start = blobs::SETCON_STUB.len();
        assert_eq!(
            &payload[path_start..path_start + ATTR_PATH.len()],
            ATTR_PATH
        );
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn baked_displacements_match_layout() {
        // The two lea displacements encode the path and label offsets.
        assert_eq!(blobs::SETCON_STUB.len(), 0x52);
        assert_eq!(blobs::SETCON_STUB.len() + ATTR_PATH.len(), 0x71);
        assert_eq!(blobs::SETCON_STUB[3], 0x52 - 7);
        assert_eq!(blobs::SETCON_STUB[29], 0x71 - 0x21);
    }

    #[test]
    fn trap_is_small_and_raises_sigtrap() {
        let (trap, signal) = trap_payload().unwrap();
        assert!(!trap.is_empty());
        assert!(trap.len() <= 4);
        assert_eq!(signal, Signal::SIGTRAP);
    }
}
