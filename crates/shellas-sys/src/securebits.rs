//! Secure-bits manipulation.
//!
//! `SECBIT_NOROOT` disables the kernel's special-case treatment of uid 0 at
//! the exec boundary. Without it, every bit of the permitted set would be
//! re-raised across exec for a root tracee, undoing the ambient-set surgery
//! performed by the launcher.

use rustix::io::Errno;

use crate::last_errno;

/// `SECBIT_NOROOT` from `linux/securebits.h`.
pub const SECBIT_NOROOT: libc::c_ulong = 1 << 0;

/// Raises `SECBIT_NOROOT` on the current thread, preserving the other bits.
///
/// Requires `CAP_SETPCAP` in the effective set.
pub fn raise_noroot() -> Result<(), Errno> {
    // SAFETY: prctl with PR_GET_SECUREBITS/PR_SET_SECUREBITS takes and
    // returns plain integers.
    unsafe {
        let bits = libc::prctl(libc::PR_GET_SECUREBITS, 0, 0, 0, 0);
        if bits < 0 {
            return Err(last_errno());
        }
        let ret = libc::prctl(
            libc::PR_SET_SECUREBITS,
            bits as libc::c_ulong | SECBIT_NOROOT,
            0,
            0,
            0,
        );
        if ret != 0 { Err(last_errno()) } else { Ok(()) }
    }
}
