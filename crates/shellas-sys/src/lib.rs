//! Low-level Linux plumbing for the shellas launcher.
//!
//! Thin wrappers around the syscalls the higher layers need in a form that
//! nix or rustix do not provide. For standard syscalls, use nix.
//!
//! ## Modules
//!
//! - **ptrace** - word-granular tracee memory I/O
//! - **regs** - per-architecture register images and iovec register-set I/O
//! - **seccomp** - seccomp-BPF construction and installation for the named
//!   filter profiles (app, app-zygote, system)
//! - **securebits** - `SECBIT_NOROOT` manipulation
//!
//! # Safety
//!
//! This crate contains raw syscall wrappers. Casts between integer types
//! are unavoidable when interfacing with the kernel ABI.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod ptrace;
pub mod regs;
pub mod seccomp;
pub mod securebits;

#[inline]
pub fn last_errno() -> rustix::io::Errno {
    // SAFETY: __errno_location always returns valid thread-local pointer.
    rustix::io::Errno::from_raw_os_error(unsafe { *libc::__errno_location() })
}
