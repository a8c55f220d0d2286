//! Named seccomp-BPF filter profiles.
//!
//! The launcher installs one of three allow-list profiles on the child before
//! it changes user identity:
//!
//! - **app** - the baseline application policy. Rejects the group-set
//!   syscalls, which is why the launcher orders group changes before the
//!   filter installation.
//! - **app-zygote** - the application policy plus the identity syscalls a
//!   zygote needs to specialize its children. The platform policy
//!   additionally range-checks the ids; the table form admits the calls.
//! - **system** - the policy for system services; identity, tracing and
//!   namespace syscalls are admitted.
//!
//! Every profile keeps the syscalls the launcher itself still needs after
//! installation: `setresuid`, `capset`, `prctl`, `ptrace` (for `TRACEME`),
//! the signal syscalls, and `execve`.
//!
//! ## Filter structure
//!
//! 1. Verify the architecture tag (kill otherwise)
//! 2. Load the syscall number from `seccomp_data`
//! 3. Compare against the profile table, allow on match
//! 4. Kill the process otherwise
//!
//! Installation deliberately does **not** set `no_new_privs`: the filter goes
//! in while the launcher still holds `CAP_SYS_ADMIN`, and `no_new_privs`
//! would veto the SELinux domain transition performed later in the tracee.

use rustix::io::Errno;

use crate::last_errno;

const SECCOMP_SET_MODE_FILTER: u32 = 1;
const SECCOMP_RET_KILL_PROCESS: u32 = 0x8000_0000;
const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;

// BPF instruction classes and fields
const BPF_LD: u16 = 0x00;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;

// seccomp_data offsets
const OFFSET_SYSCALL_NR: u32 = 0;
const OFFSET_ARCH: u32 = 4;

#[cfg(target_arch = "x86_64")]
const AUDIT_ARCH: u32 = 0xc000_003e;
#[cfg(target_arch = "x86")]
const AUDIT_ARCH: u32 = 0x4000_0003;
#[cfg(target_arch = "aarch64")]
const AUDIT_ARCH: u32 = 0xc000_00b7;
#[cfg(target_arch = "arm")]
const AUDIT_ARCH: u32 = 0x4000_0028;

/// Maximum profile size (BPF jump offsets are u8)
const MAX_PROFILE_SIZE: usize = 250;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl SockFilter {
    #[inline]
    pub const fn stmt(code: u16, k: u32) -> Self {
        Self {
            code,
            jt: 0,
            jf: 0,
            k,
        }
    }

    #[inline]
    pub const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> Self {
        Self { code, jt, jf, k }
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct SockFprog {
    pub len: u16,
    pub filter: *const SockFilter,
}

/// Syscalls admitted by every profile.
fn base_syscalls() -> Vec<i64> {
    let mut set: Vec<i64> = vec![
        // I/O
        libc::SYS_read,
        libc::SYS_write,
        libc::SYS_readv,
        libc::SYS_writev,
        libc::SYS_pread64,
        libc::SYS_pwrite64,
        libc::SYS_close,
        libc::SYS_lseek,
        libc::SYS_dup,
        libc::SYS_dup3,
        libc::SYS_fcntl,
        libc::SYS_flock,
        libc::SYS_fsync,
        libc::SYS_fdatasync,
        libc::SYS_ftruncate,
        libc::SYS_ioctl,
        libc::SYS_pipe2,
        libc::SYS_ppoll,
        libc::SYS_pselect6,
        libc::SYS_epoll_create1,
        libc::SYS_epoll_ctl,
        libc::SYS_epoll_pwait,
        libc::SYS_eventfd2,
        libc::SYS_timerfd_create,
        libc::SYS_timerfd_settime,
        libc::SYS_timerfd_gettime,
        libc::SYS_signalfd4,
        // Memory
        libc::SYS_mmap,
        libc::SYS_mprotect,
        libc::SYS_munmap,
        libc::SYS_mremap,
        libc::SYS_msync,
        libc::SYS_madvise,
        libc::SYS_brk,
        libc::SYS_membarrier,
        // Filesystem
        libc::SYS_openat,
        libc::SYS_mkdirat,
        libc::SYS_unlinkat,
        libc::SYS_renameat,
        libc::SYS_linkat,
        libc::SYS_symlinkat,
        libc::SYS_readlinkat,
        libc::SYS_faccessat,
        libc::SYS_fchmod,
        libc::SYS_fchmodat,
        libc::SYS_fchown,
        libc::SYS_fchownat,
        libc::SYS_utimensat,
        libc::SYS_getdents64,
        libc::SYS_getcwd,
        libc::SYS_chdir,
        libc::SYS_fchdir,
        libc::SYS_fstat,
        libc::SYS_statfs,
        libc::SYS_fstatfs,
        // Process info
        libc::SYS_getpid,
        libc::SYS_getppid,
        libc::SYS_gettid,
        libc::SYS_getuid,
        libc::SYS_geteuid,
        libc::SYS_getgid,
        libc::SYS_getegid,
        libc::SYS_getgroups,
        libc::SYS_getresuid,
        libc::SYS_getresgid,
        libc::SYS_getrusage,
        libc::SYS_times,
        libc::SYS_sysinfo,
        libc::SYS_uname,
        libc::SYS_getpriority,
        libc::SYS_setpriority,
        libc::SYS_capget,
        // Time
        libc::SYS_clock_gettime,
        libc::SYS_clock_getres,
        libc::SYS_clock_nanosleep,
        libc::SYS_gettimeofday,
        libc::SYS_nanosleep,
        libc::SYS_setitimer,
        libc::SYS_getitimer,
        // Signals
        libc::SYS_rt_sigaction,
        libc::SYS_rt_sigprocmask,
        libc::SYS_rt_sigreturn,
        libc::SYS_rt_sigsuspend,
        libc::SYS_rt_sigpending,
        libc::SYS_rt_sigtimedwait,
        libc::SYS_sigaltstack,
        libc::SYS_kill,
        libc::SYS_tgkill,
        libc::SYS_tkill,
        // Process control; the launcher needs setresuid, capset, prctl,
        // ptrace and execve after the filter is in place.
        libc::SYS_execve,
        libc::SYS_clone,
        libc::SYS_exit,
        libc::SYS_exit_group,
        libc::SYS_wait4,
        libc::SYS_waitid,
        libc::SYS_setresuid,
        libc::SYS_capset,
        libc::SYS_prctl,
        libc::SYS_ptrace,
        libc::SYS_personality,
        libc::SYS_set_tid_address,
        libc::SYS_set_robust_list,
        libc::SYS_get_robust_list,
        libc::SYS_futex,
        libc::SYS_sched_yield,
        libc::SYS_sched_getaffinity,
        libc::SYS_sched_setaffinity,
        libc::SYS_sched_getparam,
        libc::SYS_sched_setparam,
        libc::SYS_sched_getscheduler,
        libc::SYS_sched_get_priority_max,
        libc::SYS_sched_get_priority_min,
        libc::SYS_getrandom,
        libc::SYS_prlimit64,
        // Sockets
        libc::SYS_socket,
        libc::SYS_socketpair,
        libc::SYS_connect,
        libc::SYS_bind,
        libc::SYS_listen,
        libc::SYS_accept4,
        libc::SYS_getsockname,
        libc::SYS_getpeername,
        libc::SYS_sendto,
        libc::SYS_recvfrom,
        libc::SYS_sendmsg,
        libc::SYS_recvmsg,
        libc::SYS_sendmmsg,
        libc::SYS_recvmmsg,
        libc::SYS_setsockopt,
        libc::SYS_getsockopt,
        libc::SYS_shutdown,
        // Runtime startup and common library plumbing
        libc::SYS_statx,
        libc::SYS_rseq,
        libc::SYS_faccessat2,
        libc::SYS_close_range,
        libc::SYS_copy_file_range,
        libc::SYS_sendfile,
        libc::SYS_splice,
        libc::SYS_tee,
        libc::SYS_memfd_create,
        libc::SYS_fallocate,
        libc::SYS_inotify_init1,
        libc::SYS_inotify_add_watch,
        libc::SYS_inotify_rm_watch,
    ];

    set.extend(stat_syscalls());
    set.extend(legacy_syscalls());
    set.extend(base_compat_syscalls());
    set
}

/// Word-size-dependent stat and offset syscalls.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
fn stat_syscalls() -> Vec<i64> {
    vec![libc::SYS_newfstatat]
}

#[cfg(any(target_arch = "x86", target_arch = "arm"))]
fn stat_syscalls() -> Vec<i64> {
    vec![
        libc::SYS_fstatat64,
        libc::SYS_fstat64,
        libc::SYS_statfs64,
        libc::SYS_fstatfs64,
        libc::SYS_mmap2,
        libc::SYS__llseek,
        libc::SYS_fcntl64,
        libc::SYS_ftruncate64,
        libc::SYS_sendfile64,
        libc::SYS_clock_gettime64,
        libc::SYS_clock_nanosleep_time64,
        libc::SYS_futex_time64,
    ]
}

/// 16-bit-uid compatibility variants of the read-side identity syscalls,
/// plus `setresuid32`, which the launcher itself calls after filter
/// installation on these architectures.
#[cfg(any(target_arch = "x86", target_arch = "arm"))]
fn base_compat_syscalls() -> Vec<i64> {
    vec![
        libc::SYS_getuid32,
        libc::SYS_geteuid32,
        libc::SYS_getgid32,
        libc::SYS_getegid32,
        libc::SYS_getgroups32,
        libc::SYS_getresuid32,
        libc::SYS_getresgid32,
        libc::SYS_setresuid32,
    ]
}

#[cfg(not(any(target_arch = "x86", target_arch = "arm")))]
fn base_compat_syscalls() -> Vec<i64> {
    Vec::new()
}

/// Legacy entry points kept for binaries predating the *at forms. aarch64
/// never had them.
#[cfg(any(target_arch = "x86_64", target_arch = "x86", target_arch = "arm"))]
fn legacy_syscalls() -> Vec<i64> {
    vec![
        libc::SYS_open,
        libc::SYS_poll,
        libc::SYS_access,
        libc::SYS_readlink,
        libc::SYS_dup2,
        libc::SYS_pipe,
        libc::SYS_fork,
    ]
}

#[cfg(target_arch = "aarch64")]
fn legacy_syscalls() -> Vec<i64> {
    Vec::new()
}

/// Identity syscalls withheld from the plain app profile.
fn identity_syscalls() -> Vec<i64> {
    let mut set: Vec<i64> = vec![
        libc::SYS_setresgid,
        libc::SYS_setgroups,
        libc::SYS_setreuid,
        libc::SYS_setregid,
        libc::SYS_setuid,
        libc::SYS_setgid,
        libc::SYS_setfsuid,
        libc::SYS_setfsgid,
    ];
    set.extend(compat_identity_syscalls());
    set
}

/// 16-bit-uid compatibility variants of the identity syscalls.
#[cfg(any(target_arch = "x86", target_arch = "arm"))]
fn compat_identity_syscalls() -> Vec<i64> {
    vec![
        libc::SYS_setresgid32,
        libc::SYS_setgroups32,
        libc::SYS_setreuid32,
        libc::SYS_setregid32,
        libc::SYS_setuid32,
        libc::SYS_setgid32,
    ]
}

#[cfg(not(any(target_arch = "x86", target_arch = "arm")))]
fn compat_identity_syscalls() -> Vec<i64> {
    Vec::new()
}

/// Administrative syscalls reserved for the system profile.
fn system_syscalls() -> Vec<i64> {
    vec![
        libc::SYS_process_vm_readv,
        libc::SYS_process_vm_writev,
        libc::SYS_setns,
        libc::SYS_unshare,
        libc::SYS_mount,
        libc::SYS_umount2,
        libc::SYS_sethostname,
        libc::SYS_setdomainname,
        libc::SYS_setsid,
        libc::SYS_setpgid,
        libc::SYS_chroot,
    ]
}

fn app_profile() -> Vec<i64> {
    base_syscalls()
}

fn app_zygote_profile() -> Vec<i64> {
    let mut set = base_syscalls();
    set.extend(identity_syscalls());
    set
}

fn system_profile() -> Vec<i64> {
    let mut set = base_syscalls();
    set.extend(identity_syscalls());
    set.extend(system_syscalls());
    set
}

/// Builds the allow-list BPF program for a profile table.
///
/// # Panics
///
/// Panics if `syscalls.len()` > 250 (BPF jump offsets are u8).
pub fn build_allowlist_filter(syscalls: &[i64]) -> Vec<SockFilter> {
    assert!(
        syscalls.len() <= MAX_PROFILE_SIZE,
        "profile too large: {} > {} (BPF jump offset overflow)",
        syscalls.len(),
        MAX_PROFILE_SIZE
    );

    let n = syscalls.len();
    let mut filter = Vec::with_capacity(n + 6);

    // Architecture check
    filter.push(SockFilter::stmt(BPF_LD | BPF_W | BPF_ABS, OFFSET_ARCH));
    filter.push(SockFilter::jump(BPF_JMP | BPF_JEQ | BPF_K, AUDIT_ARCH, 1, 0));
    filter.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_KILL_PROCESS));

    // Load syscall number
    filter.push(SockFilter::stmt(
        BPF_LD | BPF_W | BPF_ABS,
        OFFSET_SYSCALL_NR,
    ));

    // Profile table
    for (i, &nr) in syscalls.iter().enumerate() {
        let allow_offset = (n - i) as u8;
        filter.push(SockFilter::jump(
            BPF_JMP | BPF_JEQ | BPF_K,
            nr as u32,
            allow_offset,
            0,
        ));
    }

    // Default deny, then the shared ALLOW target
    filter.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_KILL_PROCESS));
    filter.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW));

    filter
}

fn install(syscalls: &[i64]) -> Result<(), Errno> {
    let filter = build_allowlist_filter(syscalls);
    let fprog = SockFprog {
        len: filter.len() as u16,
        filter: filter.as_ptr(),
    };
    // no_new_privs is deliberately not set here; the caller must hold
    // CAP_SYS_ADMIN instead.
    // SAFETY: the fprog points at a live, well-formed BPF program.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_seccomp,
            SECCOMP_SET_MODE_FILTER,
            0u32,
            &fprog as *const SockFprog,
        )
    };
    if ret != 0 { Err(last_errno()) } else { Ok(()) }
}

/// Installs the baseline application filter on the current thread.
pub fn install_app_filter() -> Result<(), Errno> {
    install(&app_profile())
}

/// Installs the app-zygote filter on the current thread.
pub fn install_app_zygote_filter() -> Result<(), Errno> {
    install(&app_zygote_profile())
}

/// Installs the system-services filter on the current thread.
pub fn install_system_filter() -> Result<(), Errno> {
    install(&system_profile())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_structure() {
        let syscalls = &[libc::SYS_read, libc::SYS_write, libc::SYS_exit];
        let filter = build_allowlist_filter(syscalls);
        // 3 (arch) + 1 (load) + 3 (table) + 2 (kill/allow)
        assert_eq!(filter.len(), 9);
        assert_eq!(filter[filter.len() - 1].k, SECCOMP_RET_ALLOW);
        assert_eq!(filter[filter.len() - 2].k, SECCOMP_RET_KILL_PROCESS);
    }

    #[test]
    fn table_entries_jump_to_allow() {
        let syscalls = &[libc::SYS_read, libc::SYS_write];
        let filter = build_allowlist_filter(syscalls);
        // Both entries must land on the final ALLOW instruction.
        let allow_index = filter.len() - 1;
        assert_eq!(4 + 0 + filter[4].jt as usize + 1, allow_index);
        assert_eq!(5 + filter[5].jt as usize + 1, allow_index);
    }

    #[test]
    fn app_profile_rejects_group_set() {
        let app = app_profile();
        assert!(!app.contains(&libc::SYS_setresgid));
        assert!(!app.contains(&libc::SYS_setgroups));
    }

    #[test]
    fn launcher_tail_syscalls_survive_every_profile() {
        for profile in [app_profile(), app_zygote_profile(), system_profile()] {
            assert!(profile.contains(&libc::SYS_setresuid));
            assert!(profile.contains(&libc::SYS_capset));
            assert!(profile.contains(&libc::SYS_prctl));
            assert!(profile.contains(&libc::SYS_ptrace));
            assert!(profile.contains(&libc::SYS_execve));
        }
    }

    #[test]
    fn system_profile_widens_app_profile() {
        let app = app_profile();
        let system = system_profile();
        assert!(app.iter().all(|nr| system.contains(nr)));
        assert!(system.contains(&libc::SYS_setresgid));
        assert!(system.contains(&libc::SYS_setgroups));
        assert!(system.len() > app.len());
    }

    #[test]
    fn profiles_fit_bpf_jump_range() {
        assert!(system_profile().len() <= MAX_PROFILE_SIZE);
    }

    #[test]
    #[should_panic(expected = "profile too large")]
    fn oversized_table_panics() {
        let huge: Vec<i64> = (0..300i64).collect();
        build_allowlist_filter(&huge);
    }
}
