//! Tracer-side driver: drive the child through exec, stop it at its entry
//! point, and run the SELinux payload inside it.
//!
//! The recommended way to change the label of a program about to exec is
//! `setexeccon`, but that requires the privilege to transition into the
//! target domain, which contexts like `untrusted_app` do not hold. Instead
//! the tracee transitions itself: after the kernel has loaded the new image
//! and the dynamic linker has run, injected code rewrites the thread's own
//! SELinux attribute while the tracee is still in the original, privileged
//! domain.
//!
//! Injection waits for the binary's declared entry point rather than firing
//! at the exec stop. At the exec stop the program counter is still inside
//! the dynamic linker, which must read the executable through the
//! pre-transition label; some target domains are not allowed to read the
//! binary at all.

use nix::sys::ptrace::{self, Options};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::debug;

use shellas_sys::regs::{self, ProgramCounter};

use crate::context::SecurityContext;
use crate::image::{self, ImageError};
use crate::payload;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("ptrace {request}: {source}")]
    Request {
        request: &'static str,
        source: nix::Error,
    },

    #[error("wait during {stage}: {source}")]
    Wait {
        stage: &'static str,
        source: nix::Error,
    },

    #[error("unexpected wait status during {stage}: {status}")]
    UnexpectedStop {
        stage: &'static str,
        status: String,
    },

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("ARM-mode entry point; only thumb-mode payloads are available")]
    WideArm,

    #[error("payload registry: {0}")]
    Payload(rustix::io::Errno),

    #[error("tracee memory at {addr:#x}: {source}")]
    Memory {
        addr: u64,
        source: rustix::io::Errno,
    },

    #[error("tracee registers: {0}")]
    Registers(rustix::io::Errno),
}

/// Drives the child from its post-fork self-stop to detach.
///
/// The caller has already observed the SIGSTOP handshake; the child's next
/// stop is the exec trap.
pub fn run(child: Pid, context: &SecurityContext) -> Result<(), TraceError> {
    ptrace::setoptions(
        child,
        Options::PTRACE_O_TRACEEXEC | Options::PTRACE_O_EXITKILL,
    )
    .map_err(|source| TraceError::Request {
        request: "SETOPTIONS",
        source,
    })?;

    resume(child)?;
    expect_exec_stop(child)?;
    debug!(%child, "tracee crossed the exec boundary");

    step_to_entry_point(child)?;

    if let Some(ref label) = context.selinux_label {
        let injected = payload::mac_label_payload(label).map_err(TraceError::Payload)?;
        execute_payload(child, &injected)?;
        debug!(%child, label = %label, "selinux label applied");
    }

    ptrace::detach(child, None).map_err(|source| TraceError::Request {
        request: "DETACH",
        source,
    })?;
    // Reap the child once it finishes on its own.
    waitpid(child, None).ok();
    Ok(())
}

/// Plants the trap payload at the binary's declared entry point, resumes the
/// tracee until it gets there, then restores the original bytes and resets
/// the program counter.
///
/// For a dynamically linked binary the stretch between the exec stop and the
/// entry trap is exactly the dynamic linker's run.
fn step_to_entry_point(child: Pid) -> Result<(), TraceError> {
    let entry = image::entry_point(child.as_raw())?;
    if entry.wide_mode {
        return Err(TraceError::WideArm);
    }
    debug!(%child, address = entry.address, "entry point resolved");

    let (trap, trap_signal) = payload::trap_payload().map_err(TraceError::Payload)?;
    let saved = read_tracee(child, entry.address, trap.len())?;
    write_tracee(child, entry.address, trap)?;

    resume(child)?;
    expect_stop(child, trap_signal, "entry-point trap")?;

    set_program_counter(child, entry.address)?;
    write_tracee(child, entry.address, &saved)?;
    Ok(())
}

/// Runs `injected` at the tracee's current program counter.
///
/// The register file and the overwritten bytes are captured first and
/// restored after the payload raises its stop, leaving the tracee exactly
/// where it was.
fn execute_payload(child: Pid, injected: &[u8]) -> Result<(), TraceError> {
    let saved_regs = regs::read_registers(child.as_raw()).map_err(TraceError::Registers)?;
    let pc = saved_regs.pc();

    let saved_bytes = read_tracee(child, pc, injected.len())?;
    write_tracee(child, pc, injected)?;

    resume(child)?;
    expect_stop(child, payload::STOP_SIGNAL, "label payload")?;

    regs::write_registers(child.as_raw(), &saved_regs).map_err(TraceError::Registers)?;
    write_tracee(child, pc, &saved_bytes)?;
    Ok(())
}

fn resume(child: Pid) -> Result<(), TraceError> {
    ptrace::cont(child, None).map_err(|source| TraceError::Request {
        request: "CONT",
        source,
    })
}

fn expect_exec_stop(child: Pid) -> Result<(), TraceError> {
    match waitpid(child, None).map_err(|source| TraceError::Wait {
        stage: "exec trap",
        source,
    })? {
        WaitStatus::PtraceEvent(_, Signal::SIGTRAP, event)
            if event == libc::PTRACE_EVENT_EXEC =>
        {
            Ok(())
        }
        status => Err(TraceError::UnexpectedStop {
            stage: "exec trap",
            status: format!("{status:?}"),
        }),
    }
}

fn expect_stop(child: Pid, signal: Signal, stage: &'static str) -> Result<(), TraceError> {
    match waitpid(child, None).map_err(|source| TraceError::Wait { stage, source })? {
        WaitStatus::Stopped(_, received) if received == signal => Ok(()),
        status => Err(TraceError::UnexpectedStop {
            stage,
            status: format!("{status:?}"),
        }),
    }
}

fn set_program_counter(child: Pid, pc: u64) -> Result<(), TraceError> {
    let mut registers = regs::read_registers(child.as_raw()).map_err(TraceError::Registers)?;
    registers.set_pc(pc);
    regs::write_registers(child.as_raw(), &registers).map_err(TraceError::Registers)
}

fn read_tracee(child: Pid, addr: u64, len: usize) -> Result<Vec<u8>, TraceError> {
    let mut buf = vec![0u8; len];
    shellas_sys::ptrace::read_bytes(child.as_raw(), addr as usize, &mut buf)
        .map_err(|source| TraceError::Memory { addr, source })?;
    Ok(buf)
}

fn write_tracee(child: Pid, addr: u64, bytes: &[u8]) -> Result<(), TraceError> {
    shellas_sys::ptrace::write_bytes(child.as_raw(), addr as usize, bytes)
        .map_err(|source| TraceError::Memory { addr, source })
}
