//! Fork/exec orchestration.
//!
//! The launcher forks once. The child disables address-space layout
//! randomization, runs the privilege-drop sequence and execs; the parent
//! waits for the child's self-stop and then drives the trace-and-inject
//! protocol. `PTRACE_O_EXITKILL` set by the driver guarantees the child
//! does not outlive the parent in a half-dropped state.

use std::ffi::CString;
use std::io::{self, Write as _};

use nix::sys::personality::{self, Persona};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{self, ForkResult};
use thiserror::Error;

use crate::context::SecurityContext;
use crate::sequencer;
use crate::tracer::{self, TraceError};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("empty command")]
    EmptyCommand,

    #[error("fork: {0}")]
    Fork(nix::Error),

    #[error("wait for child: {0}")]
    Wait(nix::Error),

    #[error("child aborted while dropping privileges")]
    ChildAborted,

    #[error(transparent)]
    Trace(#[from] TraceError),
}

/// Launches `argv` in `context`.
///
/// Returns once the tracee has been set up and detached; the tracee's own
/// exit status is not propagated.
pub fn launch(context: &SecurityContext, argv: &[CString]) -> Result<(), LaunchError> {
    if argv.is_empty() {
        return Err(LaunchError::EmptyCommand);
    }

    // SAFETY: the child only touches exec-safe state before execv.
    match unsafe { unistd::fork() }.map_err(LaunchError::Fork)? {
        ForkResult::Child => {
            // A randomized load address would defeat the parent's entry-point
            // computation. Never fails for a valid persona.
            personality::set(Persona::ADDR_NO_RANDOMIZE).ok();

            match sequencer::drop_and_exec(context, argv) {
                Ok(never) => match never {},
                Err(err) => {
                    let mut stderr = io::stderr();
                    let _ = writeln!(stderr, "shellas: {err}");
                    std::process::exit(1);
                }
            }
        }
        ForkResult::Parent { child } => {
            // The child's first stop must be its own SIGSTOP; anything else
            // means it aborted inside the drop sequence (it prints its own
            // diagnostic).
            match waitpid(child, None).map_err(LaunchError::Wait)? {
                WaitStatus::Stopped(_, Signal::SIGSTOP) => {}
                _ => return Err(LaunchError::ChildAborted),
            }

            tracer::run(child, context)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_rejected() {
        let err = launch(&SecurityContext::default(), &[]).unwrap_err();
        assert!(matches!(err, LaunchError::EmptyCommand));
    }
}
