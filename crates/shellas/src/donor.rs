//! Donor application provisioning.
//!
//! The `untrusted-app` profile copies the context of a reference app that is
//! installed and started on the device for that purpose. Provisioning walks
//! a small state machine: the embedded package is staged to disk, installed
//! through the package manager, started through the activity manager, and
//! finally located in the process table. Process creation is asynchronous,
//! so the locate step polls with a bounded backoff.

use std::fs;
use std::io;
use std::process::{Command, ExitStatus};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Package identifier of the embedded donor app.
pub const DONOR_PACKAGE: &str = "com.android.google.tools.security.shellas_donor";

/// Profile name accepted by `--profile`.
pub const PROFILE_UNTRUSTED_APP: &str = "untrusted-app";

const STAGING_PATH: &str = "/data/local/tmp/shellas-donor.apk";
const DONOR_APK: &[u8] = include_bytes!("../assets/donor.apk");
const LOCATE_ATTEMPTS: u32 = 5;
const LOCATE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum DonorError {
    #[error("stage donor package to {path}: {source}")]
    Stage {
        path: &'static str,
        source: io::Error,
    },

    #[error("run {tool}: {source}")]
    Spawn {
        tool: &'static str,
        source: io::Error,
    },

    #[error("{tool} exited with {status}")]
    Tool {
        tool: &'static str,
        status: ExitStatus,
    },

    #[error("donor app did not appear in the process table")]
    NotLocated,
}

/// Provisioning progress, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Absent,
    Staged,
    Installed,
    Running,
    Located(i32),
}

/// Installs and starts the donor app, returning its pid.
///
/// Safe to call repeatedly; a prior install is replaced and a running donor
/// is simply located again.
pub fn provision() -> Result<i32, DonorError> {
    let mut state = State::Absent;
    loop {
        state = match state {
            State::Absent => {
                stage()?;
                State::Staged
            }
            State::Staged => {
                install()?;
                State::Installed
            }
            State::Installed => {
                start()?;
                State::Running
            }
            State::Running => State::Located(locate()?),
            State::Located(pid) => return Ok(pid),
        };
    }
}

/// Absent -> Staged: write the embedded package, truncating any prior file.
fn stage() -> Result<(), DonorError> {
    debug!(path = STAGING_PATH, bytes = DONOR_APK.len(), "staging donor");
    fs::write(STAGING_PATH, DONOR_APK).map_err(|source| DonorError::Stage {
        path: STAGING_PATH,
        source,
    })
}

/// Staged -> Installed: `pm install -g`, granting all runtime permissions.
/// A leftover install is removed first; the uninstall itself may fail when
/// nothing is installed.
fn install() -> Result<(), DonorError> {
    run("pm", &["uninstall", DONOR_PACKAGE]).ok();
    run("pm", &["install", "-g", STAGING_PATH])
}

/// Installed -> Running: start the donor's main entry point.
fn start() -> Result<(), DonorError> {
    let component = format!("{DONOR_PACKAGE}/.MainActivity");
    run("am", &["start", "-n", &component])
}

/// Running -> Located: poll the process table for the package identifier.
fn locate() -> Result<i32, DonorError> {
    for attempt in 0..LOCATE_ATTEMPTS {
        if attempt > 0 {
            thread::sleep(LOCATE_BACKOFF);
        }
        if let Some(pid) = find_process(DONOR_PACKAGE) {
            debug!(pid, "donor located");
            return Ok(pid);
        }
    }
    Err(DonorError::NotLocated)
}

/// Scans `/proc` for a process whose argv[0] equals `name`. App processes
/// carry their package identifier as argv[0].
fn find_process(name: &str) -> Option<i32> {
    for entry in fs::read_dir("/proc").ok()?.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() else {
            continue;
        };
        let Ok(cmdline) = fs::read(format!("/proc/{pid}/cmdline")) else {
            continue;
        };
        let argv0 = cmdline.split(|&b| b == 0).next().unwrap_or(&[]);
        if argv0 == name.as_bytes() {
            return Some(pid);
        }
    }
    None
}

fn run(tool: &'static str, args: &[&str]) -> Result<(), DonorError> {
    debug!(tool, ?args, "invoking");
    let status = Command::new(tool)
        .args(args)
        .status()
        .map_err(|source| DonorError::Spawn { tool, source })?;
    if status.success() {
        Ok(())
    } else {
        Err(DonorError::Tool { tool, status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_package_is_nonempty() {
        assert!(!DONOR_APK.is_empty());
    }

    #[test]
    fn find_process_locates_a_known_argv0() {
        // The test binary's own cmdline starts with its invocation path.
        let own = std::env::args().next().unwrap();
        let found = find_process(&own);
        assert!(found.is_some());
    }

    #[test]
    fn find_process_misses_unknown_names() {
        assert_eq!(find_process("no.such.package.shellas.test"), None);
    }

    #[test]
    fn missing_tool_is_spawn_error() {
        let err = run("shellas-no-such-tool", &[]).unwrap_err();
        assert!(matches!(err, DonorError::Spawn { .. }));
    }
}
