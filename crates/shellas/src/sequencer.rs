//! Pre-exec privilege drop, run in the forked child.
//!
//! The ordering is part of the contract:
//!
//! 1. primary group
//! 2. supplementary groups
//! 3. seccomp filter
//! 4. keep-capabilities flag
//! 5. user id
//! 6. capability re-expansion
//! 7. traceme + self-stop
//! 8. exec
//!
//! The filter must follow the group changes (the app profiles reject the
//! group-set syscalls) and precede the uid change (setresuid strips the
//! capabilities that installing a filter without `no_new_privs` needs). The
//! keep-capabilities flag must precede the uid change so the permitted set
//! survives it. Steps 1-6 silently no-op when their context field is absent.

use std::convert::Infallible;
use std::ffi::CString;

use caps::{CapSet, CapsHashSet};
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::unistd::{self, Gid, Uid};
use thiserror::Error;

use crate::context::{FilterProfile, SecurityContext};

#[derive(Debug, Error)]
pub enum DropError {
    #[error("set group id {gid}: {source}")]
    SetGid { gid: u32, source: nix::Error },

    #[error("set supplementary groups: {source}")]
    SetGroups { source: nix::Error },

    #[error("install {profile} seccomp filter: {source}")]
    Seccomp {
        profile: FilterProfile,
        source: rustix::io::Errno,
    },

    #[error("keep capabilities across uid change: {0}")]
    KeepCaps(caps::errors::CapsError),

    #[error("set user id {uid}: {source}")]
    SetUid { uid: u32, source: nix::Error },

    #[error("expand capability sets: {0}")]
    Capabilities(caps::errors::CapsError),

    #[error("raise SECBIT_NOROOT: {0}")]
    SecureBits(rustix::io::Errno),

    #[error("request tracing: {0}")]
    TraceMe(nix::Error),

    #[error("exec {0:?}: {1}")]
    Exec(CString, nix::Error),
}

/// One element of the drop sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    SetGid,
    SetGroups,
    SeccompFilter,
    KeepCaps,
    SetUid,
    ExpandCaps,
    TraceMe,
    Exec,
}

/// The steps [`drop_and_exec`] will take for `context`, in order.
/// Absent-field steps are elided; the keep-capabilities flag, the tracing
/// handshake and the exec always run.
pub fn plan(context: &SecurityContext) -> Vec<Step> {
    let mut steps = Vec::new();
    if context.group_id.is_some() {
        steps.push(Step::SetGid);
    }
    if context.supplementary_group_ids.is_some() {
        steps.push(Step::SetGroups);
    }
    if context.seccomp_filter.is_some() {
        steps.push(Step::SeccompFilter);
    }
    steps.push(Step::KeepCaps);
    if context.user_id.is_some() {
        steps.push(Step::SetUid);
    }
    if context.capabilities.is_some() {
        steps.push(Step::ExpandCaps);
    }
    steps.push(Step::TraceMe);
    steps.push(Step::Exec);
    steps
}

/// Drops into `context` and execs `argv`. Only returns on failure.
pub fn drop_and_exec(
    context: &SecurityContext,
    argv: &[CString],
) -> Result<Infallible, DropError> {
    if let Some(gid) = context.group_id {
        let id = Gid::from_raw(gid);
        unistd::setresgid(id, id, id).map_err(|source| DropError::SetGid { gid, source })?;
    }

    if let Some(ref group_ids) = context.supplementary_group_ids {
        let groups: Vec<Gid> = group_ids.iter().copied().map(Gid::from_raw).collect();
        unistd::setgroups(&groups).map_err(|source| DropError::SetGroups { source })?;
    }

    if let Some(profile) = context.seccomp_filter {
        install_filter(profile).map_err(|source| DropError::Seccomp { profile, source })?;
    }

    caps::securebits::set_keepcaps(true).map_err(DropError::KeepCaps)?;

    if let Some(uid) = context.user_id {
        let id = Uid::from_raw(uid);
        unistd::setresuid(id, id, id).map_err(|source| DropError::SetUid { uid, source })?;
    }

    if let Some(ref permitted) = context.capabilities {
        expand_capabilities(permitted)?;
    }

    ptrace::traceme().map_err(DropError::TraceMe)?;
    // Hold here until the parent has attached its options.
    signal::raise(Signal::SIGSTOP).map_err(DropError::TraceMe)?;

    unistd::execv(&argv[0], argv).map_err(|source| DropError::Exec(argv[0].clone(), source))
}

fn install_filter(profile: FilterProfile) -> Result<(), rustix::io::Errno> {
    match profile {
        FilterProfile::App => shellas_sys::seccomp::install_app_filter(),
        FilterProfile::AppZygote => shellas_sys::seccomp::install_app_zygote_filter(),
        FilterProfile::System => shellas_sys::seccomp::install_system_filter(),
    }
}

/// Rebuilds the capability sets after the identity change so the desired
/// permitted bits survive the exec boundary.
fn expand_capabilities(permitted: &CapsHashSet) -> Result<(), DropError> {
    // Everything the kernel supports goes into the inheritable set first; it
    // bounds what can cross execve at all. The effective set is raised too,
    // since setresuid cleared it and the securebits prctl needs
    // CAP_SETPCAP effective.
    let supported = caps::runtime::thread_all_supported();
    caps::set(None, CapSet::Inheritable, &supported).map_err(DropError::Capabilities)?;
    caps::set(None, CapSet::Effective, &supported).map_err(DropError::Capabilities)?;

    // Only the ambient set actually carries capabilities to the new image.
    caps::clear(None, CapSet::Ambient).map_err(DropError::Capabilities)?;
    for &cap in permitted {
        if !supported.contains(&cap) {
            continue;
        }
        caps::raise(None, CapSet::Ambient, cap).map_err(DropError::Capabilities)?;
    }

    // Without SECBIT_NOROOT a uid-0 exec would re-raise the full permitted
    // set and ignore the ambient surgery above.
    shellas_sys::securebits::raise_noroot().map_err(DropError::SecureBits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_context() -> SecurityContext {
        SecurityContext {
            user_id: Some(10123),
            group_id: Some(10123),
            supplementary_group_ids: Some(vec![3003]),
            selinux_label: Some("u:r:untrusted_app:s0".to_string()),
            seccomp_filter: Some(FilterProfile::App),
            capabilities: Some(CapsHashSet::new()),
        }
    }

    #[test]
    fn full_context_runs_every_step_in_order() {
        assert_eq!(
            plan(&full_context()),
            vec![
                Step::SetGid,
                Step::SetGroups,
                Step::SeccompFilter,
                Step::KeepCaps,
                Step::SetUid,
                Step::ExpandCaps,
                Step::TraceMe,
                Step::Exec,
            ]
        );
    }

    #[test]
    fn absent_fields_elide_their_steps() {
        let context = SecurityContext {
            user_id: Some(0),
            ..Default::default()
        };
        assert_eq!(
            plan(&context),
            vec![Step::KeepCaps, Step::SetUid, Step::TraceMe, Step::Exec]
        );
    }

    #[test]
    fn empty_context_still_hands_off_and_execs() {
        assert_eq!(
            plan(&SecurityContext::default()),
            vec![Step::KeepCaps, Step::TraceMe, Step::Exec]
        );
    }

    #[test]
    fn cleared_groups_still_run_the_group_step() {
        let context = SecurityContext {
            supplementary_group_ids: Some(Vec::new()),
            ..Default::default()
        };
        assert!(plan(&context).contains(&Step::SetGroups));
    }

    #[test]
    fn subset_order_is_a_subsequence_of_the_full_order() {
        let full = plan(&full_context());
        let subset = plan(&SecurityContext {
            group_id: Some(1),
            capabilities: Some(CapsHashSet::new()),
            ..Default::default()
        });
        let mut it = full.iter();
        for step in &subset {
            assert!(it.any(|s| s == step), "{step:?} out of order");
        }
    }
}
