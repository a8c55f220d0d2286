//! Deriving a context from a live process or a predefined profile.
//!
//! A reference process donates all six context fields: its SELinux label,
//! its permitted capability set, and the identities from its status record.
//! The `untrusted-app` profile installs and starts the embedded donor app
//! first and then reads it like any other process.

use std::fs;
use std::io;

use caps::CapSet;
use thiserror::Error;
use tracing::debug;

use crate::context::{FilterProfile, SecurityContext};
use crate::donor::{self, DonorError};
use crate::pstatus::{self, StatusError};

/// First uid the platform hands out to applications.
pub const APP_UID_START: u32 = 10000;

#[derive(Debug, Error)]
pub enum InferError {
    #[error("no user id; unable to infer an appropriate seccomp filter")]
    NoUserId,

    #[error("unknown profile {0:?}")]
    UnknownProfile(String),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("read selinux label of process {pid}: {source}")]
    Label { pid: i32, source: io::Error },

    #[error("read capabilities of process {pid}: {source}")]
    Capabilities {
        pid: i32,
        source: caps::errors::CapsError,
    },

    #[error(transparent)]
    Donor(#[from] DonorError),
}

/// Default filter for a user identity: applications get the app filter,
/// everything below the app range gets the system filter. The zygote filter
/// is never inferred.
pub fn filter_for_uid(uid: u32) -> FilterProfile {
    if uid >= APP_UID_START {
        FilterProfile::App
    } else {
        FilterProfile::System
    }
}

/// Populates `context` from the live process `pid`, filling all six fields.
///
/// On failure `context` is left untouched.
pub fn from_process(pid: i32, context: &mut SecurityContext) -> Result<(), InferError> {
    let label = read_selinux_label(pid).map_err(|source| InferError::Label { pid, source })?;
    let permitted = caps::read(Some(pid), CapSet::Permitted)
        .map_err(|source| InferError::Capabilities { pid, source })?;
    let status = pstatus::read(pid)?;
    debug!(pid, label = %label, uid = status.real_uid, "inferred context");

    context.selinux_label = Some(label);
    context.capabilities = Some(permitted);
    context.user_id = Some(status.real_uid);
    context.group_id = Some(status.real_gid);
    context.supplementary_group_ids = Some(status.groups);
    context.seccomp_filter = Some(filter_for_uid(status.real_uid));
    Ok(())
}

/// Populates `context` from a predefined profile. The only recognized
/// profile is [`donor::PROFILE_UNTRUSTED_APP`].
pub fn from_profile(profile: &str, context: &mut SecurityContext) -> Result<(), InferError> {
    if profile != donor::PROFILE_UNTRUSTED_APP {
        return Err(InferError::UnknownProfile(profile.to_string()));
    }
    let pid = donor::provision()?;
    from_process(pid, context)
}

fn read_selinux_label(pid: i32) -> io::Result<String> {
    let raw = fs::read_to_string(format!("/proc/{pid}/attr/current"))?;
    Ok(raw.trim_end_matches(['\0', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_threshold() {
        assert_eq!(filter_for_uid(0), FilterProfile::System);
        assert_eq!(filter_for_uid(1000), FilterProfile::System);
        assert_eq!(filter_for_uid(APP_UID_START - 1), FilterProfile::System);
        assert_eq!(filter_for_uid(APP_UID_START), FilterProfile::App);
        assert_eq!(filter_for_uid(10200), FilterProfile::App);
        assert_eq!(filter_for_uid(u32::MAX), FilterProfile::App);
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let mut context = SecurityContext::default();
        assert!(matches!(
            from_profile("trusted-app", &mut context),
            Err(InferError::UnknownProfile(_))
        ));
        assert!(context.user_id.is_none());
    }

    #[test]
    fn failed_inference_leaves_context_untouched() {
        let mut context = SecurityContext {
            user_id: Some(42),
            ..Default::default()
        };
        // No such pid; every proc read fails.
        assert!(from_process(-1, &mut context).is_err());
        assert_eq!(context.user_id, Some(42));
        assert!(context.selinux_label.is_none());
    }
}
