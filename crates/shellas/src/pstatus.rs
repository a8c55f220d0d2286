//! Kernel-exported process status.
//!
//! Extracts the identity lines of `/proc/<pid>/status`: the real user id,
//! the real primary group, and the supplementary group list. The file is a
//! snapshot; nothing here defends against pid reuse between the read and
//! whatever the caller does with the result.

use std::fs;
use std::io;

use thiserror::Error;

use crate::ids::{self, ParseError};

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("read /proc/{pid}/status: {source}")]
    Read { pid: i32, source: io::Error },

    #[error("missing {label} line in /proc/{pid}/status")]
    MissingLine { pid: i32, label: &'static str },

    #[error("malformed {label} line in /proc/{pid}/status: {source}")]
    MalformedLine {
        pid: i32,
        label: &'static str,
        source: ParseError,
    },
}

/// Identity snapshot of one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStatus {
    pub real_uid: u32,
    pub real_gid: u32,
    pub groups: Vec<u32>,
}

/// Reads the identity lines of `/proc/<pid>/status`.
pub fn read(pid: i32) -> Result<ProcessStatus, StatusError> {
    let text = fs::read_to_string(format!("/proc/{pid}/status"))
        .map_err(|source| StatusError::Read { pid, source })?;
    parse(pid, &text)
}

fn parse(pid: i32, text: &str) -> Result<ProcessStatus, StatusError> {
    let mut real_uid = None;
    let mut real_gid = None;
    let mut groups = None;

    for line in text.lines() {
        if line.starts_with("Uid:") {
            real_uid = Some(first_id(pid, line, "Uid:")?);
        } else if line.starts_with("Gid:") {
            real_gid = Some(first_id(pid, line, "Gid:")?);
        } else if line.starts_with("Groups:") {
            groups = Some(line_ids(pid, line, "Groups:")?);
        }
    }

    Ok(ProcessStatus {
        real_uid: real_uid.ok_or(StatusError::MissingLine { pid, label: "Uid:" })?,
        real_gid: real_gid.ok_or(StatusError::MissingLine { pid, label: "Gid:" })?,
        groups: groups.ok_or(StatusError::MissingLine {
            pid,
            label: "Groups:",
        })?,
    })
}

/// All ids on a status line; the label token is skipped.
fn line_ids(pid: i32, line: &str, label: &'static str) -> Result<Vec<u32>, StatusError> {
    ids::split_ids_skip(line, &[' ', '\t'], 1)
        .map_err(|source| StatusError::MalformedLine { pid, label, source })
}

/// First id on a status line (the real id on `Uid:`/`Gid:` lines).
fn first_id(pid: i32, line: &str, label: &'static str) -> Result<u32, StatusError> {
    line_ids(pid, line, label)?
        .first()
        .copied()
        .ok_or(StatusError::MalformedLine {
            pid,
            label,
            source: ParseError::Empty,
        })
}
