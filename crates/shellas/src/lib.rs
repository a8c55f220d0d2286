//! shellas: run a program in a fully specified Android security context.
//!
//! The launcher spawns a child and moves it into a target security posture -
//! user and group identity, supplementary groups, capability sets, seccomp
//! filter profile and SELinux label - before the child executes the first
//! instruction of its own binary.
//!
//! Two mechanisms cooperate. Attributes that a privileged process can set on
//! itself are dropped in the child before exec, in a strict order
//! ([`sequencer`]). The SELinux label cannot be set that way: an
//! unprivileged target domain is not allowed to exec most binaries, so the
//! parent traces the child across the exec boundary, stops it at the
//! binary's declared entry point, and injects code that makes the tracee
//! transition itself ([`tracer`], [`image`], [`payload`]).
//!
//! ## Quick start
//!
//! ```ignore
//! use std::ffi::CString;
//! use shellas::{launch, SecurityContext};
//!
//! let context = SecurityContext {
//!     user_id: Some(10123),
//!     group_id: Some(10123),
//!     ..Default::default()
//! };
//! let argv = vec![CString::new("/system/bin/id")?];
//! launch(&context, &argv)?;
//! ```
//!
//! Contexts come from the CLI, from a reference process (`--pid`), or from
//! the embedded donor application (`--profile untrusted-app`); see [`infer`]
//! and [`donor`].

pub mod captext;
pub mod context;
pub mod donor;
pub mod ids;
pub mod image;
pub mod infer;
pub mod launcher;
pub mod payload;
pub mod pstatus;
pub mod sequencer;
pub mod tracer;

pub use context::{FilterProfile, SecurityContext};
pub use launcher::{launch, LaunchError};
