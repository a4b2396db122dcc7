//! Error taxonomy.
//!
//! Denials are expected outcomes of an unblock attempt and never mutate anything. Everything else
//! is fatal for the invocation, and is raised only in ways that leave no partial hosts-file state.

#![allow(unused_assignments)] // Fields are read by miette's derive macro via attributes

use std::{path::PathBuf, process::ExitStatus};

use jiff::Timestamp;
use miette::Diagnostic;
use thiserror::Error;

/// Which part of the error taxonomy a [`Denial`] belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DenialClass {
	/// Bad reason/duration/pattern. Interactive callers may re-prompt.
	Validation,
	/// The request was well-formed but policy forbids it right now.
	Policy,
}

/// Terminal `Denied` state of the friction state machine.
#[derive(Clone, Debug, Diagnostic, Error, Eq, PartialEq)]
pub enum Denial {
	#[error("unblocking is locked until {until}")]
	#[diagnostic(code(blkunblk::denied::lock_active), help("check the remaining time with `blk status`"))]
	LockActive { until: Timestamp },

	#[error("reason must be at least {min_len} characters (got {len})")]
	#[diagnostic(code(blkunblk::denied::reason_too_short))]
	ReasonTooShort { len: usize, min_len: usize },

	#[error("invalid duration: {minutes} minutes")]
	#[diagnostic(code(blkunblk::denied::invalid_duration), help("{allowed}"))]
	InvalidDuration { minutes: u32, allowed: String },

	#[error("pattern must be at least {min_len} characters: {pattern}")]
	#[diagnostic(code(blkunblk::denied::invalid_pattern))]
	InvalidPattern { pattern: String, min_len: usize },

	#[error("no managed entries match: {}", patterns.join(", "))]
	#[diagnostic(code(blkunblk::denied::no_matching_entries), help("only lines tagged `# BLOCKME` can be unblocked; see `blk status`"))]
	NoMatchingEntries { patterns: Vec<String> },

	#[error("confirmation window of {secs}s expired")]
	#[diagnostic(code(blkunblk::denied::confirmation_timed_out))]
	ConfirmationTimedOut { secs: u64 },
}

impl Denial {
	pub fn class(&self) -> DenialClass {
		match self {
			Denial::ReasonTooShort { .. } | Denial::InvalidDuration { .. } | Denial::InvalidPattern { .. } => DenialClass::Validation,
			Denial::LockActive { .. } | Denial::NoMatchingEntries { .. } | Denial::ConfirmationTimedOut { .. } => DenialClass::Policy,
		}
	}
}

/// Toggling the immutability flag (or writing the file) needs privileges we do not have.
#[derive(Debug, Diagnostic, Error)]
pub enum PrivilegeError {
	#[error("failed to run `{program}`")]
	#[diagnostic(code(blkunblk::privilege::spawn), help("is `{program}` installed and are you running as root?"))]
	Spawn {
		program: &'static str,
		#[source]
		source: std::io::Error,
	},

	#[error("`{program}` refused to change flags on {}: {status}: {stderr}", path.display())]
	#[diagnostic(code(blkunblk::privilege::rejected), help("run with sudo, or set `immutability = \"none\"` on filesystems without attribute support"))]
	Rejected {
		program: &'static str,
		path: PathBuf,
		status: ExitStatus,
		stderr: String,
	},

	#[error("permission denied on {}", path.display())]
	#[diagnostic(code(blkunblk::privilege::denied), help("run with sudo"))]
	PermissionDenied {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

#[derive(Debug, Diagnostic, Error)]
pub enum HostsError {
	#[error(transparent)]
	#[diagnostic(transparent)]
	Privilege(#[from] PrivilegeError),

	#[error("could not lock {} after {attempts} attempts", path.display())]
	#[diagnostic(code(blkunblk::hosts::concurrency_conflict), help("another blk/unblk invocation is holding the hosts file"))]
	ConcurrencyConflict { path: PathBuf, attempts: u32 },

	#[error("I/O error on {}", path.display())]
	#[diagnostic(code(blkunblk::hosts::io))]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

impl HostsError {
	pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		let path = path.into();
		match source.kind() {
			std::io::ErrorKind::PermissionDenied => PrivilegeError::PermissionDenied { path, source }.into(),
			_ => HostsError::Io { path, source },
		}
	}
}

#[derive(Debug, Diagnostic, Error)]
pub enum SchedulerError {
	#[error("scheduler is unavailable: {detail}")]
	#[diagnostic(code(blkunblk::scheduler::unavailable), help("install `at` and make sure `atd` is running"))]
	Unavailable { detail: String },

	#[error("scheduler rejected the job: {detail}")]
	#[diagnostic(code(blkunblk::scheduler::rejected))]
	Rejected { detail: String },

	#[error("scheduler I/O error")]
	#[diagnostic(code(blkunblk::scheduler::io))]
	Io(#[from] std::io::Error),
}

/// Everything [`UnblockFlow`](crate::unblock::UnblockFlow) can fail with.
#[derive(Debug, Diagnostic, Error)]
pub enum UnblockError {
	#[error(transparent)]
	#[diagnostic(transparent)]
	Denied(#[from] Denial),

	#[error(transparent)]
	#[diagnostic(transparent)]
	Hosts(#[from] HostsError),

	#[error("could not schedule the automatic re-block after {attempts} attempt(s); nothing was unblocked")]
	#[diagnostic(code(blkunblk::unblock::scheduler_unavailable))]
	SchedulerUnavailable {
		attempts: u32,
		#[source]
		source: SchedulerError,
	},

	#[error("scheduling failed and re-blocking {} also failed; run `blk` now", hostnames.join(", "))]
	#[diagnostic(code(blkunblk::unblock::rollback_failed))]
	RollbackFailed {
		hostnames: Vec<String>,
		scheduler: SchedulerError,
		#[source]
		source: HostsError,
	},
}

impl UnblockError {
	pub fn denial(&self) -> Option<&Denial> {
		match self {
			UnblockError::Denied(d) => Some(d),
			_ => None,
		}
	}
}
