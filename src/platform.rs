//! OS primitives: the immutable-file flag, privilege checks and the DNS cache.

use std::{path::Path, process::Command};

use serde::Deserialize;
use tracing::instrument;

use crate::error::PrivilegeError;

/// Narrow capability for the protective immutability flag on the hosts file.
pub trait ImmutabilityToggle {
	fn set_immutable(&self, path: &Path) -> Result<(), PrivilegeError>;
	fn clear_immutable(&self, path: &Path) -> Result<(), PrivilegeError>;
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ImmutabilityBackend {
	/// `chattr` on Linux, `chflags` on macOS, nothing elsewhere.
	#[default]
	Auto,
	Chattr,
	Chflags,
	None,
}

impl ImmutabilityBackend {
	pub fn toggle(self) -> Box<dyn ImmutabilityToggle> {
		match self.resolve() {
			ImmutabilityBackend::Chattr => Box::new(FlagCommand::CHATTR),
			ImmutabilityBackend::Chflags => Box::new(FlagCommand::CHFLAGS),
			_ => Box::new(NoImmutability),
		}
	}

	fn resolve(self) -> Self {
		match self {
			ImmutabilityBackend::Auto if cfg!(target_os = "linux") => ImmutabilityBackend::Chattr,
			ImmutabilityBackend::Auto if cfg!(target_os = "macos") => ImmutabilityBackend::Chflags,
			ImmutabilityBackend::Auto => ImmutabilityBackend::None,
			other => other,
		}
	}
}

/// Flag toggling through an external program, e.g. `chattr +i` / `chattr -i`.
#[derive(Clone, Copy, Debug)]
pub struct FlagCommand {
	program: &'static str,
	set_arg: &'static str,
	clear_arg: &'static str,
}

impl FlagCommand {
	pub const CHATTR: Self = Self {
		program: "chattr",
		set_arg: "+i",
		clear_arg: "-i",
	};
	pub const CHFLAGS: Self = Self {
		program: "chflags",
		set_arg: "uchg",
		clear_arg: "nouchg",
	};

	fn run(&self, arg: &str, path: &Path) -> Result<(), PrivilegeError> {
		let output = Command::new(self.program)
			.arg(arg)
			.arg(path)
			.output()
			.map_err(|source| PrivilegeError::Spawn { program: self.program, source })?;
		if !output.status.success() {
			return Err(PrivilegeError::Rejected {
				program: self.program,
				path: path.to_path_buf(),
				status: output.status,
				stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
			});
		}
		Ok(())
	}
}

impl ImmutabilityToggle for FlagCommand {
	#[instrument(skip(self), fields(program = self.program))]
	fn set_immutable(&self, path: &Path) -> Result<(), PrivilegeError> {
		self.run(self.set_arg, path)
	}

	#[instrument(skip(self), fields(program = self.program))]
	fn clear_immutable(&self, path: &Path) -> Result<(), PrivilegeError> {
		self.run(self.clear_arg, path)
	}
}

/// For platforms (and filesystems) without an immutable flag.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoImmutability;

impl ImmutabilityToggle for NoImmutability {
	fn set_immutable(&self, _path: &Path) -> Result<(), PrivilegeError> {
		Ok(())
	}

	fn clear_immutable(&self, _path: &Path) -> Result<(), PrivilegeError> {
		Ok(())
	}
}

#[cfg(unix)]
pub fn is_root() -> bool {
	// SAFETY: geteuid has no preconditions and cannot fail.
	unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
	true
}

/// Best-effort: a stale resolver cache only delays the effect of a rewrite.
#[instrument]
pub fn flush_dns_cache() {
	let commands: &[&[&str]] = if cfg!(target_os = "macos") {
		&[&["dscacheutil", "-flushcache"], &["killall", "-HUP", "mDNSResponder"]]
	} else if cfg!(target_os = "linux") {
		&[&["resolvectl", "flush-caches"]]
	} else {
		&[]
	};
	for argv in commands {
		let Some((program, args)) = argv.split_first() else { continue };
		match Command::new(program).args(args).output() {
			Ok(out) if out.status.success() => tracing::debug!(program, "flushed DNS cache"),
			Ok(out) => tracing::warn!(program, stderr = %String::from_utf8_lossy(&out.stderr).trim(), "DNS cache flush failed"),
			Err(e) => tracing::warn!(program, error = %e, "could not run DNS cache flush"),
		}
	}
}
