//! Hosts file storage.
//!
//! # Module Structure
//!
//! - `entry`: per-line classification (`classify_line`, `HostEntry`, `Tag`)
//! - `document`: parsed file and the pure rewrites (block all, suppress, activate)
//! - `pattern`: resolution of user patterns to hostnames
//!
//! [`HostsStore`] owns the on-disk side: every mutation is a read-modify-write cycle under an
//! exclusive lock keyed on the hosts file itself, with the immutability flag cleared right before
//! the atomic replace and re-applied right after.

mod document;
mod entry;
mod pattern;

use std::{
	collections::BTreeSet,
	fs::{File, OpenOptions},
	io::Write as _,
	path::{Path, PathBuf},
	time::Duration,
};

pub use document::HostsDocument;
pub use entry::{HostEntry, Tag, classify_line};
use fs2::FileExt;
pub use pattern::{Pattern, Resolution, resolve_all};
use tracing::instrument;

use crate::{error::HostsError, platform::ImmutabilityToggle};

/// How long to keep trying for the hosts lock.
#[derive(Clone, Copy, Debug, derive_new::new)]
pub struct LockRetry {
	pub attempts: u32,
	pub delay: Duration,
}

impl Default for LockRetry {
	fn default() -> Self {
		Self::new(50, Duration::from_millis(100))
	}
}

/// Exclusive advisory lock, released on drop.
///
/// The hosts file itself is replaced by rename on every write, so the lock lives on a sidecar
/// next to it (see [`lock_path_for`]) that is never replaced.
#[derive(Debug)]
struct HostsLock {
	file: File,
}

impl HostsLock {
	fn acquire(path: &Path, retry: LockRetry) -> Result<Self, HostsError> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).map_err(|e| HostsError::io(parent, e))?;
		}
		let file = OpenOptions::new()
			.create(true)
			.truncate(false)
			.write(true)
			.open(path)
			.map_err(|e| HostsError::io(path, e))?;

		let contended = fs2::lock_contended_error().kind();
		for attempt in 1..=retry.attempts.max(1) {
			match file.try_lock_exclusive() {
				Ok(()) => return Ok(Self { file }),
				Err(e) if e.kind() == contended => {
					tracing::debug!(attempt, "hosts lock is held, retrying");
					std::thread::sleep(retry.delay);
				}
				Err(e) => return Err(HostsError::io(path, e)),
			}
		}
		Err(HostsError::ConcurrencyConflict {
			path: path.to_path_buf(),
			attempts: retry.attempts.max(1),
		})
	}
}

impl Drop for HostsLock {
	fn drop(&mut self) {
		let _ = FileExt::unlock(&self.file);
	}
}

/// `<dir>/.<name>.blkunblk.lock` beside the (canonical) hosts file. Every invocation editing the
/// same file agrees on it whatever its environment or config.
pub fn lock_path_for(hosts: &Path) -> PathBuf {
	let name = hosts.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "hosts".to_string());
	hosts.with_file_name(format!(".{name}.blkunblk.lock"))
}

pub struct HostsStore {
	path: PathBuf,
	immutability: Box<dyn ImmutabilityToggle>,
	retry: LockRetry,
}

impl HostsStore {
	pub fn new(path: impl Into<PathBuf>, immutability: Box<dyn ImmutabilityToggle>, retry: LockRetry) -> Self {
		Self {
			path: path.into(),
			immutability,
			retry,
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Snapshot of the managed entries. Takes no lock: callers only use it to decide what to ask
	/// for, the actual mutation re-reads under the lock.
	pub fn read_entries(&self) -> Result<Vec<HostEntry>, HostsError> {
		let content = std::fs::read_to_string(&self.path).map_err(|e| HostsError::io(&self.path, e))?;
		Ok(HostsDocument::parse(&content).entries())
	}

	/// Re-activate every managed entry.
	#[instrument(skip(self), fields(path = %self.path.display()))]
	pub fn block_all(&self) -> Result<BTreeSet<String>, HostsError> {
		self.modify(|doc| doc.block_all())
	}

	/// Suppress the given `BLOCKME` hostnames; returns the ones this call actually suppressed.
	#[instrument(skip(self), fields(path = %self.path.display()))]
	pub fn suppress(&self, hostnames: &BTreeSet<String>) -> Result<BTreeSet<String>, HostsError> {
		self.modify(|doc| doc.suppress(hostnames))
	}

	/// Re-activate exactly the given hostnames, leaving other suppressed entries alone.
	#[instrument(skip(self), fields(path = %self.path.display()))]
	pub fn activate(&self, hostnames: &BTreeSet<String>) -> Result<BTreeSet<String>, HostsError> {
		self.modify(|doc| doc.activate(hostnames))
	}

	/// Undo a [`Self::suppress`] made by this invocation, byte for byte.
	#[instrument(skip(self), fields(path = %self.path.display()))]
	pub fn unsuppress(&self, hostnames: &BTreeSet<String>) -> Result<BTreeSet<String>, HostsError> {
		self.modify(|doc| doc.unsuppress(hostnames))
	}

	fn modify<T>(&self, f: impl FnOnce(&mut HostsDocument) -> T) -> Result<T, HostsError> {
		let target = std::fs::canonicalize(&self.path).map_err(|e| HostsError::io(&self.path, e))?;
		let _lock = HostsLock::acquire(&lock_path_for(&target), self.retry)?;

		let original = std::fs::read_to_string(&target).map_err(|e| HostsError::io(&target, e))?;
		let mut doc = HostsDocument::parse(&original);
		let out = f(&mut doc);
		let rendered = doc.render();
		if rendered == original {
			tracing::debug!("hosts file already in the requested state");
			return Ok(out);
		}

		// Nothing has been touched yet if this fails.
		self.immutability.clear_immutable(&target)?;
		let written = write_atomic(&target, &rendered);
		let relocked = self.immutability.set_immutable(&target);
		written?;
		relocked?;
		tracing::info!("hosts file rewritten");
		Ok(out)
	}
}

/// Write to a sibling temp file, then rename over `target`.
fn write_atomic(target: &Path, content: &str) -> Result<(), HostsError> {
	let dir = target.parent().unwrap_or_else(|| Path::new("."));
	let mut tmp = tempfile::Builder::new().prefix(".hosts.blkunblk").tempfile_in(dir).map_err(|e| HostsError::io(dir, e))?;
	tmp.write_all(content.as_bytes()).map_err(|e| HostsError::io(tmp.path(), e))?;
	tmp.as_file().sync_all().map_err(|e| HostsError::io(tmp.path(), e))?;
	if let Ok(meta) = std::fs::metadata(target) {
		tmp.as_file().set_permissions(meta.permissions()).map_err(|e| HostsError::io(tmp.path(), e))?;
	}
	tmp.persist(target).map_err(|e| HostsError::io(target, e.error))?;
	Ok(())
}
