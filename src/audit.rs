//! Append-only record of what was unblocked, why, and for how long.
//!
//! One `;`-separated line per event. Denied attempts are never recorded.

use std::{
	collections::BTreeSet,
	fs::OpenOptions,
	io::{self, Write as _},
	path::{Path, PathBuf},
};

use jiff::{Timestamp, tz::TimeZone};

use crate::unblock::UnblockGrant;

#[derive(Clone, Debug)]
pub struct AuditLog {
	path: PathBuf,
	tz: TimeZone,
}

impl AuditLog {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			tz: TimeZone::system(),
		}
	}

	pub fn with_time_zone(mut self, tz: TimeZone) -> Self {
		self.tz = tz;
		self
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn record_unblock(&self, grant: &UnblockGrant) -> io::Result<()> {
		let mut line = format!(
			"{}; UNBLOCK; Duration: {} minutes; Reason: {}; Hosts: {}",
			self.stamp(grant.granted_at),
			grant.duration_minutes,
			single_line(&grant.reason),
			join(&grant.hostnames)
		);
		if grant.patterns.iter().any(|p| p.is_wildcard()) {
			line.push_str("; Scope: ALL");
		}
		self.append(&line)
	}

	pub fn record_block(&self, at: Timestamp) -> io::Result<()> {
		self.append(&format!("{}; BLOCK", self.stamp(at)))
	}

	pub fn record_reblock(&self, at: Timestamp, hostnames: &BTreeSet<String>) -> io::Result<()> {
		self.append(&format!("{}; REBLOCK; Hosts: {}", self.stamp(at), join(hostnames)))
	}

	fn stamp(&self, at: Timestamp) -> String {
		at.to_zoned(self.tz.clone()).strftime("%Y-%m-%d %H:%M:%S").to_string()
	}

	fn append(&self, line: &str) -> io::Result<()> {
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
		writeln!(file, "{line}")
	}
}

fn single_line(s: &str) -> String {
	s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn join(hostnames: &BTreeSet<String>) -> String {
	hostnames.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
