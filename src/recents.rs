//! Recently unblocked hostnames, offered as shortcuts by the interactive prompt.

use std::{
	io,
	path::{Path, PathBuf},
};

#[derive(Clone, Debug)]
pub struct RecentsList {
	path: PathBuf,
	max: usize,
}

impl RecentsList {
	pub fn new(path: impl Into<PathBuf>, max: usize) -> Self {
		Self { path: path.into(), max }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Most recent first. Missing file reads as empty.
	pub fn load(&self) -> io::Result<Vec<String>> {
		match std::fs::read_to_string(&self.path) {
			Ok(s) => Ok(s.lines().map(str::trim).filter(|l| !l.is_empty()).take(self.max).map(str::to_string).collect()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
			Err(e) => Err(e),
		}
	}

	/// Push `hostnames` to the front, dropping duplicates and anything past `max`.
	pub fn record<'a>(&self, hostnames: impl IntoIterator<Item = &'a str>) -> io::Result<Vec<String>> {
		let mut recents: Vec<String> = hostnames.into_iter().map(str::to_string).collect();
		recents.dedup();
		for old in self.load()? {
			if !recents.iter().any(|r| r.eq_ignore_ascii_case(&old)) {
				recents.push(old);
			}
		}
		recents.truncate(self.max);

		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let mut body = recents.join("\n");
		body.push('\n');
		std::fs::write(&self.path, body)?;
		Ok(recents)
	}
}
