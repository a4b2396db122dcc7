//! Per-line classification of the hosts file.
//!
//! A managed line has the shape `<ip> <hostname> # <TAG>`, optionally prefixed by one or more `#`
//! when it is suppressed. Everything else is unmanaged and must be passed through untouched.

use std::{net::IpAddr, sync::LazyLock};

use regex::Regex;
use serde::Serialize;

static MANAGED_LINE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^\s*(?P<comment>#[#\s]*)?(?P<ip>[0-9A-Fa-f:.]+)\s+(?P<host>[^\s#]+)\s*#\s*(?P<tag>BLOCKME|NEVERBLOCK)\s*$").unwrap()
});

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, derive_more::Display)]
pub enum Tag {
	#[display("BLOCKME")]
	#[serde(rename = "BLOCKME")]
	BlockMe,
	#[display("NEVERBLOCK")]
	#[serde(rename = "NEVERBLOCK")]
	NeverBlock,
}

impl Tag {
	fn decode(s: &str) -> Option<Self> {
		match s {
			"BLOCKME" => Some(Self::BlockMe),
			"NEVERBLOCK" => Some(Self::NeverBlock),
			_ => None,
		}
	}
}

/// One managed line of the hosts file.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct HostEntry {
	pub ip_address: IpAddr,
	pub hostname: String,
	pub tag: Tag,
	/// Uncommented, i.e. actually blocking resolution.
	pub active: bool,
}

impl HostEntry {
	/// Only `BLOCKME` entries may ever be suppressed.
	pub fn is_blockable(&self) -> bool {
		self.tag == Tag::BlockMe
	}

	pub fn is_suppressed(&self) -> bool {
		!self.active
	}

	pub fn hostname_eq(&self, other: &str) -> bool {
		self.hostname.eq_ignore_ascii_case(other)
	}
}

/// Classify a single line (without its terminator). `None` means unmanaged.
pub fn classify_line(line: &str) -> Option<HostEntry> {
	let caps = MANAGED_LINE.captures(line)?;
	let ip_address = caps["ip"].parse::<IpAddr>().ok()?;
	let tag = Tag::decode(&caps["tag"])?;
	Some(HostEntry {
		ip_address,
		hostname: caps["host"].to_string(),
		tag,
		active: caps.name("comment").is_none(),
	})
}

/// Render a managed line as active: leading indentation and every leading `#` are stripped.
pub(super) fn render_active(line: &str) -> String {
	line.trim_start_matches(|c: char| c == '#' || c.is_whitespace()).to_string()
}

/// Undo [`render_suppressed`]: drop exactly the one `#` it added when what remains is an active
/// managed line, so indentation and spacing come back untouched. Otherwise same as [`render_active`].
pub(super) fn render_unsuppressed(line: &str) -> String {
	match line.strip_prefix('#') {
		Some(rest) if classify_line(rest).is_some_and(|e| e.active) => rest.to_string(),
		_ => render_active(line),
	}
}

/// Render a managed line as suppressed. The rest of the line is kept as-is so that
/// [`render_unsuppressed`] restores the exact original bytes.
pub(super) fn render_suppressed(line: &str) -> String {
	format!("#{line}")
}
