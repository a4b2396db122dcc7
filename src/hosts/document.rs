//! In-memory hosts file with the pure block/suppress/activate rewrites.
//!
//! Only managed lines whose state actually changes are re-rendered; every other line, including
//! its terminator, is emitted byte-for-byte. `NEVERBLOCK` lines are forced active by every rewrite.

use std::collections::BTreeSet;

use super::entry::{HostEntry, Tag, classify_line, render_active, render_suppressed, render_unsuppressed};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LineEnding {
	Lf,
	CrLf,
	None,
}

impl LineEnding {
	fn as_str(&self) -> &'static str {
		match self {
			LineEnding::Lf => "\n",
			LineEnding::CrLf => "\r\n",
			LineEnding::None => "",
		}
	}
}

#[derive(Clone, Debug)]
struct RawLine {
	text: String,
	ending: LineEnding,
	entry: Option<HostEntry>,
}

impl RawLine {
	fn parse(raw: &str) -> Self {
		let (text, ending) = if let Some(t) = raw.strip_suffix("\r\n") {
			(t, LineEnding::CrLf)
		} else if let Some(t) = raw.strip_suffix('\n') {
			(t, LineEnding::Lf)
		} else {
			(raw, LineEnding::None)
		};
		Self {
			text: text.to_string(),
			ending,
			entry: classify_line(text),
		}
	}

	fn set_active(&mut self, active: bool, activation: Activation) {
		let Some(entry) = self.entry.as_mut() else { return };
		if entry.active == active {
			return;
		}
		self.text = match (active, activation) {
			(true, Activation::Normalize) => render_active(&self.text),
			(true, Activation::Unsuppress) => render_unsuppressed(&self.text),
			(false, _) => render_suppressed(&self.text),
		};
		entry.active = active;
	}
}

/// How a commented-out line is brought back.
#[derive(Clone, Copy, Debug)]
enum Activation {
	/// Strip every leading `#` and the indentation.
	Normalize,
	/// Drop only the `#` that [`HostsDocument::suppress`] added.
	Unsuppress,
}

/// Parsed hosts file.
#[derive(Clone, Debug, Default)]
pub struct HostsDocument {
	lines: Vec<RawLine>,
}

impl HostsDocument {
	pub fn parse(content: &str) -> Self {
		Self {
			lines: content.split_inclusive('\n').map(RawLine::parse).collect(),
		}
	}

	pub fn render(&self) -> String {
		let mut out = String::new();
		for line in &self.lines {
			out.push_str(&line.text);
			out.push_str(line.ending.as_str());
		}
		out
	}

	/// All managed entries, in file order.
	pub fn entries(&self) -> Vec<HostEntry> {
		self.lines.iter().filter_map(|l| l.entry.clone()).collect()
	}

	/// Re-activate every managed entry. Returns the hostnames that changed state.
	pub fn block_all(&mut self) -> BTreeSet<String> {
		self.rewrite(Activation::Normalize, |_| Some(true))
	}

	/// Comment out the active `BLOCKME` entries whose hostname is in `hostnames`.
	/// Returns the hostnames that were actually suppressed by this call.
	pub fn suppress(&mut self, hostnames: &BTreeSet<String>) -> BTreeSet<String> {
		self.rewrite(Activation::Normalize, |entry| (entry.active && contains(hostnames, entry)).then_some(false))
	}

	/// Re-activate exactly the suppressed `BLOCKME` entries whose hostname is in `hostnames`.
	pub fn activate(&mut self, hostnames: &BTreeSet<String>) -> BTreeSet<String> {
		self.rewrite(Activation::Normalize, |entry| (!entry.active && contains(hostnames, entry)).then_some(true))
	}

	/// Undo a [`Self::suppress`] of `hostnames`: like [`Self::activate`], but a line keeps the
	/// exact bytes it had before it was suppressed.
	pub fn unsuppress(&mut self, hostnames: &BTreeSet<String>) -> BTreeSet<String> {
		self.rewrite(Activation::Unsuppress, |entry| (!entry.active && contains(hostnames, entry)).then_some(true))
	}

	/// Apply `decide` to every `BLOCKME` entry; `Some(active)` sets the new state.
	fn rewrite(&mut self, activation: Activation, decide: impl Fn(&HostEntry) -> Option<bool>) -> BTreeSet<String> {
		let mut changed = BTreeSet::new();
		for line in &mut self.lines {
			let Some(entry) = &line.entry else { continue };
			let target = match entry.tag {
				Tag::NeverBlock => Some(true),
				Tag::BlockMe => decide(entry),
			};
			let Some(active) = target else { continue };
			if entry.active != active {
				if entry.tag == Tag::BlockMe {
					changed.insert(entry.hostname.clone());
				}
				line.set_active(active, activation);
			}
		}
		changed
	}
}

fn contains(hostnames: &BTreeSet<String>, entry: &HostEntry) -> bool {
	hostnames.iter().any(|h| entry.hostname_eq(h))
}
