//! Resolution of user-supplied site patterns against managed entries.

use std::{collections::BTreeSet, convert::Infallible, str::FromStr};

use serde::Serialize;

use super::entry::HostEntry;
use crate::error::Denial;

/// A site pattern as typed by the user.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, derive_more::Display)]
pub enum Pattern {
	/// `all`/`ALL`: every currently-active `BLOCKME` hostname.
	#[display("ALL")]
	All,
	/// Case-insensitive substring of a hostname.
	#[display("{_0}")]
	Substring(String),
}

impl Pattern {
	pub fn is_wildcard(&self) -> bool {
		matches!(self, Pattern::All)
	}

	/// Length check applied before resolution; the wildcard is always valid.
	pub fn validate(&self, min_len: usize) -> Result<(), Denial> {
		match self {
			Pattern::All => Ok(()),
			Pattern::Substring(s) if s.chars().count() >= min_len => Ok(()),
			Pattern::Substring(s) => Err(Denial::InvalidPattern { pattern: s.clone(), min_len }),
		}
	}

	/// Hostnames of `entries` this pattern selects. `NEVERBLOCK` entries are never selected.
	pub fn resolve(&self, entries: &[HostEntry]) -> BTreeSet<String> {
		let blockable = entries.iter().filter(|e| e.is_blockable());
		match self {
			Pattern::All => blockable.filter(|e| e.active).map(|e| e.hostname.clone()).collect(),
			Pattern::Substring(needle) => {
				let needle = needle.to_lowercase();
				blockable.filter(|e| e.hostname.to_lowercase().contains(&needle)).map(|e| e.hostname.clone()).collect()
			}
		}
	}
}

impl FromStr for Pattern {
	type Err = Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		Ok(match s.eq_ignore_ascii_case("all") {
			true => Pattern::All,
			false => Pattern::Substring(s.to_string()),
		})
	}
}

/// Outcome of resolving a whole request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Resolution {
	pub hostnames: BTreeSet<String>,
	/// Patterns that matched nothing. Reported as warnings.
	pub unmatched: Vec<Pattern>,
}

/// Resolve every pattern; fails only when all of them match nothing.
pub fn resolve_all(patterns: &[Pattern], entries: &[HostEntry]) -> Result<Resolution, Denial> {
	let mut resolution = Resolution::default();
	for pattern in patterns {
		let matched = pattern.resolve(entries);
		if matched.is_empty() {
			tracing::warn!(%pattern, "pattern matched no managed entries");
			resolution.unmatched.push(pattern.clone());
		}
		resolution.hostnames.extend(matched);
	}
	if resolution.hostnames.is_empty() {
		return Err(Denial::NoMatchingEntries {
			patterns: patterns.iter().map(ToString::to_string).collect(),
		});
	}
	Ok(resolution)
}
