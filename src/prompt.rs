//! Interactive side of `unblk`: questions on stderr, answers on stdin.
//!
//! EOF on stdin cancels the whole attempt.

use std::{
	io::{BufRead as _, Write as _},
	sync::mpsc,
	time::Duration,
};

use color_eyre::eyre::{Result, bail};

use crate::{
	friction::{Confirmer, FrictionPolicy},
	hosts::Pattern,
};

fn read_line(question: &str) -> Result<Option<String>> {
	eprint!("{question} ");
	std::io::stderr().flush()?;
	let mut line = String::new();
	match std::io::stdin().lock().read_line(&mut line)? {
		0 => Ok(None),
		_ => Ok(Some(line.trim().to_string())),
	}
}

fn answer(question: &str) -> Result<String> {
	match read_line(question)? {
		Some(line) => Ok(line),
		None => bail!("Cancelled"),
	}
}

pub fn ask_reason(policy: &FrictionPolicy) -> Result<String> {
	let min = policy.config().min_reason_len;
	loop {
		match policy.check_reason(&answer(&format!("Reason (min {min} chars):"))?) {
			Ok(reason) => return Ok(reason),
			Err(denial) => eprintln!("{denial}"),
		}
	}
}

pub fn ask_duration(policy: &FrictionPolicy) -> Result<u32> {
	let presets = policy.config().presets.iter().map(ToString::to_string).collect::<Vec<_>>().join("/");
	loop {
		let raw = answer(&format!("Duration in minutes ({presets}, or custom):"))?;
		let Ok(minutes) = raw.parse::<u32>() else {
			eprintln!("Enter a valid number");
			continue;
		};
		match policy.check_duration(minutes) {
			Ok(minutes) => return Ok(minutes),
			Err(denial) => eprintln!("{denial}: {}", policy.describe_durations()),
		}
	}
}

/// `ALL`, space-separated patterns, or empty to pick from `recents`.
pub fn ask_patterns(recents: &[String]) -> Result<Vec<Pattern>> {
	let raw = answer("What to unblock? (ALL or space-separated sites, empty for recents):")?;
	if !raw.is_empty() {
		return Ok(split_patterns(&raw));
	}
	if recents.is_empty() {
		let raw = answer("No recents yet. Enter space-separated sites:")?;
		return non_empty(split_patterns(&raw));
	}

	for (i, host) in recents.iter().enumerate() {
		eprintln!("  {}) {host}", i + 1);
	}
	let raw = answer("Pick numbers (space-separated), or type sites:")?;
	let mut patterns = Vec::new();
	for token in raw.split_whitespace() {
		match token.parse::<usize>().ok().and_then(|n| n.checked_sub(1)).and_then(|i| recents.get(i)) {
			Some(host) => patterns.push(Pattern::Substring(host.clone())),
			None => patterns.extend(split_patterns(token)),
		}
	}
	non_empty(patterns)
}

fn split_patterns(raw: &str) -> Vec<Pattern> {
	raw.split_whitespace().filter_map(|s| s.parse().ok()).collect()
}

fn non_empty(patterns: Vec<Pattern>) -> Result<Vec<Pattern>> {
	if patterns.is_empty() {
		bail!("No sites provided");
	}
	Ok(patterns)
}

/// Waits for Enter on stdin.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
	fn confirm_within(&self, window: Duration) -> bool {
		eprintln!("Press Enter within {}s to confirm...", window.as_secs());
		let (tx, rx) = mpsc::channel();
		// Left blocked on stdin if the window passes; the process exits soon after.
		std::thread::spawn(move || {
			let mut line = String::new();
			let got_line = matches!(std::io::stdin().lock().read_line(&mut line), Ok(n) if n > 0);
			let _ = tx.send(got_line);
		});
		rx.recv_timeout(window).unwrap_or(false)
	}
}
