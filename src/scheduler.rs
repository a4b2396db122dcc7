//! One-shot reversal jobs.
//!
//! The real backend is `at(1)`: a job is a shell script fed to `at -t`, carrying [`JOB_MARKER`] so
//! that pending reversals can later be told apart from the user's own jobs.

use std::{
	collections::BTreeSet,
	io::Write as _,
	process::{Command, Stdio},
};

use jiff::{Timestamp, tz::TimeZone};
use tracing::instrument;

use crate::error::SchedulerError;

pub const JOB_MARKER: &str = "# blkunblk-reblock";

pub trait Scheduler {
	/// Must be called before any hosts-file mutation.
	fn check_available(&self) -> Result<(), SchedulerError>;
	fn schedule_at(&self, at: Timestamp, job: &ReblockJob) -> Result<(), SchedulerError>;
	/// Drop every pending reversal job; returns how many were removed.
	fn cancel_pending(&self) -> Result<usize, SchedulerError>;
}

/// Re-activate exactly `hostnames` by running `<command...> reblock <hostnames...>`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReblockJob {
	command: Vec<String>,
	hostnames: BTreeSet<String>,
}

impl ReblockJob {
	pub fn new(command: Vec<String>, hostnames: BTreeSet<String>) -> Self {
		Self { command, hostnames }
	}

	pub fn hostnames(&self) -> &BTreeSet<String> {
		&self.hostnames
	}

	pub fn argv(&self) -> Vec<String> {
		let mut argv = self.command.clone();
		argv.push("reblock".to_string());
		argv.extend(self.hostnames.iter().cloned());
		argv
	}

	pub fn script(&self) -> String {
		let line = self.argv().iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ");
		format!("{JOB_MARKER}\n{line}\n")
	}
}

/// Wrap in single quotes; embedded quotes become `'\''`.
pub fn shell_quote(arg: &str) -> String {
	format!("'{}'", arg.replace('\'', r"'\''"))
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AtScheduler;

impl AtScheduler {
	fn run(program: &str, args: &[&str]) -> Result<String, SchedulerError> {
		let output = Command::new(program).args(args).output().map_err(|e| spawn_error(program, e))?;
		if !output.status.success() {
			return Err(SchedulerError::Rejected {
				detail: format!("`{program} {}` failed: {}", args.join(" "), String::from_utf8_lossy(&output.stderr).trim()),
			});
		}
		Ok(String::from_utf8_lossy(&output.stdout).into_owned())
	}
}

fn spawn_error(program: &str, e: std::io::Error) -> SchedulerError {
	match e.kind() {
		std::io::ErrorKind::NotFound => SchedulerError::Unavailable {
			detail: format!("`{program}` is not installed"),
		},
		_ => SchedulerError::Io(e),
	}
}

/// `at -t` wants local `[[CC]YY]MMDDhhmm[.SS]`.
pub fn at_time_spec(at: Timestamp, tz: &TimeZone) -> String {
	at.to_zoned(tz.clone()).strftime("%Y%m%d%H%M.%S").to_string()
}

/// Job ids from `atq` output (first column of each line).
pub fn parse_atq(output: &str) -> Vec<String> {
	output.lines().filter_map(|l| l.split_whitespace().next()).filter(|id| id.chars().all(|c| c.is_ascii_digit())).map(str::to_string).collect()
}

impl Scheduler for AtScheduler {
	#[instrument(skip(self))]
	fn check_available(&self) -> Result<(), SchedulerError> {
		Self::run("atq", &[]).map_err(|e| match e {
			SchedulerError::Rejected { detail } => SchedulerError::Unavailable { detail },
			other => other,
		})?;
		Ok(())
	}

	#[instrument(skip(self, job), fields(hostnames = job.hostnames.len()))]
	fn schedule_at(&self, at: Timestamp, job: &ReblockJob) -> Result<(), SchedulerError> {
		let spec = at_time_spec(at, &TimeZone::system());
		let mut child = Command::new("at")
			.arg("-t")
			.arg(&spec)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()
			.map_err(|e| spawn_error("at", e))?;
		if let Some(mut stdin) = child.stdin.take() {
			stdin.write_all(job.script().as_bytes())?;
		}
		let output = child.wait_with_output()?;
		let stderr = String::from_utf8_lossy(&output.stderr);
		if !output.status.success() {
			return Err(SchedulerError::Rejected { detail: stderr.trim().to_string() });
		}
		// at reports "job N at <date>" on stderr
		tracing::info!(spec, at_says = %stderr.trim(), "reversal job registered");
		Ok(())
	}

	#[instrument(skip(self))]
	fn cancel_pending(&self) -> Result<usize, SchedulerError> {
		let mut cancelled = 0;
		for id in parse_atq(&Self::run("atq", &[])?) {
			let body = match Self::run("at", &["-c", id.as_str()]) {
				Ok(body) => body,
				Err(e) => {
					tracing::warn!(id, error = %e, "could not inspect pending job");
					continue;
				}
			};
			if body.lines().any(|l| l.trim() == JOB_MARKER) {
				Self::run("atrm", &[id.as_str()])?;
				tracing::debug!(id, "cancelled pending reversal job");
				cancelled += 1;
			}
		}
		Ok(cancelled)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn job() -> ReblockJob {
		ReblockJob::new(vec!["/usr/local/bin/blk".to_string()], BTreeSet::from(["youtube.com".to_string(), "www.youtube.com".to_string()]))
	}

	#[test]
	fn script_carries_marker_and_quoted_args() {
		insta::assert_snapshot!(job().script(), @r"
		# blkunblk-reblock
		'/usr/local/bin/blk' 'reblock' 'www.youtube.com' 'youtube.com'
		");
	}

	#[test]
	fn quotes_embedded_single_quotes() {
		assert_eq!(shell_quote("it's"), r"'it'\''s'");
		assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
	}

	#[test]
	fn time_spec_is_local() {
		let at: Timestamp = "2024-05-29T12:25:07Z".parse().unwrap();
		assert_eq!(at_time_spec(at, &TimeZone::UTC), "202405291225.07");
		assert_eq!(at_time_spec(at, &TimeZone::fixed(jiff::tz::offset(2))), "202405291425.07");
	}

	#[test]
	fn parses_atq_listing() {
		let out = "12\tWed May 29 12:25:00 2024 a root\n7\tWed May 29 13:00:00 2024 = root\n\n";
		assert_eq!(parse_atq(out), vec!["12", "7"]);
	}
}
