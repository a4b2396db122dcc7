//! Stand-ins for the OS-facing collaborators, used by unit tests and by `--mock` runs.
//!
//! Every mock call is reported as a `target: "mock"` tracing event, which is what the
//! integration tests assert against.

use std::{
	cell::Cell,
	path::{Path, PathBuf},
	sync::{Arc, Mutex},
	time::Duration,
};

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

use crate::{
	error::{PrivilegeError, SchedulerError},
	friction::Sleeper,
	platform::ImmutabilityToggle,
	scheduler::{ReblockJob, Scheduler},
};

thread_local! {
	/// Frozen "now" of the current test thread; `None` means the real clock.
	static FROZEN_NOW: Cell<Option<Timestamp>> = const { Cell::new(None) };
}

/// Clock swapped in for [`Timestamp`] under `cfg(test)`. Each test thread freezes it with
/// [`set_timestamp`]; until then it reads the real clock.
pub struct MockTimestamp;

impl MockTimestamp {
	pub fn now() -> Timestamp {
		FROZEN_NOW.get().unwrap_or_else(Timestamp::now)
	}
}

pub fn set_timestamp(timestamp: Timestamp) {
	tracing::debug!(target: "mock", call = "set_timestamp", %timestamp);
	FROZEN_NOW.set(Some(timestamp));
}

/// Move the frozen clock of this thread forward by `by`.
pub fn advance_timestamp(by: SignedDuration) -> Result<Timestamp, jiff::Error> {
	let next = MockTimestamp::now().checked_add(by)?;
	set_timestamp(next);
	Ok(next)
}

/// Records flag toggles instead of running `chattr`/`chflags`.
#[derive(Clone, Debug, Default)]
pub struct MockImmutability {
	calls: Arc<Mutex<Vec<&'static str>>>,
	fail: bool,
}

impl MockImmutability {
	/// Every toggle is refused as if we were not root.
	pub fn failing() -> Self {
		Self { fail: true, ..Self::default() }
	}

	pub fn calls(&self) -> Arc<Mutex<Vec<&'static str>>> {
		Arc::clone(&self.calls)
	}

	fn record(&self, call: &'static str, path: &Path) -> Result<(), PrivilegeError> {
		tracing::info!(target: "mock", call, path = %path.display(), "immutability toggle");
		if self.fail {
			return Err(PrivilegeError::PermissionDenied {
				path: path.to_path_buf(),
				source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
			});
		}
		if let Ok(mut calls) = self.calls.lock() {
			calls.push(call);
		}
		Ok(())
	}
}

impl ImmutabilityToggle for MockImmutability {
	fn set_immutable(&self, path: &Path) -> Result<(), PrivilegeError> {
		self.record("set", path)
	}

	fn clear_immutable(&self, path: &Path) -> Result<(), PrivilegeError> {
		self.record("clear", path)
	}
}

/// Serves the delay instantly and remembers what it was asked for.
#[derive(Clone, Debug, Default)]
pub struct MockSleeper {
	slept: Arc<Mutex<Vec<Duration>>>,
}

impl MockSleeper {
	pub fn slept(&self) -> Vec<Duration> {
		self.slept.lock().map(|s| s.clone()).unwrap_or_default()
	}
}

impl Sleeper for MockSleeper {
	fn sleep(&self, duration: Duration) {
		tracing::info!(target: "mock", call = "sleep", secs = duration.as_secs(), "friction delay skipped");
		if let Ok(mut slept) = self.slept.lock() {
			slept.push(duration);
		}
	}
}

#[cfg(test)]
#[derive(Clone, Copy, Debug, derive_new::new)]
pub struct MockConfirmer {
	answer: bool,
}

#[cfg(test)]
impl crate::friction::Confirmer for MockConfirmer {
	fn confirm_within(&self, window: Duration) -> bool {
		tracing::info!(target: "mock", call = "confirm_within", secs = window.as_secs(), answer = self.answer);
		self.answer
	}
}

/// Persisted so that separate `--mock` invocations (and the test driving them) share one queue.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MockSchedulerState {
	/// Makes `check_available` fail.
	pub unavailable: bool,
	/// Number of upcoming `schedule_at` calls to reject.
	pub reject_next: u32,
	pub attempts: u32,
	pub jobs: Vec<MockJob>,
	pub cancelled: Vec<MockJob>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MockJob {
	pub at: Timestamp,
	pub hostnames: Vec<String>,
	pub script: String,
}

/// [`Scheduler`] backed by a JSON file instead of `atd`.
#[derive(Clone, Debug)]
pub struct MockScheduler {
	path: PathBuf,
}

impl MockScheduler {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn state(&self) -> Result<MockSchedulerState, SchedulerError> {
		match std::fs::read_to_string(&self.path) {
			Ok(s) => serde_json::from_str(&s).map_err(|e| SchedulerError::Rejected {
				detail: format!("corrupt mock scheduler state {}: {e}", self.path.display()),
			}),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MockSchedulerState::default()),
			Err(e) => Err(e.into()),
		}
	}

	pub fn save(&self, state: &MockSchedulerState) -> Result<(), SchedulerError> {
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let json = serde_json::to_string_pretty(state).map_err(|e| SchedulerError::Rejected { detail: e.to_string() })?;
		std::fs::write(&self.path, json)?;
		Ok(())
	}
}

impl Scheduler for MockScheduler {
	fn check_available(&self) -> Result<(), SchedulerError> {
		let state = self.state()?;
		tracing::info!(target: "mock", call = "check_available", available = !state.unavailable);
		match state.unavailable {
			true => Err(SchedulerError::Unavailable {
				detail: "mock scheduler marked unavailable".to_string(),
			}),
			false => Ok(()),
		}
	}

	fn schedule_at(&self, at: Timestamp, job: &ReblockJob) -> Result<(), SchedulerError> {
		let mut state = self.state()?;
		state.attempts += 1;
		tracing::info!(target: "mock", call = "schedule_at", %at, hostnames = ?job.hostnames(), attempt = state.attempts);
		let result = match state.reject_next {
			0 => {
				state.jobs.push(MockJob {
					at,
					hostnames: job.hostnames().iter().cloned().collect(),
					script: job.script(),
				});
				Ok(())
			}
			n => {
				state.reject_next = n - 1;
				Err(SchedulerError::Rejected {
					detail: "mock scheduler rejected the job".to_string(),
				})
			}
		};
		self.save(&state)?;
		result
	}

	fn cancel_pending(&self) -> Result<usize, SchedulerError> {
		let mut state = self.state()?;
		let jobs = std::mem::take(&mut state.jobs);
		let n = jobs.len();
		tracing::info!(target: "mock", call = "cancel_pending", cancelled = n);
		state.cancelled.extend(jobs);
		self.save(&state)?;
		Ok(n)
	}
}
