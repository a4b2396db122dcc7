//! Granting a temporary unblock.
//!
//! The flow runs the friction state machine, then commits in this order: suppress the resolved
//! hostnames, register the reversal job, write the audit line, update recents. A reversal that
//! cannot be registered undoes the suppression before the error is returned, so no hostname is
//! ever left unblocked without a pending re-block.

use std::{collections::BTreeSet, time::Duration};

#[cfg(not(test))]
use jiff::Timestamp as Clock;
use jiff::Timestamp;
use rand::Rng;
use serde::Serialize;
use tracing::instrument;

#[cfg(test)]
use crate::mocks::MockTimestamp as Clock;
use crate::{
	audit::AuditLog,
	error::{HostsError, SchedulerError, UnblockError},
	friction::{AttemptContext, Confirmer, FrictionPolicy, Sleeper},
	hosts::{HostsStore, Pattern},
	lockdown::LockMarker,
	recents::RecentsList,
	scheduler::{ReblockJob, Scheduler},
};

/// What the user asked for, before any validation.
#[derive(Clone, Debug, derive_new::new)]
pub struct UnblockRequest {
	pub reason: String,
	pub duration_minutes: u32,
	pub patterns: Vec<Pattern>,
}

/// An approved unblock. Lives only as long as the invocation; the audit line is its only trace.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct UnblockGrant {
	pub reason: String,
	pub patterns: Vec<Pattern>,
	pub duration_minutes: u32,
	pub granted_at: Timestamp,
	pub reblock_at: Timestamp,
	pub hostnames: BTreeSet<String>,
	pub unmatched: Vec<Pattern>,
}

#[derive(Clone, Debug)]
pub struct UnblockOutcome {
	pub grant: UnblockGrant,
	/// Hostnames this invocation actually suppressed, i.e. what the reversal job re-activates.
	pub suppressed: BTreeSet<String>,
	/// Non-fatal problems after the grant was committed.
	pub warnings: Vec<String>,
}

#[derive(Clone, Copy, Debug, derive_new::new)]
pub struct SchedulerRetry {
	/// Extra attempts after the first.
	pub retries: u32,
	pub backoff: Duration,
}

pub struct UnblockFlow<'a> {
	pub store: &'a HostsStore,
	pub policy: &'a FrictionPolicy,
	pub lock: &'a LockMarker,
	pub scheduler: &'a dyn Scheduler,
	pub audit: &'a AuditLog,
	pub recents: &'a RecentsList,
	pub sleeper: &'a dyn Sleeper,
	pub confirmer: &'a dyn Confirmer,
	/// Program (plus leading args) the reversal job invokes as `<command> reblock <hosts>`.
	pub reblock_command: Vec<String>,
	pub retry: SchedulerRetry,
}

impl UnblockFlow<'_> {
	#[instrument(skip_all, fields(duration = request.duration_minutes))]
	pub fn run(&self, request: &UnblockRequest, rng: &mut impl Rng) -> Result<UnblockOutcome, UnblockError> {
		// Checked ahead of the entry read so a lock wins over every other failure.
		let locked_until = self.lock.locked_until();
		FrictionPolicy::check_lock(locked_until, Clock::now())?;

		let entries = self.store.read_entries()?;
		let grant = self.policy.evaluate(request, AttemptContext { locked_until, entries: &entries }, self.sleeper, self.confirmer, rng)?;
		tracing::info!(hostnames = ?grant.hostnames, reblock_at = %grant.reblock_at, "unblock approved");

		self.scheduler.check_available().map_err(|source| UnblockError::SchedulerUnavailable { attempts: 1, source })?;

		let suppressed = self.store.suppress(&grant.hostnames)?;
		let mut warnings = Vec::new();
		match suppressed.is_empty() {
			true => warnings.push("every matching site was already unblocked; no new re-block was scheduled".to_string()),
			false => self.schedule_or_roll_back(grant.reblock_at, &suppressed)?,
		}

		if let Err(e) = self.audit.record_unblock(&grant) {
			tracing::warn!(error = %e, path = %self.audit.path().display(), "failed to write audit log");
			warnings.push(format!("failed to write audit log {}: {e}", self.audit.path().display()));
		}
		if !grant.patterns.iter().any(Pattern::is_wildcard)
			&& let Err(e) = self.recents.record(suppressed.iter().map(String::as_str))
		{
			tracing::warn!(error = %e, "failed to update recents");
			warnings.push(format!("failed to update recents {}: {e}", self.recents.path().display()));
		}

		Ok(UnblockOutcome { grant, suppressed, warnings })
	}

	fn schedule_or_roll_back(&self, at: Timestamp, suppressed: &BTreeSet<String>) -> Result<(), UnblockError> {
		let job = ReblockJob::new(self.reblock_command.clone(), suppressed.clone());
		let (attempts, source) = match self.schedule_with_retries(at, &job) {
			Ok(()) => return Ok(()),
			Err(failure) => failure,
		};

		tracing::error!(attempts, error = %source, "could not schedule re-block, rolling back");
		match self.store.unsuppress(suppressed) {
			Ok(_) => Err(UnblockError::SchedulerUnavailable { attempts, source }),
			Err(rollback) => Err(UnblockError::RollbackFailed {
				hostnames: suppressed.iter().cloned().collect(),
				scheduler: source,
				source: rollback,
			}),
		}
	}

	fn schedule_with_retries(&self, at: Timestamp, job: &ReblockJob) -> Result<(), (u32, SchedulerError)> {
		let attempts = self.retry.retries + 1;
		let mut attempt = 1;
		loop {
			match self.scheduler.schedule_at(at, job) {
				Ok(()) => return Ok(()),
				Err(e) if attempt >= attempts => return Err((attempt, e)),
				Err(e) => {
					tracing::warn!(attempt, error = %e, "scheduling the re-block failed, retrying");
					std::thread::sleep(self.retry.backoff * attempt);
					attempt += 1;
				}
			}
		}
	}
}

/// Result of a full re-block.
#[derive(Debug)]
pub struct BlockOutcome {
	/// `BLOCKME` hostnames that were suppressed and are active again.
	pub reactivated: BTreeSet<String>,
	/// How many pending reversal jobs were dropped. Failing to drop them is not fatal: a leftover
	/// job only re-blocks what is already blocked.
	pub cancelled: Result<usize, SchedulerError>,
}

/// Re-activate every managed entry and drop the pending reversal jobs.
///
/// Jobs are cancelled before the hosts file is rewritten. A grant committed in between still
/// keeps its own job (or is undone by the rewrite); the other order could cancel the job of a
/// grant that landed after the rewrite and leave it unblocked for good.
#[instrument(skip_all)]
pub fn block_everything(store: &HostsStore, scheduler: &dyn Scheduler) -> Result<BlockOutcome, HostsError> {
	let cancelled = scheduler.cancel_pending();
	match &cancelled {
		Ok(n) => tracing::debug!(cancelled = n, "cancelled pending reversal jobs"),
		Err(e) => tracing::warn!(error = %e, "could not cancel pending reversal jobs"),
	}
	let reactivated = store.block_all()?;
	tracing::info!(?reactivated, "blocked everything");
	Ok(BlockOutcome { reactivated, cancelled })
}
