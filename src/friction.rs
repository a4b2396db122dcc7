//! Friction state machine for a single unblock attempt.
//!
//! Steps run in a fixed order and the first failing one ends the attempt as `Denied`:
//!
//! 1. `LockCheck`: an active lock window denies outright, before anything else
//! 2. `ReasonCheck`: trimmed reason of at least `min_reason_len` characters
//! 3. `DurationSelect`: a preset, or a custom duration within the configured bounds
//! 4. `PatternCheck`: every non-wildcard pattern at least `min_pattern_len` characters
//! 5. `FrictionDelay`: enforced wait, scaled with the requested duration
//! 6. `ConfirmWindow`: wildcard requests only, the user must confirm in time
//! 7. `PatternResolve`: at least one pattern must match a managed entry
//!
//! Completing all of them yields an [`UnblockGrant`].

use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
#[cfg(not(test))]
use jiff::Timestamp as Clock;
use rand::Rng;
use tracing::instrument;

#[cfg(test)]
use crate::mocks::MockTimestamp as Clock;
use crate::{
	config::{DelayBand, FrictionConfig},
	error::Denial,
	hosts::{HostEntry, resolve_all},
	unblock::{UnblockGrant, UnblockRequest},
};

/// Blocking wait. The delay must actually be served, so the real implementation sleeps the thread.
pub trait Sleeper {
	fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
	fn sleep(&self, duration: Duration) {
		std::thread::sleep(duration);
	}
}

/// Asks the user to confirm within a time window.
pub trait Confirmer {
	fn confirm_within(&self, window: Duration) -> bool;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
	LockCheck,
	ReasonCheck,
	DurationSelect,
	PatternCheck,
	FrictionDelay,
	ConfirmWindow,
	PatternResolve,
}

/// Everything the policy consults besides the request itself, read at the start of the attempt.
#[derive(Clone, Copy, Debug)]
pub struct AttemptContext<'a> {
	pub locked_until: Option<Timestamp>,
	pub entries: &'a [HostEntry],
}

#[derive(Clone, Debug, derive_new::new)]
pub struct FrictionPolicy {
	config: FrictionConfig,
}

impl FrictionPolicy {
	pub fn config(&self) -> &FrictionConfig {
		&self.config
	}

	pub fn check_lock(locked_until: Option<Timestamp>, now: Timestamp) -> Result<(), Denial> {
		match locked_until {
			Some(until) if until > now => Err(Denial::LockActive { until }),
			_ => Ok(()),
		}
	}

	/// Returns the trimmed reason.
	pub fn check_reason(&self, reason: &str) -> Result<String, Denial> {
		let reason = reason.trim();
		let len = reason.chars().count();
		if len < self.config.min_reason_len {
			return Err(Denial::ReasonTooShort {
				len,
				min_len: self.config.min_reason_len,
			});
		}
		Ok(reason.to_string())
	}

	pub fn check_duration(&self, minutes: u32) -> Result<u32, Denial> {
		if self.config.presets.contains(&minutes) {
			return Ok(minutes);
		}
		let above_min = minutes >= self.config.min_minutes;
		let below_max = self.config.max_minutes.is_none_or(|max| minutes <= max);
		if minutes > 0 && above_min && below_max {
			return Ok(minutes);
		}
		Err(Denial::InvalidDuration {
			minutes,
			allowed: self.describe_durations(),
		})
	}

	pub fn describe_durations(&self) -> String {
		let presets = self.config.presets.iter().map(ToString::to_string).collect::<Vec<_>>().join("/");
		match self.config.max_minutes {
			Some(max) => format!("use one of {presets}, or a custom {}-{max} minutes", self.config.min_minutes),
			None => format!("use one of {presets}, or a custom duration of at least {} minutes", self.config.min_minutes),
		}
	}

	/// Band for `minutes`: the first band whose bound covers it, or the open-ended last one.
	pub fn band_for(&self, minutes: u32, wildcard: bool) -> DelayBand {
		let fallback = DelayBand::new(None, 0, 0);
		let band = self
			.config
			.bands
			.iter()
			.find(|b| b.up_to_minutes.is_none_or(|up_to| minutes <= up_to))
			.or(self.config.bands.last())
			.copied()
			.unwrap_or(fallback);
		match wildcard {
			true => DelayBand::new(band.up_to_minutes, band.min_secs.max(self.config.all_band.min_secs), band.max_secs.max(self.config.all_band.max_secs)),
			false => band,
		}
	}

	pub fn delay_for(&self, minutes: u32, wildcard: bool, rng: &mut impl Rng) -> Duration {
		let band = self.band_for(minutes, wildcard);
		Duration::from_secs(rng.gen_range(band.min_secs..=band.max_secs))
	}

	/// Run the state machine to completion.
	#[instrument(skip_all, fields(duration = request.duration_minutes, patterns = request.patterns.len()))]
	pub fn evaluate(
		&self,
		request: &UnblockRequest,
		ctx: AttemptContext<'_>,
		sleeper: &dyn Sleeper,
		confirmer: &dyn Confirmer,
		rng: &mut impl Rng,
	) -> Result<UnblockGrant, Denial> {
		let wildcard = request.patterns.iter().any(|p| p.is_wildcard());
		let mut reason = String::new();
		let mut step = Step::LockCheck;
		loop {
			tracing::debug!(?step, "friction step");
			step = match step {
				Step::LockCheck => {
					Self::check_lock(ctx.locked_until, Clock::now())?;
					Step::ReasonCheck
				}
				Step::ReasonCheck => {
					reason = self.check_reason(&request.reason)?;
					Step::DurationSelect
				}
				Step::DurationSelect => {
					self.check_duration(request.duration_minutes)?;
					Step::PatternCheck
				}
				Step::PatternCheck => {
					if request.patterns.is_empty() {
						return Err(Denial::NoMatchingEntries { patterns: Vec::new() });
					}
					for pattern in &request.patterns {
						pattern.validate(self.config.min_pattern_len)?;
					}
					Step::FrictionDelay
				}
				Step::FrictionDelay => {
					let delay = self.delay_for(request.duration_minutes, wildcard, rng);
					tracing::info!(secs = delay.as_secs(), "serving friction delay");
					sleeper.sleep(delay);
					match wildcard {
						true => Step::ConfirmWindow,
						false => Step::PatternResolve,
					}
				}
				Step::ConfirmWindow => {
					let secs = self.config.confirm_window_secs;
					if !confirmer.confirm_within(Duration::from_secs(secs)) {
						return Err(Denial::ConfirmationTimedOut { secs });
					}
					Step::PatternResolve
				}
				Step::PatternResolve => {
					let resolution = resolve_all(&request.patterns, ctx.entries)?;
					let granted_at = Clock::now();
					let reblock_at = granted_at.saturating_add(SignedDuration::from_mins(i64::from(request.duration_minutes))).unwrap_or(Timestamp::MAX);
					return Ok(UnblockGrant {
						reason,
						patterns: request.patterns.clone(),
						duration_minutes: request.duration_minutes,
						granted_at,
						reblock_at,
						hostnames: resolution.hostnames,
						unmatched: resolution.unmatched,
					});
				}
			};
		}
	}
}
