//! Lock window: while it lasts, no unblock attempt can succeed.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{Result, WrapErr as _, bail};
use jiff::{SignedDuration, Timestamp, Zoned, tz::TimeZone};
#[cfg(not(test))]
use jiff::Timestamp as Clock;

#[cfg(test)]
use crate::mocks::MockTimestamp as Clock;

#[derive(Clone, Debug)]
pub struct LockMarker {
	path: PathBuf,
	cap_at_midnight: bool,
	tz: TimeZone,
}

impl LockMarker {
	pub fn new(path: impl Into<PathBuf>, cap_at_midnight: bool) -> Self {
		Self {
			path: path.into(),
			cap_at_midnight,
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

	/// End of the active lock window, if any. A missing, unreadable or expired marker means unlocked.
	pub fn locked_until(&self) -> Option<Timestamp> {
		let raw = std::fs::read_to_string(&self.path).ok()?;
		let until: Timestamp = match raw.trim().parse() {
			Ok(ts) => ts,
			Err(e) => {
				tracing::warn!(path = %self.path.display(), error = %e, "ignoring unreadable lock marker");
				return None;
			}
		};
		(until > Clock::now()).then_some(until)
	}

	/// Lock unblocking for `hours` from now, unless the current window already ends later.
	/// Returns the effective end of the window.
	pub fn set(&self, hours: f64) -> Result<Timestamp> {
		if !hours.is_finite() || hours <= 0.0 {
			bail!("lock duration must be a positive number of hours, got {hours}");
		}
		let span = SignedDuration::try_from_secs_f64(hours * 3600.0).wrap_err_with(|| format!("lock duration of {hours} hours is out of range"))?;
		let now = Clock::now();
		let mut until = now.checked_add(span).wrap_err("lock window ends too far in the future")?;
		if self.cap_at_midnight {
			let end_of_day = end_of_day(&now.to_zoned(self.tz.clone()))?;
			if until > end_of_day {
				tracing::info!(%end_of_day, "capping lock window at the end of the day");
				until = end_of_day;
			}
		}

		// Never shorten a running window.
		if let Some(current) = self.locked_until()
			&& current >= until
		{
			tracing::info!(%current, requested = %until, "lock window already ends later, keeping it");
			return Ok(current);
		}

		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent).wrap_err_with(|| format!("failed to create {}", parent.display()))?;
		}
		std::fs::write(&self.path, format!("{until}\n")).wrap_err_with(|| format!("failed to write lock marker {}", self.path.display()))?;
		tracing::info!(%until, "lock window set");
		Ok(until)
	}
}

fn end_of_day(zoned: &Zoned) -> Result<Timestamp> {
	let eod = zoned.with().hour(23).minute(59).second(59).subsec_nanosecond(999_999_999).build()?;
	Ok(eod.timestamp())
}

/// `1h 05m`, `4m 09s` or `42s`.
pub fn format_remaining(until: Timestamp, now: Timestamp) -> String {
	let secs = until.duration_since(now).as_secs().max(0);
	let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
	match (h, m) {
		(0, 0) => format!("{s}s"),
		(0, _) => format!("{m}m {s:02}s"),
		_ => format!("{h}h {m:02}m"),
	}
}
