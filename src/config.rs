use std::path::{Path, PathBuf};

use color_eyre::eyre::{Result, WrapErr as _, bail};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::platform::ImmutabilityBackend;

pub const ENV_PREFIX: &str = "BLKUNBLK";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/blkunblk/config.toml";

#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct AppConfig {
	#[default(PathBuf::from(default_hosts_file()))]
	pub hosts_file: PathBuf,
	/// Lock marker, recents and (by default) the audit log live here.
	pub state_dir: Option<PathBuf>,
	pub log_file: Option<PathBuf>,
	#[default(true)]
	pub require_root: bool,
	pub immutability: ImmutabilityBackend,
	#[default(3)]
	pub recents_max: usize,
	pub friction: FrictionConfig,
	pub scheduler: SchedulerConfig,
	pub lock: LockConfig,
	pub hosts_lock: HostsLockConfig,
}

#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct FrictionConfig {
	#[default(6)]
	pub min_reason_len: usize,
	#[default(4)]
	pub min_pattern_len: usize,
	/// Always-accepted durations, in minutes.
	#[default(vec![10, 25, 60])]
	pub presets: Vec<u32>,
	#[default(1)]
	pub min_minutes: u32,
	/// Upper bound for custom durations; `None` means unbounded.
	#[default(Some(480))]
	pub max_minutes: Option<u32>,
	/// Ordered by `up_to_minutes`; the last band is open-ended.
	#[default(default_bands())]
	pub bands: Vec<DelayBand>,
	/// Floor for wildcard requests.
	#[default(DelayBand::new(None, 30, 90))]
	pub all_band: DelayBand,
	#[default(10)]
	pub confirm_window_secs: u64,
}

/// Delay drawn uniformly from `min_secs..=max_secs` for durations up to `up_to_minutes`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, derive_new::new)]
pub struct DelayBand {
	pub up_to_minutes: Option<u32>,
	pub min_secs: u64,
	pub max_secs: u64,
}

fn default_bands() -> Vec<DelayBand> {
	vec![
		DelayBand::new(Some(20), 0, 2),
		DelayBand::new(Some(60), 5, 12),
		DelayBand::new(Some(180), 15, 45),
		DelayBand::new(None, 30, 90),
	]
}

#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct SchedulerConfig {
	/// Extra registration attempts after the first one fails.
	#[default(3)]
	pub retries: u32,
	#[default(200)]
	pub retry_backoff_ms: u64,
	/// Command the reversal job runs, defaults to the `blk` next to the running executable.
	pub reblock_command: Option<String>,
}

#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct LockConfig {
	/// Never let a lock window run past the end of the current local day.
	#[default(true)]
	pub cap_at_midnight: bool,
}

#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct HostsLockConfig {
	#[default(50)]
	pub attempts: u32,
	#[default(100)]
	pub retry_ms: u64,
}

fn default_hosts_file() -> &'static str {
	if cfg!(windows) { r"C:\Windows\System32\drivers\etc\hosts" } else { "/etc/hosts" }
}

impl AppConfig {
	/// Defaults, then the TOML file, then `BLKUNBLK_*` environment variables.
	///
	/// An explicit `path` must exist; the system-wide file is optional.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let env_path = std::env::var_os(format!("{ENV_PREFIX}_CONFIG")).map(PathBuf::from);
		let (file, required) = match path.map(Path::to_path_buf).or(env_path) {
			Some(p) => (p, true),
			None => (PathBuf::from(SYSTEM_CONFIG_PATH), false),
		};
		if required && !file.exists() {
			bail!("config file not found: {}", file.display());
		}

		let raw = config::Config::builder()
			.add_source(config::File::from(file.as_path()).format(config::FileFormat::Toml).required(required))
			.add_source(config::Environment::with_prefix(ENV_PREFIX).prefix_separator("_").separator("__").try_parsing(true))
			.build()
			.wrap_err_with(|| format!("failed to read configuration (file: {})", file.display()))?;
		let config: AppConfig = raw
			.try_deserialize()
			.wrap_err("The config is not correctly formatted\nand/or\n has fields of the wrong type")?;
		config.validate()?;
		tracing::debug!(?config, "loaded configuration");
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		self.friction.validate()
	}

	pub fn state_dir(&self) -> PathBuf {
		self.state_dir.clone().unwrap_or_else(|| v_utils::xdg_state_dir!("focus"))
	}

	pub fn log_file(&self) -> PathBuf {
		self.log_file.clone().unwrap_or_else(|| self.state_dir().join("unblk.log"))
	}

	pub fn lock_marker_file(&self) -> PathBuf {
		self.state_dir().join("lockdown")
	}

	pub fn recents_file(&self) -> PathBuf {
		self.state_dir().join("recents")
	}
}

impl FrictionConfig {
	pub fn validate(&self) -> Result<()> {
		if self.presets.iter().any(|&p| p == 0) {
			bail!("friction.presets must all be positive");
		}
		if self.min_minutes == 0 {
			bail!("friction.min_minutes must be positive");
		}
		if let Some(max) = self.max_minutes
			&& max < self.min_minutes
		{
			bail!("friction.max_minutes ({max}) is below friction.min_minutes ({})", self.min_minutes);
		}
		if self.bands.is_empty() {
			bail!("friction.bands must not be empty");
		}
		for band in self.bands.iter().chain(std::iter::once(&self.all_band)) {
			if band.min_secs > band.max_secs {
				bail!("delay band {band:?} has min_secs above max_secs");
			}
		}
		for pair in self.bands.windows(2) {
			let (lo, hi) = (&pair[0], &pair[1]);
			let ordered = match (lo.up_to_minutes, hi.up_to_minutes) {
				(Some(a), Some(b)) => a < b,
				(Some(_), None) => true,
				(None, _) => false,
			};
			if !ordered {
				bail!("friction.bands must be ordered by up_to_minutes with only the last one open-ended");
			}
			if hi.min_secs < lo.min_secs || hi.max_secs < lo.max_secs {
				bail!("friction.bands must not shrink as durations grow: {lo:?} then {hi:?}");
			}
		}
		Ok(())
	}
}
