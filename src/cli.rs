//! Command-line surfaces of `blk` and `unblk`, and the wiring from config to collaborators.

use std::{
	collections::BTreeSet,
	path::PathBuf,
	process::ExitCode,
	time::Duration,
};

use clap::{Args, CommandFactory as _, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr as _, bail};
use jiff::{Timestamp, tz::TimeZone};
use miette::Diagnostic;
use serde::Serialize;

use crate::{
	audit::AuditLog,
	config::AppConfig,
	error::Denial,
	friction::{FrictionPolicy, Sleeper, ThreadSleeper},
	hosts::{HostsStore, LockRetry, Pattern},
	lockdown::{LockMarker, format_remaining},
	mocks::{MockImmutability, MockScheduler, MockSleeper},
	platform::{self, ImmutabilityToggle},
	prompt::{self, StdinConfirmer},
	recents::RecentsList,
	scheduler::{AtScheduler, Scheduler},
	unblock::{SchedulerRetry, UnblockFlow, UnblockRequest, block_everything},
};

/// Path of the mock scheduler's JSON state, for `--mock` runs.
pub const MOCK_STATE_ENV: &str = "BLKUNBLK_MOCK_STATE";

#[derive(Args, Clone, Debug, Default)]
pub struct GlobalArgs {
	/// Config file (TOML). Defaults to $BLKUNBLK_CONFIG, then /etc/blkunblk/config.toml
	#[arg(long, global = true)]
	pub config: Option<PathBuf>,
	/// Use mock collaborators: no `at`, no immutability flag, no real delays, no root check
	#[arg(long, global = true, hide = true)]
	pub mock: bool,
}

#[derive(Debug, Parser)]
#[command(name = "blk", author, version, about = "Block every managed site in the hosts file", long_about = None)]
pub struct BlkCli {
	#[command(flatten)]
	pub global: GlobalArgs,
	#[command(subcommand)]
	pub command: Option<BlkCommand>,
}

#[derive(Clone, Debug, Subcommand)]
pub enum BlkCommand {
	/// Show the lock window and which sites are currently unblocked
	Status {
		#[arg(long)]
		json: bool,
	},
	/// Refuse every unblock for the given number of hours (fractions allowed)
	#[command(allow_negative_numbers = true)]
	Lock { hours: f64 },
	/// Re-block exactly these hostnames. Run by the scheduled reversal job.
	#[command(hide = true)]
	Reblock {
		#[arg(required = true)]
		hostnames: Vec<String>,
	},
	/// Print shell completions
	Completions { shell: clap_complete::Shell },
}

#[derive(Debug, Parser)]
#[command(name = "unblk", author, version, about = "Temporarily unblock sites, at a price", long_about = None)]
pub struct UnblkCli {
	#[command(flatten)]
	pub global: GlobalArgs,
	/// Why you need it. Prompted for when missing
	#[arg(short, long)]
	pub reason: Option<String>,
	/// Minutes until the automatic re-block. Prompted for when missing
	#[arg(short, long)]
	pub duration: Option<u32>,
	/// Substrings of the hostnames to unblock, or `all`. Prompted for when missing
	pub patterns: Vec<String>,
}

/// Collaborators built from the loaded config, real or mocked.
pub struct Runtime {
	pub config: AppConfig,
	config_path: Option<PathBuf>,
	mock: bool,
}

impl Runtime {
	pub fn load(global: &GlobalArgs) -> Result<Self> {
		let config = AppConfig::load(global.config.as_deref())?;
		Ok(Self {
			config,
			config_path: global.config.clone(),
			mock: global.mock,
		})
	}

	pub fn check_root(&self) -> Result<()> {
		if !self.mock && self.config.require_root && !platform::is_root() {
			bail!("Please run as root (sudo)");
		}
		Ok(())
	}

	pub fn store(&self) -> HostsStore {
		let immutability: Box<dyn ImmutabilityToggle> = match self.mock {
			true => Box::new(MockImmutability::default()),
			false => self.config.immutability.toggle(),
		};
		let retry = LockRetry::new(self.config.hosts_lock.attempts, Duration::from_millis(self.config.hosts_lock.retry_ms));
		HostsStore::new(&self.config.hosts_file, immutability, retry)
	}

	pub fn scheduler(&self) -> Box<dyn Scheduler> {
		match self.mock {
			true => {
				let path = std::env::var_os(MOCK_STATE_ENV).map(PathBuf::from).unwrap_or_else(|| self.config.state_dir().join("mock_scheduler.json"));
				Box::new(MockScheduler::new(path))
			}
			false => Box::new(AtScheduler),
		}
	}

	pub fn sleeper(&self) -> Box<dyn Sleeper> {
		match self.mock {
			true => Box::new(MockSleeper::default()),
			false => Box::new(ThreadSleeper),
		}
	}

	pub fn lock_marker(&self) -> LockMarker {
		LockMarker::new(self.config.lock_marker_file(), self.config.lock.cap_at_midnight)
	}

	pub fn audit(&self) -> AuditLog {
		AuditLog::new(self.config.log_file())
	}

	pub fn recents(&self) -> RecentsList {
		RecentsList::new(self.config.recents_file(), self.config.recents_max)
	}

	/// `blk` plus the flags the reversal job needs to see the same config.
	pub fn reblock_command(&self) -> Result<Vec<String>> {
		let mut command = match &self.config.scheduler.reblock_command {
			Some(cmd) => cmd.split_whitespace().map(str::to_string).collect(),
			None => {
				let exe = std::env::current_exe().wrap_err("failed to locate the running executable")?;
				let blk = exe.with_file_name(format!("blk{}", std::env::consts::EXE_SUFFIX));
				vec![blk.to_string_lossy().into_owned()]
			}
		};
		if command.is_empty() {
			bail!("scheduler.reblock_command is empty");
		}
		if let Some(path) = &self.config_path {
			let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
			command.extend(["--config".to_string(), path.to_string_lossy().into_owned()]);
		}
		if self.mock {
			command.push("--mock".to_string());
		}
		Ok(command)
	}

	pub fn flush_dns(&self) {
		if !self.mock {
			platform::flush_dns_cache();
		}
	}
}

/// Print a diagnostic the way miette renders it and fail.
fn report(err: impl Diagnostic + Send + Sync + 'static) -> ExitCode {
	eprintln!("{:?}", miette::Report::new(err));
	ExitCode::FAILURE
}

pub fn blk(cli: BlkCli) -> Result<ExitCode> {
	let load = || Runtime::load(&cli.global);
	match cli.command {
		None => block(&load()?),
		Some(BlkCommand::Status { json }) => status(&load()?, json),
		Some(BlkCommand::Lock { hours }) => lock(&load()?, hours),
		Some(BlkCommand::Reblock { hostnames }) => reblock(&load()?, hostnames),
		Some(BlkCommand::Completions { shell }) => {
			clap_complete::generate(shell, &mut BlkCli::command(), "blk", &mut std::io::stdout());
			Ok(ExitCode::SUCCESS)
		}
	}
}

fn block(rt: &Runtime) -> Result<ExitCode> {
	rt.check_root()?;
	let outcome = match block_everything(&rt.store(), rt.scheduler().as_ref()) {
		Ok(o) => o,
		Err(e) => return Ok(report(e)),
	};
	if let Err(e) = outcome.cancelled {
		eprintln!("Warning: could not cancel pending re-block jobs: {e}");
	}
	if let Err(e) = rt.audit().record_block(Timestamp::now()) {
		eprintln!("Warning: failed to write {}: {e}", rt.audit().path().display());
	}
	rt.flush_dns();

	println!("Websites blocked successfully.");
	Ok(ExitCode::SUCCESS)
}

#[derive(Debug, Serialize)]
struct StatusReport {
	locked_until: Option<Timestamp>,
	unblocked: Vec<String>,
	blocked: usize,
}

fn status(rt: &Runtime, json: bool) -> Result<ExitCode> {
	let locked_until = rt.lock_marker().locked_until();
	let entries = match rt.store().read_entries() {
		Ok(e) => e,
		Err(e) => return Ok(report(e)),
	};
	let summary = StatusReport {
		locked_until,
		unblocked: entries.iter().filter(|e| e.is_blockable() && e.is_suppressed()).map(|e| e.hostname.clone()).collect(),
		blocked: entries.iter().filter(|e| e.is_blockable() && e.active).count(),
	};

	if json {
		println!("{}", serde_json::to_string_pretty(&summary)?);
		return Ok(ExitCode::SUCCESS);
	}
	if let Some(until) = summary.locked_until {
		println!("LOCKED for {}", format_remaining(until, Timestamp::now()));
	}
	match summary.unblocked.is_empty() {
		true => println!("All blocked"),
		false => println!("Unblocked: {}", summary.unblocked.join(", ")),
	}
	Ok(ExitCode::SUCCESS)
}

fn lock(rt: &Runtime, hours: f64) -> Result<ExitCode> {
	rt.check_root()?;
	let until = rt.lock_marker().set(hours)?;
	let local = until.to_zoned(TimeZone::system());
	println!("Locked until {}", local.strftime("%H:%M"));
	println!("unblk will be disabled until then");
	Ok(ExitCode::SUCCESS)
}

fn reblock(rt: &Runtime, hostnames: Vec<String>) -> Result<ExitCode> {
	rt.check_root()?;
	let hostnames: BTreeSet<String> = hostnames.into_iter().collect();
	let reactivated = match rt.store().activate(&hostnames) {
		Ok(r) => r,
		Err(e) => return Ok(report(e)),
	};
	if let Err(e) = rt.audit().record_reblock(Timestamp::now(), &hostnames) {
		eprintln!("Warning: failed to write {}: {e}", rt.audit().path().display());
	}
	rt.flush_dns();
	tracing::info!(?reactivated, "re-blocked");
	Ok(ExitCode::SUCCESS)
}

pub fn unblk(cli: UnblkCli) -> Result<ExitCode> {
	let rt = Runtime::load(&cli.global)?;
	rt.check_root()?;

	let lock = rt.lock_marker();
	// No prompting while locked.
	if let Some(until) = lock.locked_until() {
		eprintln!("Locked for {}", format_remaining(until, Timestamp::now()));
		eprintln!("Use `blk status` to check the lock");
		return Ok(report(Denial::LockActive { until }));
	}

	let policy = FrictionPolicy::new(rt.config.friction.clone());
	let recents = rt.recents();
	let reason = match cli.reason {
		Some(r) => r,
		None => prompt::ask_reason(&policy)?,
	};
	let duration = match cli.duration {
		Some(d) => d,
		None => prompt::ask_duration(&policy)?,
	};
	let patterns: Vec<Pattern> = match cli.patterns.is_empty() {
		false => cli.patterns.iter().filter_map(|p| p.parse().ok()).collect(),
		true => {
			let known = recents.load().unwrap_or_else(|e| {
				tracing::warn!(error = %e, "could not read recents");
				Vec::new()
			});
			prompt::ask_patterns(&known)?
		}
	};

	let (store, scheduler, sleeper, audit) = (rt.store(), rt.scheduler(), rt.sleeper(), rt.audit());
	let flow = UnblockFlow {
		store: &store,
		policy: &policy,
		lock: &lock,
		scheduler: &*scheduler,
		audit: &audit,
		recents: &recents,
		sleeper: &*sleeper,
		confirmer: &StdinConfirmer,
		reblock_command: rt.reblock_command()?,
		retry: SchedulerRetry::new(rt.config.scheduler.retries, Duration::from_millis(rt.config.scheduler.retry_backoff_ms)),
	};
	let request = UnblockRequest::new(reason, duration, patterns);
	eprintln!("Waiting...");
	let outcome = match flow.run(&request, &mut rand::thread_rng()) {
		Ok(o) => o,
		Err(e) => return Ok(report(e)),
	};
	rt.flush_dns();

	for pattern in &outcome.grant.unmatched {
		eprintln!("Warning: `{pattern}` matched nothing");
	}
	for warning in &outcome.warnings {
		eprintln!("Warning: {warning}");
	}
	let what = match outcome.grant.patterns.iter().any(Pattern::is_wildcard) {
		true => "ALL".to_string(),
		false => outcome.grant.hostnames.iter().map(String::as_str).collect::<Vec<_>>().join(", "),
	};
	println!("Done: {what} for {}m", outcome.grant.duration_minutes);
	Ok(ExitCode::SUCCESS)
}
