use std::{fs::OpenOptions, sync::Arc};

use color_eyre::eyre::{Result, WrapErr as _};
use tracing_subscriber::{EnvFilter, Layer as _, filter::LevelFilter, prelude::*};

pub const LOG_ENV: &str = "BLKUNBLK_LOG";
/// When set, every event at DEBUG and above is also appended to this file as JSON lines.
pub const TRACE_FILE_ENV: &str = "BLKUNBLK_TRACE_FILE";

pub fn init() -> Result<()> {
	let stderr_filter = EnvFilter::builder().with_default_directive(LevelFilter::WARN.into()).with_env_var(LOG_ENV).from_env_lossy();
	let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false).with_filter(stderr_filter);

	let file_layer = match std::env::var_os(TRACE_FILE_ENV) {
		Some(path) => {
			let file = OpenOptions::new()
				.create(true)
				.append(true)
				.open(&path)
				.wrap_err_with(|| format!("failed to open trace file {}", path.to_string_lossy()))?;
			Some(
				tracing_subscriber::fmt::layer()
					.json()
					.with_writer(Arc::new(file))
					.with_ansi(false)
					.with_filter(LevelFilter::DEBUG),
			)
		}
		None => None,
	};

	if let Err(err) = tracing_subscriber::registry().with(stderr_layer).with(file_layer).try_init() {
		tracing::warn!(error = %err, "tracing already initialized");
	}
	Ok(())
}
