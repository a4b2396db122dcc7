//! Utilities for capturing and verifying tracing output in integration tests.
//!
//! With `BLKUNBLK_TRACE_FILE` set, the binaries append every event as a JSON line. Mock
//! collaborators emit `tracing::info!` events with target "mock" and a `call` field naming the
//! method, which is what `has_mock_call` looks for.

use std::{fs, path::Path};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TraceEvent {
	pub target: String,
	pub fields: TraceFields,
}

#[derive(Debug, Deserialize)]
pub struct TraceFields {
	pub message: Option<String>,
	/// Mock method name
	pub call: Option<String>,
	/// Friction delay served by the mock sleeper
	pub secs: Option<u64>,
	/// Reversal time passed to `schedule_at`
	pub at: Option<String>,
	/// Debug-formatted hostname set passed to `schedule_at`
	pub hostnames: Option<String>,
}

pub struct TraceLog {
	events: Vec<TraceEvent>,
}

impl TraceLog {
	pub fn from_file(path: &Path) -> Self {
		let content = fs::read_to_string(path).unwrap_or_default();
		let events = content.lines().filter(|line| !line.is_empty()).filter_map(|line| serde_json::from_str(line).ok()).collect();
		Self { events }
	}

	pub fn mock_calls(&self) -> Vec<&TraceEvent> {
		self.events.iter().filter(|e| e.target == "mock").collect()
	}

	pub fn calls_to(&self, method: &str) -> Vec<&TraceEvent> {
		self.mock_calls().into_iter().filter(|e| e.fields.call.as_deref() == Some(method)).collect()
	}

	pub fn has_mock_call(&self, method: &str) -> bool {
		!self.calls_to(method).is_empty()
	}

	/// Delays the mock sleeper was asked to serve, in seconds.
	pub fn delays(&self) -> Vec<u64> {
		self.calls_to("sleep").iter().filter_map(|e| e.fields.secs).collect()
	}
}

/// Assert that a mock method was called
#[macro_export]
macro_rules! assert_traced {
	($log:expr, $method:expr) => {
		assert!(
			$log.has_mock_call($method),
			"Expected mock call '{}' to be traced, but it wasn't. Mock calls:\n{:#?}",
			$method,
			$log.mock_calls()
		);
	};
}

/// Assert that a mock method was never called
#[macro_export]
macro_rules! assert_not_traced {
	($log:expr, $method:expr) => {
		assert!(
			!$log.has_mock_call($method),
			"Expected no mock call '{}', got:\n{:#?}",
			$method,
			$log.calls_to($method)
		);
	};
}
