//! Shared test infrastructure for integration tests.
//!
//! `TestContext` lays out a hosts file and a state directory in a temp dir, points the binaries at
//! them through `BLKUNBLK_*` variables, and always runs them with `--mock`.
//!
//! ```ignore
//! let ctx = TestContext::new("0.0.0.0 youtube.com # BLOCKME\n");
//! let out = ctx.unblk(&["-r", "reading the docs", "-d", "25", "youtube"], "");
//! assert!(out.status.success(), "{}", out.stderr);
//! ```

use std::{
	io::Write as _,
	path::PathBuf,
	process::{Command, ExitStatus, Stdio},
};

use blkunblk::mocks::{MockScheduler, MockSchedulerState};
use tempfile::TempDir;

pub struct Output {
	pub status: ExitStatus,
	pub stdout: String,
	pub stderr: String,
}

pub struct TestContext {
	_dir: TempDir,
	pub hosts: PathBuf,
	pub state_dir: PathBuf,
	pub mock_state: PathBuf,
	pub trace_file: PathBuf,
}

impl TestContext {
	pub fn new(hosts: &str) -> Self {
		let dir = TempDir::new().unwrap();
		let hosts_path = dir.path().join("hosts");
		std::fs::write(&hosts_path, hosts).unwrap();
		Self {
			hosts: hosts_path,
			state_dir: dir.path().join("state"),
			mock_state: dir.path().join("mock_scheduler.json"),
			trace_file: dir.path().join("trace.jsonl"),
			_dir: dir,
		}
	}

	pub fn blk(&self, args: &[&str]) -> Output {
		self.run(env!("CARGO_BIN_EXE_blk"), args, "")
	}

	pub fn unblk(&self, args: &[&str], stdin: &str) -> Output {
		self.run(env!("CARGO_BIN_EXE_unblk"), args, stdin)
	}

	fn run(&self, bin: &str, args: &[&str], stdin: &str) -> Output {
		let mut cmd = Command::new(bin);
		cmd.arg("--mock").args(args);
		cmd.env_remove("BLKUNBLK_CONFIG").env_remove("BLKUNBLK_LOG");
		cmd.env("BLKUNBLK_HOSTS_FILE", &self.hosts)
			.env("BLKUNBLK_STATE_DIR", &self.state_dir)
			.env("BLKUNBLK_IMMUTABILITY", "none")
			.env("BLKUNBLK_SCHEDULER__RETRY_BACKOFF_MS", "0")
			.env("BLKUNBLK_MOCK_STATE", &self.mock_state)
			.env("BLKUNBLK_TRACE_FILE", &self.trace_file);
		cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

		let mut child = cmd.spawn().unwrap();
		let mut pipe = child.stdin.take().unwrap();
		pipe.write_all(stdin.as_bytes()).unwrap();
		drop(pipe);

		let output = child.wait_with_output().unwrap();
		Output {
			status: output.status,
			stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		}
	}

	pub fn read_hosts(&self) -> String {
		std::fs::read_to_string(&self.hosts).unwrap()
	}

	pub fn audit_log(&self) -> Option<String> {
		std::fs::read_to_string(self.state_dir.join("unblk.log")).ok()
	}

	pub fn scheduler_state(&self) -> MockSchedulerState {
		MockScheduler::new(&self.mock_state).state().unwrap()
	}

	pub fn set_scheduler_state(&self, state: &MockSchedulerState) {
		MockScheduler::new(&self.mock_state).save(state).unwrap();
	}
}
