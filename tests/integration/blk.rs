//! `blk`: full block, status, lock window, reversal target.

use blkunblk::mocks::MockSchedulerState;
use rstest::{fixture, rstest};

use crate::{assert_traced, common::TestContext, tracing_utils::TraceLog};

const HOSTS: &str = "\
127.0.0.1 localhost
#0.0.0.0 youtube.com # BLOCKME
# 0.0.0.0 www.youtube.com # BLOCKME
0.0.0.0 twitter.com # BLOCKME
#0.0.0.0 docs.rs # NEVERBLOCK
";

const BLOCKED: &str = "\
127.0.0.1 localhost
0.0.0.0 youtube.com # BLOCKME
0.0.0.0 www.youtube.com # BLOCKME
0.0.0.0 twitter.com # BLOCKME
0.0.0.0 docs.rs # NEVERBLOCK
";

#[fixture]
fn ctx() -> TestContext {
	TestContext::new(HOSTS)
}

#[rstest]
fn block_reactivates_everything_idempotently(ctx: TestContext) {
	let out = ctx.blk(&[]);
	assert!(out.status.success(), "{}", out.stderr);
	assert!(out.stdout.contains("Websites blocked successfully."));
	assert_eq!(ctx.read_hosts(), BLOCKED);

	let out = ctx.blk(&[]);
	assert!(out.status.success(), "{}", out.stderr);
	assert_eq!(ctx.read_hosts(), BLOCKED);

	let log = ctx.audit_log().unwrap();
	assert_eq!(log.lines().filter(|l| l.ends_with("; BLOCK")).count(), 2, "{log}");
}

#[rstest]
fn block_cancels_pending_reversals(ctx: TestContext) {
	let out = ctx.unblk(&["-r", "checking the news", "-d", "10", "twitter"], "");
	assert!(out.status.success(), "{}", out.stderr);
	assert_eq!(ctx.scheduler_state().jobs.len(), 1);

	let out = ctx.blk(&[]);
	assert!(out.status.success(), "{}", out.stderr);
	let state = ctx.scheduler_state();
	assert!(state.jobs.is_empty());
	assert_eq!(state.cancelled.len(), 1);
	assert_traced!(TraceLog::from_file(&ctx.trace_file), "cancel_pending");
}

#[rstest]
fn status_lists_unblocked_sites(ctx: TestContext) {
	let out = ctx.blk(&["status"]);
	assert!(out.status.success(), "{}", out.stderr);
	assert_eq!(out.stdout.trim(), "Unblocked: youtube.com, www.youtube.com");

	ctx.blk(&[]);
	let out = ctx.blk(&["status"]);
	assert_eq!(out.stdout.trim(), "All blocked");
}

#[rstest]
fn status_json(ctx: TestContext) {
	let out = ctx.blk(&["status", "--json"]);
	assert!(out.status.success(), "{}", out.stderr);
	let status: serde_json::Value = serde_json::from_str(&out.stdout).unwrap();
	assert_eq!(status["locked_until"], serde_json::Value::Null);
	assert_eq!(status["unblocked"], serde_json::json!(["youtube.com", "www.youtube.com"]));
	assert_eq!(status["blocked"], 1);
}

#[rstest]
fn lock_denies_unblk_without_prompting(ctx: TestContext) {
	ctx.blk(&[]);
	let out = ctx.blk(&["lock", "2"]);
	assert!(out.status.success(), "{}", out.stderr);
	assert!(out.stdout.contains("Locked until"));

	let status = ctx.blk(&["status"]);
	assert!(status.stdout.contains("LOCKED for"), "{}", status.stdout);

	// Missing reason would otherwise prompt; the lock wins first.
	let out = ctx.unblk(&[], "");
	assert!(!out.status.success());
	assert!(out.stderr.contains("Locked for"), "{}", out.stderr);
	assert!(!out.stderr.contains("Reason"), "{}", out.stderr);
	assert_eq!(ctx.read_hosts(), BLOCKED);
	assert!(ctx.scheduler_state().jobs.is_empty());
}

#[rstest]
#[case("0")]
#[case("-1")]
#[case("soon")]
fn lock_rejects_bad_hours(ctx: TestContext, #[case] hours: &str) {
	let out = ctx.blk(&["lock", hours]);
	assert!(!out.status.success());
	assert!(!ctx.state_dir.join("lockdown").exists());
}

#[rstest]
fn reblock_touches_only_the_given_hosts(ctx: TestContext) {
	let out = ctx.blk(&["reblock", "www.youtube.com"]);
	assert!(out.status.success(), "{}", out.stderr);

	let hosts = ctx.read_hosts();
	assert!(hosts.contains("\n#0.0.0.0 youtube.com # BLOCKME\n"), "{hosts}");
	assert!(hosts.contains("\n0.0.0.0 www.youtube.com # BLOCKME\n"), "{hosts}");
	// Every rewrite heals NEVERBLOCK lines.
	assert!(hosts.contains("\n0.0.0.0 docs.rs # NEVERBLOCK\n"), "{hosts}");
	assert!(ctx.audit_log().unwrap().contains("; REBLOCK; Hosts: www.youtube.com"));
}

#[rstest]
fn unavailable_scheduler_does_not_stop_a_full_block(ctx: TestContext) {
	ctx.set_scheduler_state(&MockSchedulerState {
		unavailable: true,
		..MockSchedulerState::default()
	});
	let out = ctx.blk(&[]);
	assert!(out.status.success(), "{}", out.stderr);
	assert_eq!(ctx.read_hosts(), BLOCKED);
}

#[rstest]
fn completions(ctx: TestContext) {
	let out = ctx.blk(&["completions", "bash"]);
	assert!(out.status.success(), "{}", out.stderr);
	assert!(out.stdout.contains("blk"));
}
