//! `unblk` end to end against the mock scheduler.

use blkunblk::mocks::MockSchedulerState;
use jiff::{SignedDuration, Timestamp};
use rstest::{fixture, rstest};

use crate::{assert_not_traced, assert_traced, common::TestContext, tracing_utils::TraceLog};

const HOSTS: &str = "\
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
fn grant_suppresses_schedules_and_logs(ctx: TestContext) {
	let before = Timestamp::now();
	let out = ctx.unblk(&["-r", "reading the docs", "-d", "25", "youtube"], "");
	assert!(out.status.success(), "{}", out.stderr);
	assert_eq!(out.stdout.trim(), "Done: www.youtube.com, youtube.com for 25m");

	let hosts = ctx.read_hosts();
	assert!(hosts.contains("\n#0.0.0.0 youtube.com # BLOCKME\n#0.0.0.0 www.youtube.com # BLOCKME\n0.0.0.0 twitter.com # BLOCKME\n"), "{hosts}");

	let jobs = ctx.scheduler_state().jobs;
	assert_eq!(jobs.len(), 1);
	assert_eq!(jobs[0].hostnames, vec!["www.youtube.com", "youtube.com"]);
	let lead = jobs[0].at.duration_since(before);
	assert!(lead >= SignedDuration::from_mins(25) && lead < SignedDuration::from_mins(26), "{lead:?}");
	assert!(jobs[0].script.starts_with("# blkunblk-reblock\n"));
	assert!(jobs[0].script.contains("'--mock' 'reblock' 'www.youtube.com' 'youtube.com'"), "{}", jobs[0].script);

	let trace = TraceLog::from_file(&ctx.trace_file);
	assert_traced!(trace, "check_available");
	assert_traced!(trace, "schedule_at");
	let delays = trace.delays();
	assert_eq!(delays.len(), 1);
	assert!((5..=12).contains(&delays[0]), "{delays:?}");

	let log = ctx.audit_log().unwrap();
	assert!(log.contains("; UNBLOCK; Duration: 25 minutes; Reason: reading the docs; Hosts: www.youtube.com, youtube.com\n"), "{log}");
	assert_eq!(std::fs::read_to_string(ctx.state_dir.join("recents")).unwrap(), "www.youtube.com\nyoutube.com\n");
}

#[rstest]
fn scheduled_reversal_reblocks_exactly_the_grant(ctx: TestContext) {
	assert!(ctx.unblk(&["-r", "reading the docs", "-d", "60", "youtube"], "").status.success());
	assert!(ctx.unblk(&["-r", "checking the news", "-d", "10", "twitter"], "").status.success());

	// Fire the twitter reversal the way `at` would.
	let jobs = ctx.scheduler_state().jobs;
	assert_eq!(jobs[1].hostnames, vec!["twitter.com"]);
	let out = ctx.blk(&["reblock", "twitter.com"]);
	assert!(out.status.success(), "{}", out.stderr);

	let hosts = ctx.read_hosts();
	assert!(hosts.contains("\n0.0.0.0 twitter.com # BLOCKME\n"), "{hosts}");
	assert!(hosts.contains("\n#0.0.0.0 youtube.com # BLOCKME\n"), "{hosts}");
}

#[rstest]
fn short_reason_is_denied_without_side_effects(ctx: TestContext) {
	let out = ctx.unblk(&["-r", "bored", "-d", "10", "youtube"], "");
	assert!(!out.status.success());
	assert!(out.stderr.contains("reason must be at least 6 characters"), "{}", out.stderr);
	assert_eq!(ctx.read_hosts(), HOSTS);
	assert!(ctx.audit_log().is_none());

	let trace = TraceLog::from_file(&ctx.trace_file);
	assert_not_traced!(trace, "sleep");
	assert_not_traced!(trace, "schedule_at");
}

#[rstest]
#[case("0")]
#[case("481")]
fn out_of_range_duration_is_denied(ctx: TestContext, #[case] minutes: &str) {
	let out = ctx.unblk(&["-r", "reading the docs", "-d", minutes, "youtube"], "");
	assert!(!out.status.success());
	assert!(out.stderr.contains("invalid duration"), "{}", out.stderr);
	assert_eq!(ctx.read_hosts(), HOSTS);
}

#[rstest]
fn nothing_matching_is_denied(ctx: TestContext) {
	let out = ctx.unblk(&["-r", "reading the docs", "-d", "10", "nonexistent"], "");
	assert!(!out.status.success());
	assert!(out.stderr.contains("no managed entries match"), "{}", out.stderr);
	assert_eq!(ctx.read_hosts(), HOSTS);
	assert!(ctx.audit_log().is_none());
	assert!(ctx.scheduler_state().jobs.is_empty());
}

#[rstest]
fn never_block_entries_cannot_be_unblocked(ctx: TestContext) {
	let out = ctx.unblk(&["-r", "reading the docs", "-d", "10", "docs.rs"], "");
	assert!(!out.status.success());
	assert_eq!(ctx.read_hosts(), HOSTS);
}

#[rstest]
fn partial_miss_is_a_warning(ctx: TestContext) {
	let out = ctx.unblk(&["-r", "checking the news", "-d", "10", "nonexistent", "twitter"], "");
	assert!(out.status.success(), "{}", out.stderr);
	assert!(out.stderr.contains("`nonexistent` matched nothing"), "{}", out.stderr);
	assert_eq!(ctx.scheduler_state().jobs[0].hostnames, vec!["twitter.com"]);
}

#[rstest]
fn wildcard_needs_confirmation(ctx: TestContext) {
	let out = ctx.unblk(&["-r", "need everything", "-d", "10", "all"], "\n");
	assert!(out.status.success(), "{}", out.stderr);
	assert_eq!(out.stdout.trim(), "Done: ALL for 10m");
	assert_eq!(
		ctx.read_hosts(),
		"\
127.0.0.1 localhost
#0.0.0.0 youtube.com # BLOCKME
#0.0.0.0 www.youtube.com # BLOCKME
#0.0.0.0 twitter.com # BLOCKME
0.0.0.0 docs.rs # NEVERBLOCK
"
	);

	// 10 minutes alone would be 0-2s; the wildcard floor is 30-90s.
	let delays = TraceLog::from_file(&ctx.trace_file).delays();
	assert!((30..=90).contains(&delays[0]), "{delays:?}");
	assert!(ctx.audit_log().unwrap().trim_end().ends_with("; Scope: ALL"));
	assert!(!ctx.state_dir.join("recents").exists());
}

#[rstest]
fn wildcard_without_confirmation_is_denied(ctx: TestContext) {
	let out = ctx.unblk(&["-r", "need everything", "-d", "10", "ALL"], "");
	assert!(!out.status.success());
	assert!(out.stderr.contains("confirmation window"), "{}", out.stderr);
	assert_eq!(ctx.read_hosts(), HOSTS);
}

#[rstest]
fn scheduler_failure_rolls_back(ctx: TestContext) {
	ctx.set_scheduler_state(&MockSchedulerState {
		reject_next: 10,
		..MockSchedulerState::default()
	});

	let out = ctx.unblk(&["-r", "need everything", "-d", "10", "all"], "\n");
	assert!(!out.status.success());
	assert!(out.stderr.contains("could not schedule the automatic re-block after 4 attempt(s)"), "{}", out.stderr);
	assert_eq!(ctx.read_hosts(), HOSTS);
	assert_eq!(ctx.scheduler_state().attempts, 4);
	assert!(ctx.audit_log().is_none());
}

#[rstest]
fn unavailable_scheduler_fails_closed(ctx: TestContext) {
	ctx.set_scheduler_state(&MockSchedulerState {
		unavailable: true,
		..MockSchedulerState::default()
	});

	let out = ctx.unblk(&["-r", "reading the docs", "-d", "10", "youtube"], "");
	assert!(!out.status.success());
	assert_eq!(ctx.read_hosts(), HOSTS);
	assert_eq!(ctx.scheduler_state().attempts, 0);
}

#[rstest]
fn interactive_prompts_reprompt_on_bad_input(ctx: TestContext) {
	let out = ctx.unblk(&[], "bored\nchecking the news\nsoon\n25\ntwitter\n");
	assert!(out.status.success(), "{}", out.stderr);
	assert!(out.stderr.contains("reason must be at least 6 characters"), "{}", out.stderr);
	assert!(out.stderr.contains("Enter a valid number"), "{}", out.stderr);
	assert!(ctx.read_hosts().contains("\n#0.0.0.0 twitter.com # BLOCKME\n"));
}

#[rstest]
fn empty_pattern_input_offers_recents(ctx: TestContext) {
	assert!(ctx.unblk(&["-r", "checking the news", "-d", "10", "twitter"], "").status.success());
	assert!(ctx.blk(&[]).status.success());

	let out = ctx.unblk(&["-r", "checking the news", "-d", "10"], "\n1\n");
	assert!(out.status.success(), "{}", out.stderr);
	assert!(out.stderr.contains("1) twitter.com"), "{}", out.stderr);
	assert!(ctx.read_hosts().contains("\n#0.0.0.0 twitter.com # BLOCKME\n"));
}

#[rstest]
fn eof_at_a_prompt_cancels(ctx: TestContext) {
	let out = ctx.unblk(&["-d", "10", "youtube"], "");
	assert!(!out.status.success());
	assert!(out.stderr.contains("Cancelled"), "{}", out.stderr);
	assert_eq!(ctx.read_hosts(), HOSTS);
}
