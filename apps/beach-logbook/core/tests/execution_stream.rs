use beach_logbook_core::{
    LineOutcome, LogSession, ManualClock, RecordingSink, Run, RunAggregator, RunEvent,
    RunStatus, StepStatus,
};
use time::macros::datetime;
use time::Duration;

const VALIDATION_FAILURE: [&str; 4] = [
    "=== Execution Start ===",
    "[2025-11-26 11:43:21] [Validating] Validated Request Method",
    "[2025-11-26 11:43:21] [Validating] <Failed> jkl;jkl;ding",
    "=== Execution End ===",
];

const PROVISIONING: [&str; 12] = [
    "========================= Execution Start =========================",
    "[2025-11-26 11:41:53] [Infrastructure Provisioning] [DNS] DNS Provisioning started",
    "[2025-11-26 11:41:56] [Infrastructure Provisioning] [DNS] <Success> DNS completed",
    "[2025-11-26 11:41:56] [Infrastructure Provisioning] [SSL] SSL Provisioning started",
    "[2025-11-26 11:42:56] [Infrastructure Provisioning] [SSL] <Failed> SSL failed: Invalid JSON response",
    "[2025-11-26 11:42:56] [Infrastructure Provisioning] [NGINX] NGINX Provisioning started",
    "[2025-11-26 11:43:13] [Infrastructure Provisioning] [NGINX] <Ok> NGINX completed",
    "[2025-11-26 11:43:13] [Infrastructure Provisioning] <Error> Final provisioning result: failed",
    "[2025-11-26 11:43:13] [Finishing Up] Committing DB transaction",
    "[2025-11-26 11:43:13] [Finishing Up] <Success> Mapping request completed",
    "[2025-11-26 11:43:13] [SUMMARY] <Skipped> nothing published",
    "========================== Execution End ==========================",
];

fn session(clock: &ManualClock) -> LogSession<RecordingSink, ManualClock> {
    LogSession::with_aggregator(RunAggregator::with_clock(
        "Execution #15",
        RecordingSink::new(),
        clock.clone(),
    ))
}

fn feed_all<'a>(
    session: &mut LogSession<RecordingSink, ManualClock>,
    clock: &ManualClock,
    lines: impl IntoIterator<Item = &'a str>,
) {
    for line in lines {
        session.feed(line).expect("parser never violates the aggregator contract");
        clock.advance(Duration::seconds(1));
    }
}

#[test_timeout::timeout]
fn validation_failure_round_trip() {
    let clock = ManualClock::new(datetime!(2025-11-26 11:43:21 UTC));
    let mut session = session(&clock);
    feed_all(&mut session, &clock, VALIDATION_FAILURE);

    let run = session.run();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.jobs.len(), 1);

    let job = &run.jobs[0];
    assert_eq!(job.name, "Execution");
    assert_eq!(job.status, RunStatus::Failed);
    assert_eq!(job.steps.len(), 1);

    let step = run.step(job.steps[0]).unwrap();
    assert_eq!(step.name, "Validating");
    assert_eq!(step.status, StepStatus::Failed);
    let messages: Vec<_> = step.logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["Validated Request Method", "jkl;jkl;ding"]);
    assert_eq!(run.duration_ms(), Some(3_000));
}

#[test_timeout::timeout]
fn done_sentinel_finalises_like_end_marker() {
    let clock = ManualClock::new(datetime!(2025-11-26 11:43:21 UTC));
    let mut with_banner = session(&clock);
    feed_all(&mut with_banner, &clock, VALIDATION_FAILURE);

    let clock = ManualClock::new(datetime!(2025-11-26 11:43:21 UTC));
    let mut with_sentinel = session(&clock);
    let mut lines = VALIDATION_FAILURE.to_vec();
    lines[3] = "[DONE]\n";
    feed_all(&mut with_sentinel, &clock, lines);

    assert_eq!(with_banner.run(), with_sentinel.run());
    assert_eq!(
        with_sentinel.aggregator().sink().events.last(),
        Some(&RunEvent::JobFinished {
            job: with_sentinel.run().jobs[0].id,
            status: RunStatus::Failed,
        })
    );
}

#[test_timeout::timeout]
fn sub_steps_are_created_once_per_key() {
    let clock = ManualClock::new(datetime!(2025-11-26 11:41:53 UTC));
    let mut session = session(&clock);
    feed_all(&mut session, &clock, PROVISIONING);

    let run = session.run();
    let job = &run.jobs[0];
    let names: Vec<_> = run.top_level_steps(job.id).map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Infrastructure Provisioning", "Finishing Up", "SUMMARY"]);

    let provisioning = run.step(job.steps[0]).unwrap();
    assert_eq!(provisioning.status, StepStatus::Failed);
    let subs: Vec<_> = run
        .children(provisioning.id)
        .map(|s| (s.name.as_str(), s.status, s.logs.len()))
        .collect();
    assert_eq!(
        subs,
        vec![
            ("DNS", StepStatus::Success, 2),
            ("SSL", StepStatus::Failed, 2),
            ("NGINX", StepStatus::Success, 2),
        ]
    );

    let dns = run.children(provisioning.id).next().unwrap();
    let numbers: Vec<_> = dns.logs.iter().map(|l| l.line_no).collect();
    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(dns.duration_ms, Some(1_000));

    assert_eq!(run.step(job.steps[2]).unwrap().status, StepStatus::Skipped);
    assert_eq!(run.steps.len(), 6);
    assert_eq!(run.status, RunStatus::Failed);
}

#[test_timeout::timeout]
fn slashes_in_labels_do_not_alias_sub_steps() {
    let clock = ManualClock::new(datetime!(2025-11-26 11:41:53 UTC));

    let mut top_first = session(&clock);
    feed_all(&mut top_first, &clock, ["[t] [a/b] top-level", "[t] [a] [b] nested"]);
    let run = top_first.run();
    let top = &run.steps[0];
    assert_eq!((top.name.as_str(), top.parent), ("a/b", None));
    assert_eq!(top.logs.len(), 1);
    let nested = run.steps.iter().find(|s| s.name == "b").unwrap();
    let parent = run.step(nested.parent.unwrap()).unwrap();
    assert_eq!(parent.name, "a");
    assert_eq!(nested.logs[0].message, "nested");

    let mut sub_first = session(&clock);
    feed_all(&mut sub_first, &clock, ["[t] [a] [b] first", "[t] [a/b] [c] second"]);
    let run = sub_first.run();
    let c = run.steps.iter().find(|s| s.name == "c").unwrap();
    let parent = run.step(c.parent.unwrap()).unwrap();
    assert_eq!((parent.name.as_str(), parent.parent), ("a/b", None));
    assert_eq!(c.logs[0].message, "second");
    assert_eq!(run.top_level_steps(run.jobs[0].id).count(), 2);
}

#[test_timeout::timeout]
fn garbage_lines_leave_state_untouched() {
    let clock = ManualClock::new(datetime!(2025-11-26 11:43:21 UTC));
    let mut clean = session(&clock);
    let mut noisy = session(&clock);

    let garbage = [
        "Validated Request Method",
        "   ",
        "<Failed> no brackets",
        "[only-one-group]",
        "",
    ];
    for line in garbage {
        let outcome = noisy.feed(line).unwrap();
        assert!(matches!(outcome, LineOutcome::Unparsed | LineOutcome::Empty));
    }

    assert_eq!(clean.run(), noisy.run());
    assert!(noisy.aggregator().sink().events.is_empty());
    assert_eq!(noisy.parser().current_job(), None);
    assert_eq!(noisy.parser().unparsed_lines(), 3);

    clean.feed(VALIDATION_FAILURE[1]).unwrap();
    noisy.feed(VALIDATION_FAILURE[1]).unwrap();
    assert_eq!(clean.run(), noisy.run());
}

#[test_timeout::timeout]
fn lines_before_start_auto_create_a_job() {
    let clock = ManualClock::new(datetime!(2025-11-26 11:43:21 UTC));
    let mut session = session(&clock);

    session.feed(VALIDATION_FAILURE[1]).unwrap();
    assert_eq!(session.run().jobs.len(), 1);
    assert_eq!(session.run().jobs[0].name, "Execution");
    assert_eq!(session.run().status, RunStatus::InProgress);

    session.feed("[DONE]").unwrap();
    assert_eq!(session.run().status, RunStatus::Success);

    // After the end marker a stray line opens a fresh job instead of wedging.
    session.feed("[t] [Late] straggler").unwrap();
    let run = session.run();
    assert_eq!(run.jobs.len(), 2);
    assert_eq!(run.status, RunStatus::InProgress);
    assert_eq!(run.jobs[1].steps.len(), 1);
}

#[test_timeout::timeout]
fn second_start_marker_resets_destructively() {
    let clock = ManualClock::new(datetime!(2025-11-26 11:43:21 UTC));
    let mut session = session(&clock);

    session.feed("=== Execution Start ===").unwrap();
    session.feed("[t] [Validating] first pass").unwrap();
    session.feed("=== Execution Start ===").unwrap();
    session.feed("[t] [Validating] second pass").unwrap();

    let run = session.run();
    assert_eq!(run.jobs.len(), 2);
    let first = run.step(run.jobs[0].steps[0]).unwrap();
    let second = run.step(run.jobs[1].steps[0]).unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(first.logs.len(), 1);
    assert_eq!(second.logs[0].message, "second pass");
    assert_eq!(first.status, StepStatus::InProgress);
}

#[test_timeout::timeout]
fn independent_sessions_are_deterministic_and_isolated() {
    let run_for = |lines: &[&str]| -> Run {
        let clock = ManualClock::new(datetime!(2025-11-26 11:41:53 UTC));
        let mut session = session(&clock);
        feed_all(&mut session, &clock, lines.iter().copied());
        session.into_run()
    };

    assert_eq!(run_for(&PROVISIONING), run_for(&PROVISIONING));

    let clock_a = ManualClock::new(datetime!(2025-11-26 11:41:53 UTC));
    let clock_b = ManualClock::new(datetime!(2025-11-26 11:41:53 UTC));
    let mut channel_a = session(&clock_a);
    let mut channel_b = session(&clock_b);
    for (a, b) in PROVISIONING.iter().zip(VALIDATION_FAILURE.iter().cycle()) {
        channel_a.feed(a).unwrap();
        channel_b.feed(b).unwrap();
    }
    assert_eq!(channel_a.run().steps.len(), 6);
    assert!(channel_b
        .run()
        .steps
        .iter()
        .all(|step| step.name == "Validating"));
}

#[test_timeout::timeout]
fn multi_line_messages_are_split() {
    let mut session = LogSession::new("run", RecordingSink::new());
    let outcomes = session
        .feed_message("[t] [A] one\n[t] [A] <ok> two\n[DONE]\n")
        .unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(
        outcomes[2],
        LineOutcome::RunFinished {
            status: RunStatus::Success
        }
    );
    assert_eq!(session.run().steps[0].logs.len(), 2);
}

#[test_timeout::timeout]
fn tree_serialises_for_presentation() {
    let clock = ManualClock::new(datetime!(2025-11-26 11:43:21 UTC));
    let mut session = session(&clock);
    feed_all(&mut session, &clock, VALIDATION_FAILURE);

    let json = serde_json::to_value(session.run()).unwrap();
    assert_eq!(json["status"], "failed");
    assert_eq!(json["jobs"][0]["name"], "Execution");
    assert_eq!(json["steps"][0]["logs"][1]["line_no"], 2);
    assert_eq!(json["started_at"], "2025-11-26T11:43:21Z");
}
