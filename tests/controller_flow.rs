//! Controller behaviour against the fake scheduler: dependency chaining,
//! idempotent re-invocation, failure halting and restart cascades.

mod common;

use retrio::engine::{Controller, IterationState};
use retrio::ledger::JobLedger;
use retrio::restart::RestartSpec;
use retrio::types::{JobStatus, Parent};
use retrio_test_utils::builders::{minimal_resources, test_context};
use retrio_test_utils::fake_scheduler::FakeScheduler;

use retrio::config::load_metadata;

/// One trio, 2 regions, 1 test genome: 10 nodes per iteration.
fn load_fixture(dir: &std::path::Path) -> Vec<retrio::config::metadata::Trio> {
    let metadata = common::write_metadata(dir, "trio-a", 1);
    load_metadata(&metadata, None).unwrap()
}

#[test]
fn fresh_run_submits_both_iterations_with_dependency_chains() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let trios = load_fixture(dir.path());
    let ctx = test_context(dir.path().join("out"));
    let resources = minimal_resources();

    let scheduler = FakeScheduler::new();
    let mut controller =
        Controller::new(&ctx, &resources, "deeptrainer", scheduler.handle());
    let report = controller.run(&trios, None).unwrap();

    // 10 nodes per iteration, both iterations submitted in one invocation.
    assert_eq!(report.total_submitted(), 20);
    assert_eq!(scheduler.submission_count(), 20);

    let submitted = scheduler.submitted();
    let request_of = |slug: &str| {
        submitted
            .iter()
            .find(|r| r.node.slug() == slug)
            .unwrap_or_else(|| panic!("no submission for {slug}"))
    };

    // Fan-in: re_shuffle waits for every region shuffle.
    let re_shuffle = request_of("re_shuffle-Father");
    let shuffle_ids = vec![
        scheduler.id_of("shuffle-Father-1").unwrap(),
        scheduler.id_of("shuffle-Father-2").unwrap(),
    ];
    assert_eq!(re_shuffle.dependencies, shuffle_ids);

    // Iteration 1 training waits on its own re_shuffle only.
    let train_1 = request_of("train_eval-Father");
    assert_eq!(
        train_1.dependencies,
        vec![scheduler.id_of("re_shuffle-Father").unwrap()]
    );

    // Iteration 2 training waits on its own re_shuffle plus the prior
    // iteration's re_shuffle and selected checkpoint.
    let train_2 = request_of("train_eval-Mother");
    assert!(train_2
        .dependencies
        .contains(&scheduler.id_of("re_shuffle-Mother").unwrap()));
    assert!(train_2
        .dependencies
        .contains(&scheduler.id_of("re_shuffle-Father").unwrap()));
    assert!(train_2
        .dependencies
        .contains(&scheduler.id_of("select_ckpt-Child").unwrap()));

    // Every submission wrote its batch script.
    for request in &submitted {
        assert!(request.script_path.exists(), "missing {:?}", request.script_path);
    }
}

#[test]
fn reinvocation_against_unchanged_ledger_submits_nothing() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let trios = load_fixture(dir.path());
    let ctx = test_context(dir.path().join("out"));
    let resources = minimal_resources();
    let scheduler = FakeScheduler::new();

    let mut first = Controller::new(&ctx, &resources, "deeptrainer", scheduler.handle());
    first.run(&trios, None).unwrap();
    assert_eq!(scheduler.submission_count(), 20);

    // A separate invocation: fresh controller, same ledger on disk.
    let mut second = Controller::new(&ctx, &resources, "deeptrainer", scheduler.handle());
    let report = second.run(&trios, None).unwrap();

    assert_eq!(report.total_submitted(), 0);
    assert_eq!(scheduler.submission_count(), 20);
    for itr in &report.iterations {
        assert_eq!(itr.reused, 10);
        assert!(itr.blocked.is_empty());
    }
}

#[test]
fn failed_jobs_halt_in_place_until_an_explicit_restart() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let trios = load_fixture(dir.path());
    let ctx = test_context(dir.path().join("out"));
    let resources = minimal_resources();
    let scheduler = FakeScheduler::new();

    let mut controller =
        Controller::new(&ctx, &resources, "deeptrainer", scheduler.handle());
    controller.run(&trios, None).unwrap();

    // The scheduler reports one region shuffle as failed.
    let failed_id = scheduler.id_of("shuffle-Father-1").unwrap();
    scheduler.set_state(failed_id, JobStatus::Failed);
    let mut status_ctl =
        Controller::new(&ctx, &resources, "deeptrainer", scheduler.handle());
    let status = status_ctl.status(&trios, true).unwrap();
    assert_eq!(status.iterations[0].state, IterationState::GeneratingExamples);
    assert_eq!(status.iterations[0].blocked.len(), 1);

    // Re-running without a restart spec must not resubmit the failed job.
    let mut retry = Controller::new(&ctx, &resources, "deeptrainer", scheduler.handle());
    let report = retry.run(&trios, None).unwrap();
    assert_eq!(report.total_submitted(), 0);
    assert!(report.iterations[0]
        .blocked
        .iter()
        .any(|k| k.slug() == "shuffle-Father-1"));

    // An explicit restart cascades to the full downstream closure: the
    // failed shuffle, the fan-in, training, selection and the test branch.
    let spec = RestartSpec::parse(r#"{"shuffle:Father": [1]}"#).unwrap();
    let mut restarted =
        Controller::new(&ctx, &resources, "deeptrainer", scheduler.handle());
    let report = restarted.run(&trios, Some(&spec)).unwrap();
    assert_eq!(report.total_submitted(), 7);
    assert_eq!(scheduler.submission_count(), 27);

    // The superseded job stays in the ledger history; the new attempt is 2.
    let ledger =
        JobLedger::load(ctx.ledger_log_path(&trios[0]), trios[0].name.clone()).unwrap();
    let shuffle_key = retrio::dag::NodeKey::region(
        retrio::types::Phase::Shuffle,
        retrio::types::GenomeRole::Father,
        1,
    );
    let history = ledger.history(Parent::Father, &shuffle_key);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].job_id, failed_id);
    assert_eq!(history[0].status, JobStatus::Failed);
    assert_eq!(history[1].attempt, 2);
}

#[test]
fn submission_rejection_aborts_only_its_own_branch() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let trios = load_fixture(dir.path());
    let ctx = test_context(dir.path().join("out"));
    let resources = minimal_resources();
    let scheduler = FakeScheduler::new();
    scheduler.reject("train_eval-Father");

    let mut controller =
        Controller::new(&ctx, &resources, "deeptrainer", scheduler.handle());
    let report = controller.run(&trios, None).unwrap();

    // Iteration 1: everything up to training submits, the rejected node and
    // its downstream closure are halted.
    let itr1 = &report.iterations[0];
    assert_eq!(itr1.state, IterationState::Aborted);
    assert_eq!(itr1.submitted, 5);
    assert!(itr1.blocked.iter().any(|k| k.slug() == "train_eval-Father"));
    assert!(itr1.blocked.iter().any(|k| k.slug() == "select_ckpt-Child"));

    // Iteration 2 is a sibling branch: its example generation still runs,
    // only its training (gated on iteration 1's checkpoint) is blocked.
    let itr2 = &report.iterations[1];
    assert_ne!(itr2.state, IterationState::Aborted);
    assert_eq!(itr2.submitted, 5);
    assert!(itr2.blocked.iter().any(|k| k.slug() == "train_eval-Mother"));

    let slugs = scheduler.submitted_slugs();
    assert!(slugs.contains(&"make_examples-Mother-1".to_string()));
    assert!(!slugs.contains(&"call_variants-Test1-1".to_string()));
}

#[test]
fn adopted_external_jobs_are_tracked_but_never_submitted() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let trios = load_fixture(dir.path());
    let mut ctx = test_context(dir.path().join("out"));
    ctx.stop_itr = 1;
    let resources = minimal_resources();
    let scheduler = FakeScheduler::new();

    // The user says make_examples region 1 is already running as job
    // 123456789; everything else submits fresh.
    let spec = RestartSpec::parse(r#"{"make_examples:Father": [123456789]}"#).unwrap();
    let mut controller =
        Controller::new(&ctx, &resources, "deeptrainer", scheduler.handle());
    controller.run(&trios, Some(&spec)).unwrap();

    let slugs = scheduler.submitted_slugs();
    assert!(!slugs.contains(&"make_examples-Father-1".to_string()));
    assert!(slugs.contains(&"make_examples-Father-2".to_string()));

    // The dependent shuffle waits on the adopted id.
    let shuffle = scheduler
        .submitted()
        .into_iter()
        .find(|r| r.node.slug() == "shuffle-Father-1")
        .unwrap();
    assert!(shuffle
        .dependencies
        .contains(&retrio::types::JobId(123_456_789)));

    let ledger =
        JobLedger::load(ctx.ledger_log_path(&trios[0]), trios[0].name.clone()).unwrap();
    let key = retrio::dag::NodeKey::region(
        retrio::types::Phase::MakeExamples,
        retrio::types::GenomeRole::Father,
        1,
    );
    let rec = ledger.latest(Parent::Father, &key).unwrap();
    assert_eq!(rec.job_id, retrio::types::JobId(123_456_789));
    assert_eq!(rec.status, JobStatus::Running);
}
