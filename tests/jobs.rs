use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use packflow::choices::{ProcessingConfigChoices, StaticChoices};
use packflow::errors::PackflowError;
use packflow::jobs::{Job, JobChain, JobOutcome};
use packflow::workflow::{JobStatus, Workflow};
use packflow_test_utils::builders::test_settings;
use packflow_test_utils::{
    FakeDispatcher, FlakyStore, LinkBuilder, TestEnv, WorkflowBuilder, init_tracing, with_timeout,
};

type TestResult = Result<(), Box<dyn Error>>;

fn first_job(env: &TestEnv, workflow: Workflow, dir: &str) -> Result<Job, Box<dyn Error>> {
    let package = env.package("pkg", dir);
    let job = JobChain::start(package, Arc::new(workflow), env.services.clone())?
        .ok_or("chain has no first job")?;
    Ok(job)
}

fn single_link(link: LinkBuilder) -> Workflow {
    WorkflowBuilder::new()
        .start("c")
        .chain("c", "a")
        .link("a", link)
        .build()
}

#[tokio::test]
async fn directory_job_renders_escaped_arguments() -> TestResult {
    init_tracing();
    let env = TestEnv::new(FakeDispatcher::new());
    let package = env.package(r#"say "hi""#, "/transfers/one");
    let workflow = single_link(
        LinkBuilder::directory("verify")
            .arguments(r#""%SIPName%" "%SIPDirectory%" "%missing%""#)
            .last(),
    );
    let mut job = JobChain::start(package, Arc::new(workflow), env.services.clone())?
        .ok_or("no job")?;

    let outcome = with_timeout(job.run()).await;
    assert!(matches!(outcome, JobOutcome::Completed(0)), "{outcome:?}");
    assert_eq!(job.status(), JobStatus::CompletedSuccessfully);
    assert_eq!(job.task_count(), 1);

    let requests = env.dispatcher.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].execute, "verify");
    assert_eq!(
        requests[0].arguments,
        r#""say \"hi\"" "/transfers/one/" "%missing%""#
    );
    assert_eq!(env.store.tasks().len(), 1);
    Ok(())
}

#[tokio::test]
async fn capture_paths_are_rendered_without_escaping() -> TestResult {
    let env = TestEnv::new(FakeDispatcher::new());
    let workflow = single_link(
        LinkBuilder::directory("verify")
            .stdout_file("%SIPLogsDirectory%verify.log")
            .last(),
    );
    let mut job = first_job(&env, workflow, "/p")?;

    with_timeout(job.run()).await;

    let request = &env.dispatcher.requests()[0];
    assert_eq!(request.stdout_file, Some(PathBuf::from("/p/logs/verify.log")));
    assert_eq!(request.stderr_file, None);
    Ok(())
}

#[tokio::test]
async fn job_reloads_package_location_before_running() -> TestResult {
    let env = TestEnv::new(FakeDispatcher::new());
    let workflow = single_link(LinkBuilder::directory("x").arguments("%SIPDirectory%").last());
    let mut job = first_job(&env, workflow, "/incoming/pkg")?;
    env.store.set_location(job.package_id(), "/processing/pkg");

    with_timeout(job.run()).await;

    assert_eq!(job.package().current_path(), PathBuf::from("/processing/pkg"));
    assert_eq!(env.dispatcher.requests()[0].arguments, "/processing/pkg/");
    Ok(())
}

#[tokio::test]
async fn nonzero_exit_uses_fallback_status() -> TestResult {
    let env = TestEnv::new(FakeDispatcher::new().with_exit_code("check", 4));
    let workflow = single_link(LinkBuilder::directory("check").last());
    let mut job = first_job(&env, workflow, "/p")?;

    let outcome = with_timeout(job.run()).await;
    assert!(matches!(outcome, JobOutcome::Completed(4)));
    assert_eq!(job.exit_code(), Some(4));
    assert_eq!(job.status(), JobStatus::Failed);

    let records = env.store.jobs();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, JobStatus::Failed);
    assert!(job.into_next()?.is_none());
    Ok(())
}

#[tokio::test]
async fn dispatch_failure_completes_job_with_exit_one() -> TestResult {
    let env = TestEnv::new(FakeDispatcher::failing("worker unreachable"));
    let workflow = single_link(LinkBuilder::directory("x").last());
    let mut job = first_job(&env, workflow, "/p")?;

    let outcome = with_timeout(job.run()).await;
    assert!(matches!(outcome, JobOutcome::Completed(1)));
    assert!(env.store.tasks()[0].stderr.contains("worker unreachable"));
    Ok(())
}

#[tokio::test]
async fn files_job_without_matches_succeeds_without_tasks() -> TestResult {
    let env = TestEnv::new(FakeDispatcher::new());
    let workflow = single_link(LinkBuilder::files("normalize").filter_subdir("objects").last());
    let mut job = first_job(&env, workflow, "/p")?;
    env.fs.add_file("/p/logs/event.log", "x");

    let outcome = with_timeout(job.run()).await;
    assert!(matches!(outcome, JobOutcome::Completed(0)));
    assert_eq!(job.task_count(), 0);
    assert!(env.dispatcher.batches().is_empty());
    Ok(())
}

#[tokio::test]
async fn files_job_runs_one_task_per_matching_file() -> TestResult {
    let env = TestEnv::new(FakeDispatcher::new());
    let workflow = single_link(
        LinkBuilder::files("normalize")
            .filter_subdir("objects")
            .filter_pattern("**/*.tif")
            .arguments(r#""%relativeLocation%" "%fileName%%fileExtensionWithDot%""#)
            .last(),
    );
    let mut job = first_job(&env, workflow, "/p")?;
    env.fs.add_file("/p/objects/a.tif", "a");
    env.fs.add_file("/p/objects/sub/b.tif", "b");
    env.fs.add_file("/p/objects/c.txt", "c");
    env.fs.add_file("/p/logs/d.tif", "d");

    let outcome = with_timeout(job.run()).await;
    assert!(matches!(outcome, JobOutcome::Completed(0)));
    assert_eq!(job.task_count(), 2);

    let mut arguments: Vec<String> = env
        .dispatcher
        .requests()
        .into_iter()
        .map(|r| r.arguments)
        .collect();
    arguments.sort();
    assert_eq!(
        arguments,
        vec![
            r#""objects/a.tif" "a.tif""#.to_string(),
            r#""objects/sub/b.tif" "b.tif""#.to_string(),
        ]
    );

    let request = env
        .dispatcher
        .requests()
        .into_iter()
        .find(|r| r.arguments.contains("sub/b.tif"))
        .ok_or("no request for b.tif")?;
    assert_eq!(request.context.get("%fileDirectory%"), Some("/p/objects/sub"));
    assert_eq!(request.context.get("%inputFile%"), Some("/p/objects/sub/b.tif"));
    assert_eq!(request.context.get("%fileExtension%"), Some("tif"));
    Ok(())
}

#[tokio::test]
async fn files_job_reports_worst_exit_code() -> TestResult {
    let env = TestEnv::new(FakeDispatcher::new().with_exit_code("scan", 2));
    let workflow = single_link(LinkBuilder::files("scan").last());
    let mut job = first_job(&env, workflow, "/p")?;
    env.fs.add_file("/p/a", "a");
    env.fs.add_file("/p/b", "b");

    let outcome = with_timeout(job.run()).await;
    assert!(matches!(outcome, JobOutcome::Completed(2)));
    assert_eq!(job.task_count(), 2);
    Ok(())
}

#[tokio::test]
async fn stage_transition_link_moves_package_to_next_stage() -> TestResult {
    let mut settings = test_settings();
    settings.stage_transition_link = Some("move".to_string());
    let env = TestEnv::build(
        FakeDispatcher::new(),
        Arc::new(packflow::choices::NoChoices),
        8,
        settings,
    );
    let workflow = WorkflowBuilder::new()
        .start("c")
        .chain("c", "first")
        .link("first", LinkBuilder::directory("x").then("move"))
        .link("move", LinkBuilder::directory("y").last())
        .build();

    let mut job = first_job(&env, workflow, "/p")?;
    let package_id = job.package_id();
    with_timeout(job.run()).await;
    assert!(env.store.stage_transitions().is_empty());

    let mut next = job.into_next()?.ok_or("no second job")?;
    with_timeout(next.run()).await;
    assert_eq!(env.store.stage_transitions(), vec![package_id]);
    Ok(())
}

#[tokio::test]
async fn update_context_decision_feeds_later_links() -> TestResult {
    let env = TestEnv::new(FakeDispatcher::new());
    let workflow = WorkflowBuilder::new()
        .start("c")
        .chain("c", "ask")
        .link(
            "ask",
            LinkBuilder::update_context_decision(&[
                ("Keep originals", &[("%normalize%", "no")]),
                ("Normalize", &[("%normalize%", "yes")]),
            ])
            .then("run"),
        )
        .link("run", LinkBuilder::directory("normalize").arguments("%normalize%").last())
        .build();

    let mut job = first_job(&env, workflow, "/p")?;
    let package_id = job.package_id();

    let outcome = with_timeout(job.run()).await;
    assert!(matches!(outcome, JobOutcome::Suspended));
    assert!(job.is_awaiting_decision());
    assert_eq!(job.status(), JobStatus::AwaitingDecision);

    let choices = job.choices()?;
    let values: Vec<&str> = choices.iter().map(|c| c.value.as_str()).collect();
    assert_eq!(values, vec!["0", "1"]);
    assert_eq!(choices[1].description, "Normalize");

    job.decide("1").await?;
    assert!(!job.is_awaiting_decision());
    assert_eq!(job.exit_code(), Some(0));
    assert_eq!(job.chain().context().get("%normalize%"), Some("yes"));
    assert_eq!(
        env.store.context_of(package_id).and_then(|c| c.get("%normalize%").map(String::from)),
        Some("yes".to_string())
    );

    let mut next = job.into_next()?.ok_or("no job after decision")?;
    with_timeout(next.run()).await;
    assert_eq!(env.dispatcher.requests()[0].arguments, "yes");
    Ok(())
}

#[tokio::test]
async fn invalid_choice_keeps_job_waiting() -> TestResult {
    let env = TestEnv::new(FakeDispatcher::new());
    let workflow = WorkflowBuilder::new()
        .start("c")
        .chain("c", "ask")
        .chain("other", "b")
        .link("ask", LinkBuilder::next_chain_decision(&["other"]))
        .link("b", LinkBuilder::directory("x").last())
        .build();
    let mut job = first_job(&env, workflow, "/p")?;
    with_timeout(job.run()).await;

    let err = job.decide("elsewhere").await.unwrap_err();
    assert!(matches!(err, PackflowError::InvalidChoice { ref choice, .. } if choice == "elsewhere"));
    assert!(job.is_awaiting_decision());
    assert_eq!(job.status(), JobStatus::AwaitingDecision);
    assert_eq!(job.exit_code(), None);
    Ok(())
}

#[tokio::test]
async fn client_script_job_is_not_a_decision() -> TestResult {
    let env = TestEnv::new(FakeDispatcher::new());
    let job = first_job(&env, single_link(LinkBuilder::directory("x").last()), "/p")?;
    assert!(matches!(job.choices(), Err(PackflowError::NotADecision(id)) if id == "a"));
    Ok(())
}

#[tokio::test]
async fn next_chain_decision_switches_chain() -> TestResult {
    let env = TestEnv::new(FakeDispatcher::new());
    let workflow = WorkflowBuilder::new()
        .start("c")
        .chain("c", "ask")
        .chain("ingest", "store")
        .rejecting_chain("reject", "remove")
        .link("ask", LinkBuilder::next_chain_decision(&["ingest", "reject"]))
        .link("store", LinkBuilder::directory("store_aip").last())
        .link("remove", LinkBuilder::directory("remove_unit").last())
        .build();
    let mut job = first_job(&env, workflow, "/p")?;
    with_timeout(job.run()).await;

    let values: Vec<String> = job.choices()?.into_iter().map(|c| c.value).collect();
    assert_eq!(values, vec!["ingest", "reject"]);

    job.decide("reject").await?;
    let mut next = job.into_next()?.ok_or("no job in chosen chain")?;
    assert_eq!(next.chain().chain().id, "reject");
    assert!(next.chain().rejects());
    assert_eq!(next.link().id, "remove");

    with_timeout(next.run()).await;
    assert_eq!(env.dispatcher.executed(), vec!["remove_unit"]);
    Ok(())
}

#[tokio::test]
async fn preconfigured_choice_resolves_decision() -> TestResult {
    let choices = StaticChoices::new().with_choice("ask", "ingest");
    let env = TestEnv::with_choices(FakeDispatcher::new(), Arc::new(choices));
    let workflow = WorkflowBuilder::new()
        .start("c")
        .chain("c", "ask")
        .chain("ingest", "store")
        .link("ask", LinkBuilder::next_chain_decision(&["ingest"]))
        .link("store", LinkBuilder::directory("store_aip").last())
        .build();
    let mut job = first_job(&env, workflow, "/p")?;

    let outcome = with_timeout(job.run()).await;
    assert!(matches!(outcome, JobOutcome::Completed(0)), "{outcome:?}");
    assert!(!job.is_awaiting_decision());

    let next = job.into_next()?.ok_or("no job in chosen chain")?;
    assert_eq!(next.link().id, "store");
    Ok(())
}

#[tokio::test]
async fn invalid_preconfigured_choice_is_ignored() -> TestResult {
    let choices = StaticChoices::new().with_choice("ask", "nowhere");
    let env = TestEnv::with_choices(FakeDispatcher::new(), Arc::new(choices));
    let workflow = WorkflowBuilder::new()
        .start("c")
        .chain("c", "ask")
        .chain("ingest", "store")
        .link("ask", LinkBuilder::next_chain_decision(&["ingest"]))
        .link("store", LinkBuilder::directory("store_aip").last())
        .build();
    let mut job = first_job(&env, workflow, "/p")?;

    let outcome = with_timeout(job.run()).await;
    assert!(matches!(outcome, JobOutcome::Suspended));
    Ok(())
}

#[tokio::test]
async fn processing_file_in_package_answers_decision() -> TestResult {
    let fs = packflow::fs::mock::MockFileSystem::new();
    let choices = ProcessingConfigChoices::new(Arc::new(fs.clone()), "processingMCP.toml");
    let mut env = TestEnv::with_choices(FakeDispatcher::new(), Arc::new(choices));
    env.fs = Arc::new(fs.clone());
    env.services.fs = env.fs.clone();

    let workflow = WorkflowBuilder::new()
        .start("c")
        .chain("c", "ask")
        .chain("ingest", "store")
        .rejecting_chain("reject", "remove")
        .link("ask", LinkBuilder::next_chain_decision(&["ingest", "reject"]))
        .link("store", LinkBuilder::directory("store_aip").last())
        .link("remove", LinkBuilder::directory("remove_unit").last())
        .build();
    fs.add_file("/p/processingMCP.toml", "[choices]\nask = \"reject\"\n");
    let mut job = first_job(&env, workflow, "/p")?;

    let outcome = with_timeout(job.run()).await;
    assert!(matches!(outcome, JobOutcome::Completed(0)), "{outcome:?}");
    let next = job.into_next()?.ok_or("no job in chosen chain")?;
    assert_eq!(next.link().id, "remove");
    Ok(())
}

#[tokio::test]
async fn files_job_skips_the_processing_file() -> TestResult {
    let fs = packflow::fs::mock::MockFileSystem::new();
    let choices = ProcessingConfigChoices::new(Arc::new(fs.clone()), "processingMCP.toml");
    let mut env = TestEnv::with_choices(FakeDispatcher::new(), Arc::new(choices));
    env.fs = Arc::new(fs.clone());
    env.services.fs = env.fs.clone();

    let workflow = single_link(LinkBuilder::files("scan").arguments("%relativeLocation%").last());
    fs.add_file("/p/processingMCP.toml", "[choices]\n");
    fs.add_file("/p/objects/a.tif", "a");
    let mut job = first_job(&env, workflow, "/p")?;

    let outcome = with_timeout(job.run()).await;
    assert!(matches!(outcome, JobOutcome::Completed(0)));
    let arguments: Vec<String> = env.dispatcher.requests().into_iter().map(|r| r.arguments).collect();
    assert_eq!(arguments, vec!["objects/a.tif".to_string()]);
    Ok(())
}

#[tokio::test]
async fn output_script_choices_feed_output_decision() -> TestResult {
    let dispatcher = FakeDispatcher::new()
        .with_stdout("list_formats", r#"{"mp4": "MPEG-4", "mkv": "Matroska"}"#);
    let env = TestEnv::new(dispatcher);
    let workflow = WorkflowBuilder::new()
        .start("c")
        .chain("c", "list")
        .link("list", LinkBuilder::output_client_script("list_formats").then("pick"))
        .link("pick", LinkBuilder::output_decision("%format%").then("convert"))
        .link("convert", LinkBuilder::directory("convert").arguments("%format%").last())
        .build();

    let mut job = first_job(&env, workflow, "/p")?;
    let outcome = with_timeout(job.run()).await;
    assert!(matches!(outcome, JobOutcome::Completed(0)), "{outcome:?}");
    assert!(env.dispatcher.requests()[0].wants_output);
    assert_eq!(job.chain().generated_choices().len(), 2);

    let mut pick = job.into_next()?.ok_or("no decision job")?;
    assert!(matches!(with_timeout(pick.run()).await, JobOutcome::Suspended));
    let values: Vec<String> = pick.choices()?.into_iter().map(|c| c.value).collect();
    assert_eq!(values, vec!["mkv", "mp4"]);

    pick.decide("mp4").await?;
    let mut convert = pick.into_next()?.ok_or("no job after decision")?;
    with_timeout(convert.run()).await;

    let requests = env.dispatcher.requests();
    assert_eq!(requests.last().map(|r| r.arguments.as_str()), Some("mp4"));
    Ok(())
}

#[tokio::test]
async fn unparseable_script_output_fails_the_job() -> TestResult {
    let env = TestEnv::new(FakeDispatcher::new().with_stdout("list", "not json"));
    let workflow = single_link(LinkBuilder::output_client_script("list").last());
    let mut job = first_job(&env, workflow, "/p")?;

    let outcome = with_timeout(job.run()).await;
    assert!(matches!(outcome, JobOutcome::Completed(1)));
    assert_eq!(job.status(), JobStatus::Failed);
    assert!(job.chain().generated_choices().is_empty());
    Ok(())
}

#[tokio::test]
async fn unit_variable_redirects_a_later_link() -> TestResult {
    let env = TestEnv::new(FakeDispatcher::new());
    let workflow = WorkflowBuilder::new()
        .start("c")
        .chain("c", "remember")
        .link(
            "remember",
            LinkBuilder::set_unit_variable("resume", Some("normalize"), Some("later")).then("jump"),
        )
        .link(
            "jump",
            LinkBuilder::get_unit_variable("resume", Some("default")).then("skipped"),
        )
        .link("skipped", LinkBuilder::directory("skipped").last())
        .link("default", LinkBuilder::directory("default").last())
        .link("later", LinkBuilder::directory("later").last())
        .build();

    let mut next = Some(first_job(&env, workflow, "/p")?);
    while let Some(mut job) = next {
        let outcome = with_timeout(job.run()).await;
        assert!(matches!(outcome, JobOutcome::Completed(0)), "{outcome:?}");
        next = job.into_next()?;
    }

    assert_eq!(env.dispatcher.executed(), vec!["later"]);
    Ok(())
}

#[tokio::test]
async fn unset_unit_variable_uses_default_link() -> TestResult {
    let env = TestEnv::new(FakeDispatcher::new());
    let workflow = WorkflowBuilder::new()
        .start("c")
        .chain("c", "jump")
        .link("jump", LinkBuilder::get_unit_variable("resume", Some("default")).last())
        .link("default", LinkBuilder::directory("default").last())
        .build();

    let mut job = first_job(&env, workflow, "/p")?;
    with_timeout(job.run()).await;
    let next = job.into_next()?.ok_or("default link not forced")?;
    assert_eq!(next.link().id, "default");
    Ok(())
}

#[tokio::test]
async fn broken_store_never_fails_a_job() -> TestResult {
    let env = TestEnv::new(FakeDispatcher::new()).with_store(Arc::new(FlakyStore::broken()));
    let workflow = single_link(LinkBuilder::directory("x").last());
    let mut job = first_job(&env, workflow, "/p")?;

    let outcome = with_timeout(job.run()).await;
    assert!(matches!(outcome, JobOutcome::Completed(0)));
    assert_eq!(job.status(), JobStatus::CompletedSuccessfully);
    Ok(())
}

#[tokio::test]
async fn store_calls_are_retried() -> TestResult {
    let store = Arc::new(FlakyStore::new(1));
    let env = TestEnv::new(FakeDispatcher::new()).with_store(store.clone());
    let workflow = single_link(LinkBuilder::directory("x").last());
    let mut job = first_job(&env, workflow, "/p")?;

    with_timeout(job.run()).await;

    let jobs = store.inner.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::CompletedSuccessfully);
    assert_eq!(store.inner.tasks().len(), 1);
    assert!(store.calls() >= 5);
    Ok(())
}
