use std::error::Error;

use packflow::errors::PackflowError;
use packflow::package::PackageKind;
use packflow::workflow::{JobStatus, ManagerKind, parse_workflow};
use packflow_test_utils::{LinkBuilder, WorkflowBuilder, init_tracing};

type TestResult = Result<(), Box<dyn Error>>;

const DOCUMENT: &str = r#"
[start_chains]
transfer = "approve"
sip = "ingest"

[chains.approve]
description = "Approve transfer"
start_link_id = "verify"

[chains.ingest]
description = "Ingest"
start_link_id = "normalize"

[chains.reject]
description = "Reject transfer"
start_link_id = "remove"
rejects = true

[links.verify]
description = "Verify transfer"
group = "Approve"
manager = "directory"

[links.verify.config]
execute = "verify_transfer"
arguments = "\"%SIPDirectory%\" \"%SIPUUID%\""

[links.verify.exit_codes]
0 = { status = "completed_successfully", link_id = "approve-decision" }

[links.approve-decision]
manager = "next_chain_decision"
fallback_status = "completed_successfully"

[links.approve-decision.config]
chain_choices = ["ingest", "reject"]

[links.normalize]
manager = "files"
fallback_link_id = "remove"

[links.normalize.config]
execute = "normalize"
filter_subdir = "objects"
filter_pattern = "**/*.tif"

[links.remove]
manager = "directory"

[links.remove.config]
execute = "remove_unit"
"#;

#[test]
fn parses_a_complete_document() -> TestResult {
    init_tracing();
    let workflow = parse_workflow(DOCUMENT)?;

    assert_eq!(workflow.links().count(), 4);
    assert_eq!(workflow.chains().count(), 3);
    assert_eq!(workflow.start_chain_for(PackageKind::Transfer)?.id, "approve");
    assert_eq!(workflow.start_chain_for(PackageKind::Sip)?.id, "ingest");
    assert!(workflow.chain("reject")?.rejects);

    let verify = workflow.link("verify")?;
    assert_eq!(verify.manager, ManagerKind::Directory);
    assert_eq!(verify.group, "Approve");
    assert_eq!(verify.next_link_id(0).map(String::as_str), Some("approve-decision"));
    assert_eq!(verify.status_for(0), JobStatus::CompletedSuccessfully);
    assert_eq!(verify.status_for(1), JobStatus::Failed);
    assert_eq!(verify.next_link_id(1), None);

    let normalize = workflow.link("normalize")?;
    assert_eq!(normalize.next_link_id(7).map(String::as_str), Some("remove"));
    Ok(())
}

#[test]
fn missing_start_chain_for_kind_is_a_workflow_error() -> TestResult {
    let workflow = parse_workflow(DOCUMENT)?;
    let err = workflow.start_chain_for(PackageKind::Dip).unwrap_err();
    assert!(matches!(err, PackflowError::WorkflowError(_)));
    Ok(())
}

#[test]
fn unknown_ids_are_reported_by_kind() -> TestResult {
    let workflow = parse_workflow(DOCUMENT)?;
    assert!(matches!(
        workflow.link("nope"),
        Err(PackflowError::LinkNotFound(id)) if id == "nope"
    ));
    assert!(matches!(
        workflow.chain("nope"),
        Err(PackflowError::ChainNotFound(id)) if id == "nope"
    ));
    Ok(())
}

#[test]
fn unknown_manager_fails_to_parse() {
    let doc = r#"
[chains.c]
start_link_id = "a"

[links.a]
manager = "teleport"
"#;
    assert!(matches!(parse_workflow(doc), Err(PackflowError::TomlError(_))));
}

#[test]
fn non_integer_exit_code_key_is_rejected() {
    let doc = r#"
[chains.c]
start_link_id = "a"

[links.a]
manager = "directory"
config = { execute = "x" }
exit_codes = { zero = { status = "failed" } }
"#;
    let err = parse_workflow(doc).unwrap_err();
    assert!(matches!(err, PackflowError::WorkflowError(_)), "{err}");
}

#[test]
fn client_script_link_requires_execute() {
    let mut link = LinkBuilder::directory("x").build();
    link.config.execute = None;
    let mut raw = WorkflowBuilder::new().start("c").chain("c", "a").raw();
    raw.links.insert("a".to_string(), link);

    let err = packflow::workflow::Workflow::try_from(raw).unwrap_err();
    assert!(err.to_string().contains("execute"), "{err}");
}

#[test]
fn dangling_link_reference_is_rejected() {
    let result = WorkflowBuilder::new()
        .start("c")
        .chain("c", "a")
        .link("a", LinkBuilder::directory("x").then("missing"))
        .try_build();
    let err = result.unwrap_err();
    assert!(err.to_string().contains("missing"), "{err}");
}

#[test]
fn chain_start_must_exist() {
    let result = WorkflowBuilder::new()
        .start("c")
        .chain("c", "ghost")
        .link("a", LinkBuilder::directory("x").last())
        .try_build();
    assert!(result.is_err());
}

#[test]
fn decision_must_offer_existing_chains() {
    let result = WorkflowBuilder::new()
        .start("c")
        .chain("c", "a")
        .link("a", LinkBuilder::next_chain_decision(&["nowhere"]))
        .try_build();
    let err = result.unwrap_err();
    assert!(err.to_string().contains("nowhere"), "{err}");
}

#[test]
fn empty_decisions_are_rejected() {
    let next_chain = WorkflowBuilder::new()
        .start("c")
        .chain("c", "a")
        .link("a", LinkBuilder::next_chain_decision(&[]))
        .try_build();
    assert!(next_chain.is_err());

    let update_context = WorkflowBuilder::new()
        .start("c")
        .chain("c", "a")
        .link("a", LinkBuilder::update_context_decision(&[]))
        .try_build();
    assert!(update_context.is_err());
}

#[test]
fn invalid_filter_glob_is_rejected() {
    let result = WorkflowBuilder::new()
        .start("c")
        .chain("c", "a")
        .link("a", LinkBuilder::files("x").filter_pattern("[unclosed").last())
        .try_build();
    let err = result.unwrap_err();
    assert!(err.to_string().contains("filter_pattern"), "{err}");
}

#[test]
fn start_chains_must_exist() {
    let result = WorkflowBuilder::new()
        .start("elsewhere")
        .chain("c", "a")
        .link("a", LinkBuilder::directory("x").last())
        .try_build();
    assert!(result.is_err());
}

#[test]
fn workflow_without_chains_is_rejected() {
    let result = WorkflowBuilder::new()
        .link("a", LinkBuilder::directory("x").last())
        .try_build();
    assert!(result.is_err());
}

#[test]
fn unreachable_links_only_warn() -> TestResult {
    init_tracing();
    let workflow = WorkflowBuilder::new()
        .start("c")
        .chain("c", "a")
        .link("a", LinkBuilder::directory("x").last())
        .link("island", LinkBuilder::directory("y").last())
        .try_build()?;
    assert!(workflow.link("island").is_ok());
    Ok(())
}
