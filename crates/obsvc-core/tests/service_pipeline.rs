//! Run → merge → wait against a recording backend.

use std::sync::Arc;
use std::time::Duration;

use obsvc_core::backend::fakes::RecordingBackend;
use obsvc_core::{
    BackendError, BackendResponse, FailureReason, Method, ServiceDocument, ServiceInvocation,
    ServiceOrchestrator, ServiceStage,
};

const PACKAGE_PATH: &str = "/source/home:tom/test_package";

fn setup() -> (Arc<RecordingBackend>, ServiceOrchestrator) {
    let backend = Arc::new(RecordingBackend::new());
    let orchestrator = ServiceOrchestrator::new(backend.clone(), Duration::from_secs(30));
    (backend, orchestrator)
}

fn kiwi_import() -> ServiceDocument {
    let mut document = ServiceDocument::new();
    document.add_kiwi_import();
    document
}

#[tokio::test]
async fn kiwi_import_issues_run_merge_wait_in_order() {
    let (backend, orchestrator) = setup();

    let outcome = orchestrator
        .execute("home:tom", "test_package", "tom", &kiwi_import())
        .await
        .unwrap();

    let targets: Vec<String> = backend.requests().iter().map(|r| r.target()).collect();
    assert_eq!(
        targets,
        vec![
            format!("{PACKAGE_PATH}?cmd=runservice&user=tom"),
            format!("{PACKAGE_PATH}?cmd=mergeservice&user=tom"),
            format!("{PACKAGE_PATH}?cmd=waitservice"),
        ]
    );
    assert!(backend
        .requests()
        .iter()
        .all(|r| r.method == Method::Post));
    assert_eq!(outcome.results.len(), 3);
}

#[tokio::test]
async fn only_run_carries_the_document() {
    let (backend, orchestrator) = setup();
    orchestrator
        .execute("home:tom", "test_package", "tom", &kiwi_import())
        .await
        .unwrap();

    let run = &backend.requests_for("runservice")[0];
    let body = String::from_utf8(run.body.clone().unwrap()).unwrap();
    let sent = ServiceDocument::from_xml(&body).unwrap();
    assert_eq!(sent, kiwi_import());

    assert!(backend.requests_for("mergeservice")[0].body.is_none());
    assert!(backend.requests_for("waitservice")[0].body.is_none());
}

#[tokio::test]
async fn wait_never_carries_user() {
    let (backend, orchestrator) = setup();
    let mut document = kiwi_import();
    document.add_service(ServiceInvocation::new("set_version").with_param("version", "1.2"));

    orchestrator
        .execute("home:tom", "test_package", "tom", &document)
        .await
        .unwrap();

    for request in backend.requests() {
        let carries_user = request.has_query("user");
        match request.query_value("cmd") {
            Some("waitservice") => assert!(!carries_user),
            Some(_) => assert_eq!(request.query_value("user"), Some("tom")),
            None => panic!("request without cmd: {}", request.target()),
        }
    }
}

#[tokio::test]
async fn merge_failure_stops_before_wait() {
    let (backend, orchestrator) = setup();
    backend.stub(
        Method::Post,
        PACKAGE_PATH,
        Some("mergeservice"),
        BackendResponse::new(400, "<status code=\"400\"><summary>merge failed</summary></status>"),
    );

    let err = orchestrator
        .execute("home:tom", "test_package", "tom", &kiwi_import())
        .await
        .unwrap_err();

    assert_eq!(err.stage, ServiceStage::Merge);
    assert_eq!(err.reason, FailureReason::BackendStatus(400));
    assert_eq!(err.backend_status, Some(400));
    assert!(err.body_text().contains("merge failed"));
    assert_eq!(backend.commands(), vec!["runservice", "mergeservice"]);
}

#[tokio::test]
async fn merge_rejecting_non_archive_output_is_distinct() {
    let (backend, orchestrator) = setup();
    backend.stub(
        Method::Post,
        PACKAGE_PATH,
        Some("mergeservice"),
        BackendResponse::new(400, "service output is not a tar archive"),
    );

    let err = orchestrator
        .execute("home:tom", "test_package", "tom", &kiwi_import())
        .await
        .unwrap_err();

    assert_eq!(err.stage, ServiceStage::Merge);
    assert_eq!(err.reason, FailureReason::NonArchivePayload);
    assert!(backend.requests_for("waitservice").is_empty());
}

#[tokio::test]
async fn run_failure_stops_everything() {
    let (backend, orchestrator) = setup();
    backend.stub(
        Method::Post,
        PACKAGE_PATH,
        Some("runservice"),
        BackendResponse::new(403, "no permission"),
    );

    let err = orchestrator
        .execute("home:tom", "test_package", "tom", &kiwi_import())
        .await
        .unwrap_err();

    assert_eq!(err.stage, ServiceStage::Run);
    assert_eq!(err.reason, FailureReason::BackendStatus(403));
    assert_eq!(backend.commands(), vec!["runservice"]);
}

#[tokio::test(start_paused = true)]
async fn wait_is_bounded_by_the_timeout() {
    let backend = Arc::new(RecordingBackend::new());
    backend.stub_delayed(
        Method::Post,
        PACKAGE_PATH,
        Some("waitservice"),
        Duration::from_secs(3600),
        BackendResponse::ok(""),
    );
    let orchestrator = ServiceOrchestrator::new(backend.clone(), Duration::from_secs(5));

    let err = orchestrator
        .execute("home:tom", "test_package", "tom", &kiwi_import())
        .await
        .unwrap_err();

    assert_eq!(err.stage, ServiceStage::Wait);
    assert_eq!(err.reason, FailureReason::Timeout(Duration::from_secs(5)));
    assert_eq!(err.backend_status, None);
}

#[tokio::test]
async fn client_timeout_on_wait_is_reported_as_timeout() {
    let (backend, orchestrator) = setup();
    backend.fail(
        Method::Post,
        PACKAGE_PATH,
        Some("waitservice"),
        BackendError::Timeout("operation timed out".into()),
    );

    let err = orchestrator
        .execute("home:tom", "test_package", "tom", &kiwi_import())
        .await
        .unwrap_err();

    assert_eq!(err.stage, ServiceStage::Wait);
    assert!(err.is_timeout());
}

#[tokio::test]
async fn add_kiwi_import_appends_to_existing_services() {
    let (backend, orchestrator) = setup();
    backend.stub(
        Method::Get,
        "/source/home:tom/test_package/_service",
        None,
        BackendResponse::ok(
            r#"<services><service name="download_files" mode="buildtime"/></services>"#,
        ),
    );

    orchestrator
        .add_kiwi_import("home:tom", "test_package", "tom")
        .await
        .unwrap();

    let run = &backend.requests_for("runservice")[0];
    let body = String::from_utf8(run.body.clone().unwrap()).unwrap();
    let sent = ServiceDocument::from_xml(&body).unwrap();
    let names: Vec<&str> = sent.services().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["download_files", "kiwi_import"]);
    assert_eq!(backend.commands(), vec!["runservice", "mergeservice", "waitservice"]);
}

#[tokio::test]
async fn add_kiwi_import_keeps_repeated_parameters() {
    let (backend, orchestrator) = setup();
    backend.stub(
        Method::Get,
        "/source/home:tom/test_package/_service",
        None,
        BackendResponse::ok(
            r#"<services><service name="tar_scm"><param name="url">u</param><param name="exclude">a</param><param name="exclude">b</param></service></services>"#,
        ),
    );

    orchestrator
        .add_kiwi_import("home:tom", "test_package", "tom")
        .await
        .unwrap();

    let run = &backend.requests_for("runservice")[0];
    let body = String::from_utf8(run.body.clone().unwrap()).unwrap();
    let sent = ServiceDocument::from_xml(&body).unwrap();
    let scm = sent.find("tar_scm").unwrap();
    assert_eq!(
        scm.parameters,
        vec![
            ("url".to_string(), "u".to_string()),
            ("exclude".to_string(), "a".to_string()),
            ("exclude".to_string(), "b".to_string()),
        ]
    );
    assert!(sent.find("kiwi_import").is_some());
}

#[tokio::test]
async fn add_kiwi_import_without_service_file() {
    let (backend, orchestrator) = setup();
    backend.stub(
        Method::Get,
        "/source/home:tom/test_package/_service",
        None,
        BackendResponse::new(404, "_service: no such file"),
    );

    let outcome = orchestrator
        .add_kiwi_import("home:tom", "test_package", "tom")
        .await
        .unwrap();

    assert_eq!(
        outcome.stages(),
        vec![ServiceStage::Run, ServiceStage::Merge, ServiceStage::Wait]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_executions_run_on_spawned_tasks() {
    let (backend, orchestrator) = setup();

    let handles: Vec<_> = ["alpha", "beta", "gamma"]
        .into_iter()
        .map(|package| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .execute("home:tom", package, "tom", &kiwi_import())
                    .await
            })
        })
        .collect();

    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(
            outcome.stages(),
            vec![ServiceStage::Run, ServiceStage::Merge, ServiceStage::Wait]
        );
    }
    assert_eq!(backend.requests().len(), 9);
    assert_eq!(backend.requests_for("waitservice").len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn kiwi_import_can_be_spawned() {
    let (backend, orchestrator) = setup();
    let outcome = tokio::spawn(async move {
        orchestrator
            .add_kiwi_import("home:tom", "test_package", "tom")
            .await
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(outcome.results.len(), 3);
    assert_eq!(backend.requests_for("runservice").len(), 1);
}
