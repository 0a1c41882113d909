//! End-to-end tests against a mock docling-serve.
//!
//! The HTTP side is served by httpmock; the container engine is a recording
//! double or a shell script standing in for docker, so no real engine is
//! needed.

use async_trait::async_trait;
use futures::FutureExt;
use httpmock::prelude::*;
use mdify::{
    convert_batch, CliEngine, ContainerEngine, ConversionClient, ConversionOptions,
    ConversionRequest, FileJob, MdifyError, RunSpec, ServiceConfig, ServiceManager, ServiceState,
};
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── Helpers ──────────────────────────────────────────────────────────────

/// Engine double: every call is recorded, nothing is launched.
#[derive(Default)]
struct RecordingEngine {
    calls: Mutex<Vec<String>>,
}

impl RecordingEngine {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn stops(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("stop ")).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerEngine for RecordingEngine {
    fn name(&self) -> &str {
        "recording"
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, MdifyError> {
        self.record(format!("ps {prefix}"));
        Ok(Vec::new())
    }

    async fn stop(&self, name: &str) -> Result<(), MdifyError> {
        self.record(format!("stop {name}"));
        Ok(())
    }

    async fn run_detached(&self, spec: &RunSpec) -> Result<String, MdifyError> {
        self.record(format!("run {} {}:{}", spec.name, spec.host_port, spec.container_port));
        Ok("deadbeefcafe".to_string())
    }

    async fn image_exists(&self, _image: &str) -> bool {
        true
    }

    async fn pull(&self, image: &str) -> Result<(), MdifyError> {
        self.record(format!("pull {image}"));
        Ok(())
    }
}

/// Library logs go to the test harness; `RUST_LOG=mdify=debug` shows them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config_for(server: &MockServer, poll_ms: u64) -> ServiceConfig {
    ServiceConfig::builder()
        .host(server.host())
        .port(server.port())
        .health_poll_interval_ms(poll_ms)
        .build()
        .unwrap()
}

fn write_input(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"%PDF-1.4 test").unwrap();
    path
}

fn base_url(server: &MockServer) -> String {
    format!("http://{}:{}", server.host(), server.port())
}

/// A port nothing listens on.
fn dead_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

// ── Lifecycle ────────────────────────────────────────────────────────────

#[tokio::test]
async fn unhealthy_service_times_out_within_one_interval() {
    init_tracing();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(503);
        })
        .await;

    let interval = Duration::from_millis(500);
    let engine = Arc::new(RecordingEngine::default());
    let mut manager = ServiceManager::new(engine.clone(), config_for(&server, 500)).unwrap();

    let timeout = Duration::from_secs(1);
    let started = Instant::now();
    let err = manager.start_with_timeout(timeout).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, MdifyError::HealthTimeout { .. }), "got: {err:?}");
    assert!(elapsed >= timeout, "returned early: {elapsed:?}");
    assert!(elapsed < timeout + interval, "overran one interval: {elapsed:?}");
    assert_eq!(manager.state(), ServiceState::Error);

    manager.stop().await;
    assert_eq!(engine.stops(), 1);
}

#[tokio::test]
async fn stop_is_safe_any_number_of_times() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(200).json_body(json!({"status": "ok"}));
        })
        .await;

    // Never started.
    let engine = Arc::new(RecordingEngine::default());
    let mut idle = ServiceManager::new(engine.clone(), config_for(&server, 20)).unwrap();
    idle.stop().await;
    assert_eq!(engine.stops(), 0);

    // Started, stopped once, then again and again.
    let mut manager = ServiceManager::new(engine.clone(), config_for(&server, 20)).unwrap();
    manager.start().await.unwrap();
    assert_eq!(manager.state(), ServiceState::Healthy);
    assert!(manager.is_ready().await);
    for _ in 0..3 {
        manager.stop().await;
    }
    assert_eq!(manager.state(), ServiceState::Stopped);
    assert_eq!(engine.stops(), 1);

    let run = engine
        .calls()
        .into_iter()
        .find(|c| c.starts_with("run "))
        .unwrap();
    assert!(run.ends_with(&format!("{}:5001", server.port())), "got: {run}");
}

#[tokio::test]
async fn dropping_a_running_manager_does_not_panic() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(200);
        })
        .await;

    let engine = Arc::new(RecordingEngine::default());
    let mut manager = ServiceManager::new(engine.clone(), config_for(&server, 20)).unwrap();
    manager.start().await.unwrap();
    drop(manager);
    // The double's stop_detached is the default no-op; nothing awaited.
    assert_eq!(engine.stops(), 0);
}

// ── Response shapes ──────────────────────────────────────────────────────

#[tokio::test]
async fn every_known_response_shape_is_extracted() {
    let cases = [
        (json!({"document": {"md_content": "# A"}}), "# A"),
        (json!({"document": {"content": "B"}}), "B"),
        (json!({"content": "C"}), "C"),
        (json!([{"document": {"md_content": "D"}}]), "D"),
        (json!([{"content": "E"}]), "E"),
        (json!({"document": {"md_content": "", "content": "F"}}), "F"),
    ];

    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "doc.pdf");
    let client = ConversionClient::new().unwrap();

    for (body, expected) in cases {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/convert/file");
                then.status(200).json_body(body.clone());
            })
            .await;

        let result = client
            .convert_file(&base_url(&server), &ConversionRequest::new(&input))
            .await
            .unwrap();
        assert!(result.success, "{body}: {:?}", result.error);
        assert_eq!(result.content, expected, "body: {body}");
        assert_eq!(result.format, "md");
        mock.assert_async().await;
    }
}

#[tokio::test]
async fn empty_object_is_an_empty_success() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/convert/file");
            then.status(200).json_body(json!({"document": {}}));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "blank.pdf");
    let result = ConversionClient::new()
        .unwrap()
        .convert_file(&base_url(&server), &ConversionRequest::new(&input))
        .await
        .unwrap();
    assert!(result.success);
    assert!(result.content.is_empty());
}

#[tokio::test]
async fn scalar_body_is_malformed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/convert/file");
            then.status(200).json_body(json!("just a string"));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "doc.pdf");
    let err = ConversionClient::new()
        .unwrap()
        .convert_file(&base_url(&server), &ConversionRequest::new(&input))
        .await
        .unwrap_err();
    assert!(matches!(err, MdifyError::MalformedResponse { .. }), "got: {err:?}");
}

// ── Failures ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn server_error_carries_status_and_body() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/convert/file");
            then.status(500).body("boom");
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "doc.pdf");
    let err = ConversionClient::new()
        .unwrap()
        .convert_file(&base_url(&server), &ConversionRequest::new(&input))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(500));
    match err {
        MdifyError::Http { status, body } => {
            assert_eq!(status, 500);
            assert!(body.contains("boom"));
        }
        other => panic!("expected Http, got {other:?}"),
    }
}

#[tokio::test]
async fn connection_refused_is_a_failed_result() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "doc.pdf");
    let url = format!("http://127.0.0.1:{}", dead_port());

    let result = ConversionClient::new()
        .unwrap()
        .convert_file(&url, &ConversionRequest::new(&input))
        .await
        .unwrap();
    assert!(!result.success);
    assert!(!result.error.unwrap_or_default().is_empty());
    assert!(result.content.is_empty());
}

#[tokio::test]
async fn health_is_false_on_refused_connection() {
    let url = format!("http://127.0.0.1:{}", dead_port());
    assert!(!ConversionClient::new().unwrap().check_health(&url).await);
}

// ── Async task API ───────────────────────────────────────────────────────

#[tokio::test]
async fn submit_without_task_id_is_malformed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/convert/file/async");
            then.status(200).json_body(json!({"status": "pending"}));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "doc.pdf");
    let err = ConversionClient::new()
        .unwrap()
        .submit_async(&base_url(&server), &ConversionRequest::new(&input))
        .await
        .unwrap_err();
    assert!(matches!(err, MdifyError::MalformedResponse { .. }), "got: {err:?}");
}

#[tokio::test]
async fn task_round_trip_returns_result_content() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/convert/file/async");
            then.status(200).json_body(json!({"task_id": "abc"}));
        })
        .await;
    let poll = server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/status/poll/abc");
            then.status(200).json_body(json!({"status": "completed"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/result/abc");
            then.status(200).json_body(json!({"content": "done"}));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "doc.pdf");
    let client = ConversionClient::new().unwrap();
    let url = base_url(&server);

    let handle = client
        .submit_async(&url, &ConversionRequest::new(&input))
        .await
        .unwrap();
    assert_eq!(handle.task_id, "abc");
    assert_eq!(client.poll_status(&url, "abc").await.unwrap().status, mdify::TaskStatus::Completed);
    let result = client.fetch_result(&url, "abc").await.unwrap();
    assert_eq!(result.content, "done");
    assert_eq!(result.format, "md");

    let via_task = client
        .convert_via_task(
            &url,
            &ConversionRequest::new(&input),
            Duration::from_millis(10),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(via_task.content, "done");
    assert_eq!(poll.hits_async().await, 2);
}

#[tokio::test]
async fn failed_task_surfaces_its_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/convert/file/async");
            then.status(200).json_body(json!({"task_id": "t1"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/status/poll/t1");
            then.status(200)
                .json_body(json!({"task_status": "failure", "error": "corrupt pdf"}));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "doc.pdf");
    let err = ConversionClient::new()
        .unwrap()
        .convert_via_task(
            &base_url(&server),
            &ConversionRequest::new(&input),
            Duration::from_millis(10),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
    match err {
        MdifyError::TaskFailed { task_id, detail } => {
            assert_eq!(task_id, "t1");
            assert_eq!(detail, "corrupt pdf");
        }
        other => panic!("expected TaskFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn task_that_never_settles_times_out() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/convert/file/async");
            then.status(200).json_body(json!({"task_id": "slow"}));
        })
        .await;
    let poll = server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/status/poll/slow");
            then.status(200).json_body(json!({"status": "started"}));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "doc.pdf");
    let err = ConversionClient::new()
        .unwrap()
        .convert_via_task(
            &base_url(&server),
            &ConversionRequest::new(&input),
            Duration::from_millis(20),
            Duration::from_millis(150),
        )
        .await
        .unwrap_err();
    match err {
        MdifyError::TaskTimeout { task_id, .. } => assert_eq!(task_id, "slow"),
        other => panic!("expected TaskTimeout, got {other:?}"),
    }
    assert!(poll.hits_async().await >= 2);
}

// ── Full run ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn scoped_batch_converts_reports_and_stops_once() {
    let server = MockServer::start_async().await;
    let mut unhealthy = server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(503);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/convert/file")
                .body_excludes("bad.pdf");
            then.status(200)
                .json_body(json!({"document": {"md_content": "# Converted"}}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/convert/file")
                .body_includes("bad.pdf");
            then.status(500).body("boom");
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out_dir = dir.path().join("out");
    let jobs: Vec<FileJob> = ["one.pdf", "bad.pdf", "three.docx"]
        .into_iter()
        .map(|name| FileJob::into_dir(write_input(dir.path(), name), &out_dir))
        .collect();

    let interval = Duration::from_millis(100);
    let engine = Arc::new(RecordingEngine::default());
    let mut manager = ServiceManager::new(engine.clone(), config_for(&server, 100)).unwrap();
    let client = ConversionClient::new().unwrap();
    let options = ConversionOptions::default();

    let flip = async {
        tokio::time::sleep(interval * 5 / 2).await;
        unhealthy.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/health");
                then.status(200);
            })
            .await
    };

    let (client_ref, jobs_ref, options_ref) = (&client, &jobs, &options);
    let (summary, healthy) = tokio::join!(
        manager.run_scoped(std::future::pending::<()>(), |url| async move {
            convert_batch(client_ref, &url, jobs_ref, options_ref).await
        }),
        flip
    );
    let summary = summary.unwrap();

    assert!(healthy.hits_async().await >= 1);
    assert_eq!(summary.total(), 3);
    assert_eq!(summary.succeeded(), 2);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.exit_code(), 1);

    let failed = summary.reports[1].result.as_ref().unwrap();
    assert!(failed.error.as_deref().unwrap_or_default().contains("boom"));
    assert!(!jobs[1].output.exists());

    for i in [0, 2] {
        assert_eq!(
            std::fs::read_to_string(&jobs[i].output).unwrap(),
            "# Converted"
        );
    }
    assert!(out_dir.join("three.md").exists());

    assert_eq!(manager.state(), ServiceState::Stopped);
    assert_eq!(engine.stops(), 1);
}

#[tokio::test]
async fn second_run_skips_existing_outputs_unless_overwrite() {
    let server = MockServer::start_async().await;
    let convert = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/convert/file");
            then.status(200).json_body(json!({"content": "fresh"}));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let jobs = vec![FileJob::into_dir(write_input(dir.path(), "a.pdf"), dir.path())];
    std::fs::write(&jobs[0].output, "stale").unwrap();

    let client = ConversionClient::new().unwrap();
    let url = base_url(&server);

    let summary = convert_batch(&client, &url, &jobs, &ConversionOptions::default()).await;
    assert_eq!(summary.skipped(), 1);
    assert_eq!(convert.hits_async().await, 0);
    assert_eq!(std::fs::read_to_string(&jobs[0].output).unwrap(), "stale");

    let options = ConversionOptions {
        overwrite: true,
        ..ConversionOptions::default()
    };
    let summary = convert_batch(&client, &url, &jobs, &options).await;
    assert_eq!(summary.succeeded(), 1);
    assert_eq!(convert.hits_async().await, 1);
    assert_eq!(std::fs::read_to_string(&jobs[0].output).unwrap(), "fresh");
}

#[tokio::test]
async fn interrupt_during_batch_stops_once_and_keeps_finished_files() {
    init_tracing();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(200);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/convert/file");
            then.status(200)
                .delay(Duration::from_millis(400))
                .json_body(json!({"content": "# Done"}));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let jobs: Vec<FileJob> = ["a.pdf", "b.pdf", "c.pdf"]
        .into_iter()
        .map(|name| FileJob::into_dir(write_input(dir.path(), name), dir.path()))
        .collect();

    let engine = Arc::new(RecordingEngine::default());
    let mut manager = ServiceManager::new(engine.clone(), config_for(&server, 20)).unwrap();
    let client = ConversionClient::new().unwrap();
    let options = ConversionOptions::default();
    let (client_ref, jobs_ref, options_ref) = (&client, &jobs, &options);

    let err = manager
        .run_scoped(tokio::time::sleep(Duration::from_millis(600)), |url| async move {
            convert_batch(client_ref, &url, jobs_ref, options_ref).await
        })
        .await
        .unwrap_err();

    assert!(matches!(err, MdifyError::Interrupted), "got: {err:?}");
    assert_eq!(manager.state(), ServiceState::Stopped);
    assert_eq!(engine.stops(), 1);
    assert_eq!(std::fs::read_to_string(&jobs[0].output).unwrap(), "# Done");
    assert!(!jobs[2].output.exists());
}

#[tokio::test]
async fn panic_in_work_stops_then_resumes() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(200);
        })
        .await;

    let engine = Arc::new(RecordingEngine::default());
    let mut manager = ServiceManager::new(engine.clone(), config_for(&server, 20)).unwrap();

    let outcome = AssertUnwindSafe(manager.run_scoped(std::future::pending::<()>(), |_| async {
        let explode = true;
        if explode {
            panic!("work exploded");
        }
        0
    }))
    .catch_unwind()
    .await;

    let panic = outcome.unwrap_err();
    assert_eq!(panic.downcast_ref::<&str>(), Some(&"work exploded"));
    assert_eq!(manager.state(), ServiceState::Stopped);
    assert_eq!(engine.stops(), 1);
}

/// A docker stand-in whose `run` takes a second and leaves a marker file
/// behind; `stop` removes it only if it exists.
#[cfg(unix)]
fn slow_engine_script(dir: &Path) -> (PathBuf, PathBuf) {
    use std::os::unix::fs::PermissionsExt;

    let marker = dir.join("running");
    let script = dir.join("fake-engine");
    let body = format!(
        "#!/bin/sh\n\
         case \"$1\" in\n\
         run) sleep 1; touch '{m}'; echo cafebabe ;;\n\
         stop) [ -e '{m}' ] || exit 1; rm -f '{m}' ;;\n\
         *) exit 0 ;;\n\
         esac\n",
        m = marker.display()
    );
    std::fs::write(&script, body).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    (script, marker)
}

#[cfg(unix)]
#[tokio::test]
async fn interrupt_during_engine_run_still_removes_instance() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (script, marker) = slow_engine_script(dir.path());

    let config = ServiceConfig::builder()
        .host("127.0.0.1")
        .port(dead_port())
        .health_poll_interval_ms(50)
        .build()
        .unwrap();
    let engine = Arc::new(CliEngine::new(script.display().to_string()));
    let mut manager = ServiceManager::new(engine, config).unwrap();

    let err = manager
        .run_scoped(tokio::time::sleep(Duration::from_millis(200)), |_| async { 0 })
        .await
        .unwrap_err();
    assert!(matches!(err, MdifyError::Interrupted), "got: {err:?}");
    assert_eq!(manager.state(), ServiceState::Stopped);

    // Give a leaked `run` time to finish before checking.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists(), "instance still running after teardown");
}
