use super::*;
use crate::client::StaticCredential;
use crate::config::{ApiConfig, FileCollisionAction, RetryConfig};
use crate::types::{Artifact, JobKind, JobState};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(server: &MockServer) -> Config {
    Config {
        api: ApiConfig {
            base_url: server.uri(),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        },
        download: DownloadConfig {
            inter_download_delay: Duration::ZERO,
            retry: RetryConfig {
                max_attempts: 2,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                backoff_multiplier: 2.0,
                jitter: false,
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

fn materializer(config: &Config) -> Materializer {
    Materializer::new(
        config,
        Arc::new(StaticCredential(Credential::bearer("tok"))),
    )
    .unwrap()
}

fn finished(id: &str, kind: JobKind, artifacts: Vec<Artifact>) -> Job {
    let mut job = Job::new(id, kind);
    job.state = JobState::Completed;
    job.artifacts = artifacts;
    job
}

#[tokio::test]
async fn unfinished_job_is_not_ready() {
    let server = MockServer::start().await;
    let m = materializer(&test_config(&server));

    for state in [JobState::Queued, JobState::Processing, JobState::Failed, JobState::Expired] {
        let mut job = Job::new("t", JobKind::SingleTask);
        job.state = state;
        let err = m.download(&job, ArtifactSelector::Index(0)).await.unwrap_err();
        assert!(matches!(err, Error::NotReady { .. }), "{state}");

        let all = m.download_all(&job).await;
        assert_eq!(all.len(), 1);
        assert!(matches!(all[0], Err(Error::NotReady { .. })));
    }
}

#[tokio::test]
async fn index_out_of_range_is_not_found() {
    let server = MockServer::start().await;
    let m = materializer(&test_config(&server));
    let job = finished("t", JobKind::SingleTask, vec![Artifact::from_url("/files/a.png")]);

    let err = m.download(&job, ArtifactSelector::Index(1)).await.unwrap_err();
    assert!(matches!(err, Error::ArtifactNotFound { .. }));
}

#[tokio::test]
async fn payment_orders_have_no_archive() {
    let server = MockServer::start().await;
    let m = materializer(&test_config(&server));
    let job = finished("o-1", JobKind::PaymentOrder, vec![]);

    assert!(!m.supports_archive(&job));
    let err = m.download(&job, ArtifactSelector::Archive).await.unwrap_err();
    assert!(matches!(err, Error::ArtifactNotFound { .. }));
    assert!(m.download_all(&job).await.is_empty());
}

#[tokio::test]
async fn archive_uses_content_disposition_filename() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/batch/b-1/download"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-disposition", r#"attachment; filename="batch-b-1.zip""#)
                .insert_header("content-type", "application/zip")
                .set_body_bytes(b"PK\x03\x04zip".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let m = materializer(&test_config(&server));
    let mut job = finished("b-1", JobKind::BatchTask, vec![]);
    job.state = JobState::PartiallyCompleted;

    let file = m.download(&job, ArtifactSelector::Archive).await.unwrap();
    assert_eq!(file.filename, "batch-b-1.zip");
    assert_eq!(file.content_type.as_deref(), Some("application/zip"));
    assert_eq!(file.bytes, b"PK\x03\x04zip");
}

#[tokio::test]
async fn archive_without_header_is_named_after_job() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/processing/result/task-9/download"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]))
        .mount(&server)
        .await;

    let m = materializer(&test_config(&server));
    let job = finished("task-9", JobKind::SingleTask, vec![]);

    let files = m.download_all(&job).await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].as_ref().unwrap().filename, "task-9.zip");
}

#[tokio::test]
async fn artifact_filenames_are_synthesized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4]))
        .mount(&server)
        .await;

    let m = materializer(&test_config(&server));
    let declared = Artifact {
        filename: Some("portrait.jpg".into()),
        ..Artifact::from_url("/files/x")
    };
    let job = finished(
        "task-1",
        JobKind::SingleTask,
        vec![
            Artifact::from_url(format!("{}/files/out.webp", server.uri())),
            Artifact::from_url("/files/blob"),
            declared,
        ],
    );

    let names: Vec<String> = futures::future::join_all(
        (0..3).map(|i| m.download(&job, ArtifactSelector::Index(i))),
    )
    .await
    .into_iter()
    .map(|r| r.unwrap().filename)
    .collect();

    assert_eq!(names, vec!["task-1_1.webp", "task-1_2.png", "portrait.jpg"]);
}

#[tokio::test]
async fn one_failed_artifact_does_not_abort_the_rest() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"img".to_vec()))
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.download.archive_kinds.clear();
    config.download.inter_download_delay = Duration::from_millis(60);
    let m = materializer(&config);
    let job = finished(
        "b-2",
        JobKind::BatchTask,
        vec![
            Artifact::from_url("/files/a.png"),
            Artifact::from_url("/files/missing.png"),
            Artifact::from_url("/files/c.png"),
        ],
    );

    let started = Instant::now();
    let results = m.download_all(&job).await;
    assert!(started.elapsed() >= Duration::from_millis(120));

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(
        results[1],
        Err(Error::DownloadFailed { status: 404, .. })
    ));
    assert_eq!(results[2].as_ref().unwrap().filename, "b-2_3.png");
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let m = materializer(&test_config(&server));
    let job = finished("t", JobKind::SingleTask, vec![Artifact::from_url("/f/a.png")]);

    let file = m.download(&job, ArtifactSelector::Index(0)).await.unwrap();
    assert_eq!(file.bytes, b"ok");
}

#[tokio::test]
async fn rejected_credential_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let m = materializer(&test_config(&server));
    let job = finished("t", JobKind::BatchTask, vec![]);

    let err = m.download(&job, ArtifactSelector::Archive).await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
}

#[tokio::test]
async fn credential_is_not_sent_to_other_origins() {
    let backend = MockServer::start().await;
    let cdn = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&cdn)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"cdn".to_vec()))
        .mount(&cdn)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"own".to_vec()))
        .expect(1)
        .mount(&backend)
        .await;

    let m = materializer(&test_config(&backend));
    let job = finished(
        "t",
        JobKind::SingleTask,
        vec![
            Artifact::from_url(format!("{}/out/a.png", cdn.uri())),
            Artifact::from_url("/out/b.png"),
        ],
    );

    let from_cdn = m.download(&job, ArtifactSelector::Index(0)).await.unwrap();
    let from_backend = m.download(&job, ArtifactSelector::Index(1)).await.unwrap();
    assert_eq!(from_cdn.bytes, b"cdn");
    assert_eq!(from_backend.bytes, b"own");
}

#[tokio::test]
async fn save_handles_collisions() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("results");
    let file = DownloadedFile {
        filename: "task-1_1.png".into(),
        content_type: None,
        bytes: b"first".to_vec(),
    };

    let mut config = test_config(&server);
    let renaming = materializer(&config);
    let first = renaming.save(&file, &dir).await.unwrap();
    let second = renaming.save(&file, &dir).await.unwrap();
    assert_eq!(first, dir.join("task-1_1.png"));
    assert_eq!(second, dir.join("task-1_1 (1).png"));

    config.download.file_collision = FileCollisionAction::Skip;
    let skipping = materializer(&config);
    let err = skipping.save(&file, &dir).await.unwrap_err();
    assert!(matches!(err, Error::FileCollision(_)));

    config.download.file_collision = FileCollisionAction::Overwrite;
    let overwriting = materializer(&config);
    let replaced = DownloadedFile {
        bytes: b"second".to_vec(),
        ..file
    };
    let path = overwriting.save(&replaced, &dir).await.unwrap();
    assert_eq!(path, first);
    assert_eq!(std::fs::read(&first).unwrap(), b"second");
}

#[tokio::test]
async fn save_all_writes_every_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"img".to_vec()))
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.download.archive_kinds.clear();
    let m = materializer(&config);
    let temp_dir = TempDir::new().unwrap();
    let job = finished(
        "task-7",
        JobKind::SingleTask,
        vec![
            Artifact::from_url("/files/a.png"),
            Artifact::from_url("/files/b.jpg"),
        ],
    );

    let saved: Vec<PathBuf> = m
        .save_all(&job, temp_dir.path())
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(
        saved,
        vec![
            temp_dir.path().join("task-7_1.png"),
            temp_dir.path().join("task-7_2.jpg"),
        ]
    );
    for path in saved {
        assert_eq!(std::fs::read(path).unwrap(), b"img");
    }
}
