//! End-to-end scenarios exercising the Saver/Restorer against a mocked cache service,
//! matching the six walkthroughs in the specification's testable-properties section.

use std::fs;

use build_cache::archive::{Archiver, TarZstdArchiver};
use build_cache::config::{Backend, Config};
use build_cache::kv::{Kv, MapKv};
use build_cache::multipart::{PrepareRequest, ServiceClient};
use build_cache::paths::GlobPathResolver;
use build_cache::restore::{RestoreOutcome, RestoreRequest, Restorer};
use build_cache::save::{SaveOutcome, SaveRequest, Saver};
use build_cache::skip::SkipReason;
use build_cache::tracker::NoopTracker;
use build_cache::transport::TransportConfig;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn service_config(base_url: &str) -> Config {
    Config {
        backend: Backend::Service { base_url: base_url.to_string(), access_token: "test-token".to_string() },
        compression_level: 3,
        max_concurrency: Some(1),
    }
}

fn saver(config: Config, kv: MapKv) -> Saver<GlobPathResolver, TarZstdArchiver, NoopTracker, MapKv> {
    let archiver = TarZstdArchiver::new(config.compression_level);
    Saver::new(config, GlobPathResolver, archiver, NoopTracker, kv)
}

#[tokio::test]
async fn static_key_no_prior_restore_uploads() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    fs::write(&file, b"0123456789").unwrap();

    let mut server = mockito::Server::new_async().await;

    let prepare = server
        .mock("POST", "/multipart-upload")
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "upload-1",
                "chunk_size_bytes": 8 * 1024 * 1024,
                "chunk_count": 1,
                "last_chunk_size_bytes": 0,
                "urls": [{"method": "PUT", "url": format!("{}/chunk/0", server.url()), "headers": {}}],
            })
            .to_string(),
        )
        .create_async()
        .await;

    let chunk = server
        .mock("PUT", "/chunk/0")
        .with_status(200)
        .with_header("ETag", "\"etag-0\"")
        .create_async()
        .await;

    let ack = server
        .mock("PATCH", "/multipart-upload/upload-1/acknowledge")
        .match_body(mockito::Matcher::PartialJson(json!({"successful": true})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"message": "ok", "severity": "info"}).to_string())
        .create_async()
        .await;

    let config = service_config(&server.url());
    let saver = saver(config, MapKv::new());

    let request = SaveRequest {
        key_template: "my-static".to_string(),
        paths: vec![file.to_str().unwrap().to_string()],
        only_check_key: false,
    };

    let outcome = saver.save(&request, reqwest::Client::new(), CancellationToken::new(), &mut ()).await.unwrap();

    match outcome {
        SaveOutcome::Uploaded { key, .. } => assert_eq!(key.as_str(), "my-static"),
        other => panic!("expected Uploaded, got {other:?}"),
    }

    prepare.assert_async().await;
    chunk.assert_async().await;
    ack.assert_async().await;
}

#[tokio::test]
async fn multi_chunk_upload_uses_server_authoritative_chunking() {
    // The archive is 20 bytes; a locally-derived plan (min chunk size 8 MiB) would
    // pick chunk_count=1, but the server's prepare response authoritatively says
    // chunk_size_bytes=10, chunk_count=2. The provider built for the upload must
    // follow the server, matching the two URLs it handed back, or this panics
    // indexing `urls[1]` / deadlocks on a chunk-count mismatch.
    let dir = tempfile::tempdir().unwrap();
    let archive_path = dir.path().join("archive.tzst");
    fs::write(&archive_path, b"01234567890123456789").unwrap();

    let mut server = mockito::Server::new_async().await;

    let prepare = server
        .mock("POST", "/multipart-upload")
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "upload-multi",
                "chunk_size_bytes": 10,
                "chunk_count": 2,
                "last_chunk_size_bytes": 10,
                "urls": [
                    {"method": "PUT", "url": format!("{}/chunk/0", server.url()), "headers": {}},
                    {"method": "PUT", "url": format!("{}/chunk/1", server.url()), "headers": {}},
                ],
            })
            .to_string(),
        )
        .create_async()
        .await;

    let chunk0 = server.mock("PUT", "/chunk/0").with_status(200).with_header("ETag", "\"etag-0\"").create_async().await;
    let chunk1 = server.mock("PUT", "/chunk/1").with_status(200).with_header("ETag", "\"etag-1\"").create_async().await;

    let ack = server
        .mock("PATCH", "/multipart-upload/upload-multi/acknowledge")
        .match_body(mockito::Matcher::PartialJson(json!({"successful": true})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"message": "ok", "severity": "info"}).to_string())
        .create_async()
        .await;

    let http = reqwest::Client::new();
    let client = ServiceClient::new(http.clone(), server.url(), "test-token".to_string());
    let prepare_req = PrepareRequest {
        cache_key: "multi".to_string(),
        archive_filename: "archive.tzst".to_string(),
        archive_content_type: "application/zstd".to_string(),
        archive_size_in_bytes: 20,
        chunk_size_mb: None,
    };
    let transport_config =
        TransportConfig { concurrency: 2, max_retry_per_chunk: 3, hung_threshold: std::time::Duration::from_secs(30), http_client: http };

    client.upload(prepare_req, &archive_path, &transport_config, CancellationToken::new(), &mut ()).await.unwrap();

    prepare.assert_async().await;
    chunk0.assert_async().await;
    chunk1.assert_async().await;
    ack.assert_async().await;
}

#[tokio::test]
async fn dynamic_key_prior_exact_hit_skips_without_any_request() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    fs::write(&file, b"0123456789").unwrap();

    // No mock server/mocks set up at all: any attempted request would fail to
    // connect, which is itself evidence the skip happened before network I/O.
    let config = service_config("http://127.0.0.1:1");
    let kv = MapKv::new()
        .with("BITRISE_GIT_COMMIT", "abc")
        .with("BITRISE_CACHE_HIT__my-key-abc", "deadbeef");
    let saver = saver(config, kv);

    let request = SaveRequest {
        key_template: "my-key-{{.CommitHash}}".to_string(),
        paths: vec![file.to_str().unwrap().to_string()],
        only_check_key: true,
    };

    let outcome = saver.save(&request, reqwest::Client::new(), CancellationToken::new(), &mut ()).await.unwrap();

    match outcome {
        SaveOutcome::Skipped { key, reason } => {
            assert_eq!(key.as_str(), "my-key-abc");
            assert_eq!(reason, SkipReason::RestoreSameUniqueKey);
        }
        other => panic!("expected Skipped, got {other:?}"),
    }
}

#[tokio::test]
async fn cache_miss_on_restore_reports_false_without_error() {
    let mut server = mockito::Server::new_async().await;
    let restore_mock = server
        .mock("GET", "/restore")
        .match_query(mockito::Matcher::Any)
        .with_status(404)
        .create_async()
        .await;

    let config = service_config(&server.url());
    let archiver = TarZstdArchiver::new(3);
    let mut restorer = Restorer::new(config, archiver, MapKv::new());

    let extract_to = tempfile::tempdir().unwrap();
    let request = RestoreRequest {
        candidate_keys: vec!["x".to_string(), "y".to_string(), "z".to_string()],
        extract_to: extract_to.path().to_path_buf(),
    };

    let outcome = restorer.restore(&request, reqwest::Client::new(), CancellationToken::new(), &mut ()).await.unwrap();

    assert!(matches!(outcome, RestoreOutcome::Miss));
    restore_mock.assert_async().await;
    assert_eq!(restorer.kv.get("BITRISE_CACHE_HIT").as_deref(), Some("false"));
}

#[tokio::test]
async fn partial_hit_restores_and_reports_partial() {
    let dir = tempfile::tempdir().unwrap();
    let src_file = dir.path().join("a.txt");
    fs::write(&src_file, b"archived content").unwrap();
    let archive_path = dir.path().join("archive.tzst");
    TarZstdArchiver::new(3).archive(&[src_file.clone()], &archive_path).unwrap();
    let archive_bytes = fs::read(&archive_path).unwrap();

    let mut server = mockito::Server::new_async().await;

    let restore_mock = server
        .mock("GET", "/restore")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "url": format!("{}/download/archive.tzst", server.url()),
                "matched_cache_key": "fallback",
            })
            .to_string(),
        )
        .create_async()
        .await;

    let download_mock = server
        .mock("GET", "/download/archive.tzst")
        .with_status(200)
        .with_header("content-length", &archive_bytes.len().to_string())
        .with_body(archive_bytes)
        .create_async()
        .await;

    let config = service_config(&server.url());
    let archiver = TarZstdArchiver::new(3);
    let mut restorer = Restorer::new(config, archiver, MapKv::new());

    let extract_to = tempfile::tempdir().unwrap();
    let request = RestoreRequest {
        candidate_keys: vec!["primary-abc".to_string(), "fallback".to_string()],
        extract_to: extract_to.path().to_path_buf(),
    };

    let outcome = restorer.restore(&request, reqwest::Client::new(), CancellationToken::new(), &mut ()).await.unwrap();

    match outcome {
        RestoreOutcome::Hit { matched_key, exact, .. } => {
            assert_eq!(matched_key.as_str(), "fallback");
            assert!(!exact);
        }
        other => panic!("expected Hit, got {other:?}"),
    }

    assert_eq!(fs::read(extract_to.path().join("a.txt")).unwrap(), b"archived content");

    restore_mock.assert_async().await;
    download_mock.assert_async().await;
}
