use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use objdet_ingest::fetch::partial_path;
use objdet_ingest::ingestion::STAGE_NAME;
use objdet_ingest::{IngestError, RunLock};

use crate::helpers::{
    file_url, ingestion_config, list_files, settings, sha256_hex, stage, tar_gz_bytes,
    tar_zst_bytes, zip_bytes, ArchiveHost, SAMPLE_DATASET,
};

fn expected_files() -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = SAMPLE_DATASET.iter().map(|(n, _)| PathBuf::from(n)).collect();
    files.sort();
    files
}

// ── Happy path ──────────────────────────────────────────────────────

#[tokio::test]
async fn http_round_trip_produces_artifact() {
    let host = ArchiveHost::start(vec![("data.zip", zip_bytes(SAMPLE_DATASET))]).await;
    let tmp = tempfile::tempdir().unwrap();
    let s = settings(tmp.path(), &host.url("data.zip"));
    let config = ingestion_config(&s, "run-1");

    let artifact = stage(&s, config.clone())
        .initiate(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(artifact.feature_store_path, config.feature_store_dir);
    assert_eq!(artifact.downloaded_archive_path, Some(config.local_archive_path.clone()));
    assert_eq!(artifact.file_count, SAMPLE_DATASET.len());
    assert!(!artifact.fetch_skipped);
    assert!(!artifact.extract_skipped);
    assert_eq!(list_files(&config.feature_store_dir), expected_files());
    assert_eq!(
        std::fs::read(config.feature_store_dir.join("data.yaml")).unwrap(),
        b"nc: 2\nnames: ['head', 'helmet']\n"
    );
    assert!(config.local_archive_path.is_file());
    assert!(!config.download_dir.join(objdet_ingest::lock::LOCK_FILE_NAME).exists());
}

#[tokio::test]
async fn rerun_skips_fetch_and_extract() {
    let host = ArchiveHost::start(vec![("data.zip", zip_bytes(SAMPLE_DATASET))]).await;
    let tmp = tempfile::tempdir().unwrap();
    let s = settings(tmp.path(), &host.url("data.zip"));
    let config = ingestion_config(&s, "run-1");
    let cancel = CancellationToken::new();

    let first = stage(&s, config.clone()).initiate(&cancel).await.unwrap();
    let archive_before = std::fs::read(&config.local_archive_path).unwrap();
    let second = stage(&s, config.clone()).initiate(&cancel).await.unwrap();

    assert_eq!(host.hits(), 1);
    assert!(second.fetch_skipped);
    assert!(second.extract_skipped);
    assert_eq!(second.file_count, first.file_count);
    assert_eq!(second.feature_store_path, first.feature_store_path);
    assert_eq!(std::fs::read(&config.local_archive_path).unwrap(), archive_before);
}

#[tokio::test]
async fn populated_feature_store_needs_no_archive() {
    let host = ArchiveHost::start(vec![("data.zip", zip_bytes(SAMPLE_DATASET))]).await;
    let tmp = tempfile::tempdir().unwrap();
    let s = settings(tmp.path(), &host.url("data.zip"));
    let config = ingestion_config(&s, "run-1");
    let cancel = CancellationToken::new();

    stage(&s, config.clone()).initiate(&cancel).await.unwrap();
    std::fs::remove_file(&config.local_archive_path).unwrap();
    let resumed = stage(&s, config.clone()).initiate(&cancel).await.unwrap();

    assert_eq!(host.hits(), 1);
    assert!(resumed.fetch_skipped);
    assert!(resumed.extract_skipped);
    assert_eq!(resumed.downloaded_archive_path, None);
    assert_eq!(resumed.file_count, SAMPLE_DATASET.len());
    assert!(!config.local_archive_path.exists());
}

#[tokio::test]
async fn tar_gz_from_file_url() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source").join("dataset.tar.gz");
    std::fs::create_dir_all(source.parent().unwrap()).unwrap();
    std::fs::write(&source, tar_gz_bytes(SAMPLE_DATASET)).unwrap();

    let s = settings(&tmp.path().join("artifacts"), &file_url(&source));
    let config = ingestion_config(&s, "run-gz");
    assert!(config.local_archive_path.ends_with("dataset.tar.gz"));

    let artifact = stage(&s, config.clone())
        .initiate(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(artifact.file_count, SAMPLE_DATASET.len());
    assert_eq!(list_files(&config.feature_store_dir), expected_files());
}

#[tokio::test]
async fn tar_zst_from_file_url() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("dataset.tar.zst");
    std::fs::write(&source, tar_zst_bytes(SAMPLE_DATASET)).unwrap();

    let s = settings(&tmp.path().join("artifacts"), &file_url(&source));
    let config = ingestion_config(&s, "run-zst");

    let artifact = stage(&s, config.clone())
        .initiate(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(artifact.file_count, SAMPLE_DATASET.len());
    assert_eq!(
        std::fs::read(config.feature_store_dir.join("train/labels/img_001.txt")).unwrap(),
        b"0 0.51 0.42 0.10 0.12"
    );
}

// ── Failures ────────────────────────────────────────────────────────

#[tokio::test]
async fn unreachable_host_fails_the_stage() {
    let tmp = tempfile::tempdir().unwrap();
    let s = settings(tmp.path(), "http://127.0.0.1:1/data.zip");
    let config = ingestion_config(&s, "run-1");

    let err = stage(&s, config.clone())
        .initiate(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.stage, STAGE_NAME);
    assert_eq!(err.config, config);
    assert!(matches!(err.source, IngestError::Fetch { .. }), "{err}");
    assert!(!config.feature_store_dir.exists());
    assert!(!config.local_archive_path.exists());
}

#[tokio::test]
async fn missing_remote_file_fails_the_stage() {
    let host = ArchiveHost::start(vec![]).await;
    let tmp = tempfile::tempdir().unwrap();
    let s = settings(tmp.path(), &host.url("data.zip"));
    let config = ingestion_config(&s, "run-1");

    let err = stage(&s, config.clone())
        .initiate(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err.source, IngestError::Fetch { .. }), "{err}");
    assert!(!config.feature_store_dir.exists());
}

#[tokio::test]
async fn corrupt_archive_fails_the_stage() {
    let host = ArchiveHost::start(vec![("data.zip", b"<html>not a zip</html>".to_vec())]).await;
    let tmp = tempfile::tempdir().unwrap();
    let s = settings(tmp.path(), &host.url("data.zip"));
    let config = ingestion_config(&s, "run-1");

    let err = stage(&s, config.clone())
        .initiate(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err.source, IngestError::CorruptArchive { .. }), "{err}");
    assert!(!config.feature_store_dir.exists());
}

#[tokio::test]
async fn traversal_entry_aborts_extraction() {
    let evil = zip_bytes(&[
        ("train/images/ok.jpg", b"fine"),
        ("../../../escaped.txt", b"pwned"),
    ]);
    let host = ArchiveHost::start(vec![("data.zip", evil)]).await;
    let tmp = tempfile::tempdir().unwrap();
    let s = settings(tmp.path(), &host.url("data.zip"));
    let config = ingestion_config(&s, "run-1");

    let err = stage(&s, config.clone())
        .initiate(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err.source, IngestError::PathTraversal { .. }), "{err}");
    assert!(!config.feature_store_dir.exists());
    assert!(!tmp.path().join("escaped.txt").exists());
    assert!(!config.download_dir.join("escaped.txt").exists());
}

#[tokio::test]
async fn cancelled_run_leaves_no_partial_state() {
    let host = ArchiveHost::start(vec![("data.zip", zip_bytes(SAMPLE_DATASET))]).await;
    let tmp = tempfile::tempdir().unwrap();
    let s = settings(tmp.path(), &host.url("data.zip"));
    let config = ingestion_config(&s, "run-1");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = stage(&s, config.clone()).initiate(&cancel).await.unwrap_err();

    assert!(matches!(err.source, IngestError::Cancelled), "{err}");
    assert!(!config.local_archive_path.exists());
    assert!(!partial_path(&config.local_archive_path).exists());
    assert!(!config.feature_store_dir.exists());
}

#[tokio::test]
async fn held_lock_rejects_a_second_run() {
    let host = ArchiveHost::start(vec![("data.zip", zip_bytes(SAMPLE_DATASET))]).await;
    let tmp = tempfile::tempdir().unwrap();
    let s = settings(tmp.path(), &host.url("data.zip"));
    let config = ingestion_config(&s, "run-1");
    std::fs::create_dir_all(&config.download_dir).unwrap();
    let _held = RunLock::acquire(&config.download_dir).unwrap();

    let err = stage(&s, config.clone())
        .initiate(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err.source, IngestError::Locked { .. }), "{err}");
    assert_eq!(host.hits(), 0);
}

// ── Checksums ───────────────────────────────────────────────────────

#[tokio::test]
async fn corrupt_local_archive_is_refetched() {
    let body = zip_bytes(SAMPLE_DATASET);
    let host = ArchiveHost::start(vec![("data.zip", body.clone())]).await;
    let tmp = tempfile::tempdir().unwrap();
    let mut s = settings(tmp.path(), &host.url("data.zip"));
    s.expected_sha256 = Some(sha256_hex(&body));
    let config = ingestion_config(&s, "run-1");

    // Leftover from an earlier run that was truncated outside our control.
    std::fs::create_dir_all(&config.download_dir).unwrap();
    std::fs::write(&config.local_archive_path, &body[..body.len() / 2]).unwrap();

    let artifact = stage(&s, config.clone())
        .initiate(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(host.hits(), 1);
    assert!(!artifact.fetch_skipped);
    assert_eq!(artifact.file_count, SAMPLE_DATASET.len());
    assert_eq!(std::fs::read(&config.local_archive_path).unwrap(), body);
}

#[tokio::test]
async fn digest_mismatch_fails_the_stage() {
    let host = ArchiveHost::start(vec![("data.zip", zip_bytes(SAMPLE_DATASET))]).await;
    let tmp = tempfile::tempdir().unwrap();
    let mut s = settings(tmp.path(), &host.url("data.zip"));
    s.expected_sha256 = Some("ab".repeat(32));
    let config = ingestion_config(&s, "run-1");

    let err = stage(&s, config.clone())
        .initiate(&CancellationToken::new())
        .await
        .unwrap_err();

    match err.source {
        IngestError::ChecksumMismatch { expected, .. } => assert_eq!(expected, "ab".repeat(32)),
        other => panic!("expected checksum mismatch, got {other}"),
    }
    assert!(!config.local_archive_path.exists());
    assert!(!config.feature_store_dir.exists());
}
