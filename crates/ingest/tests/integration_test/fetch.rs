use std::time::Duration;

use tokio_util::sync::CancellationToken;

use objdet_ingest::fetch::partial_path;
use objdet_ingest::{ArchiveFetcher, FetchOptions, HttpFetcher, IngestError, RemoteFetcher};

use crate::helpers::{aws, settings, zip_bytes, ArchiveHost, AUTH_TOKEN, SAMPLE_DATASET};

#[tokio::test]
async fn http_fetch_streams_the_body() {
    let body = zip_bytes(SAMPLE_DATASET);
    let host = ArchiveHost::start(vec![("data.zip", body.clone())]).await;
    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("data.zip");

    let fetcher = HttpFetcher::new(&FetchOptions::default()).unwrap();
    let result = fetcher
        .fetch(&host.url("data.zip"), &dest, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.skipped);
    assert_eq!(result.size_bytes, body.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
    assert!(!partial_path(&dest).exists());
}

#[tokio::test]
async fn existing_archive_is_not_refetched() {
    let host = ArchiveHost::start(vec![("data.zip", b"remote".to_vec())]).await;
    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("data.zip");
    std::fs::write(&dest, b"local copy").unwrap();

    let fetcher = RemoteFetcher::new(FetchOptions::default(), aws()).unwrap();
    let result = fetcher
        .fetch(&host.url("data.zip"), &dest, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.skipped);
    assert_eq!(host.hits(), 0);
    assert_eq!(std::fs::read(&dest).unwrap(), b"local copy");
}

#[tokio::test]
async fn error_status_is_a_fetch_error() {
    let host = ArchiveHost::start(vec![]).await;
    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("data.zip");

    let fetcher = HttpFetcher::new(&FetchOptions::default()).unwrap();
    let err = fetcher
        .fetch(&host.url("missing.zip"), &dest, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        IngestError::Fetch { reason, .. } => assert!(reason.contains("404"), "{reason}"),
        other => panic!("expected fetch error, got {other}"),
    }
    assert!(!dest.exists());
    assert!(!partial_path(&dest).exists());
}

#[tokio::test]
async fn bearer_token_is_sent_when_configured() {
    let host = ArchiveHost::start(vec![("data.zip", b"secret set".to_vec())]).await;
    let tmp = tempfile::tempdir().unwrap();

    let anonymous = HttpFetcher::new(&FetchOptions::default()).unwrap();
    let err = anonymous
        .fetch(
            &host.private_url("data.zip"),
            &tmp.path().join("anon.zip"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Fetch { ref reason, .. } if reason.contains("401")));

    let mut with_token = settings(tmp.path(), &host.private_url("data.zip"));
    with_token.auth_token = Some(AUTH_TOKEN.to_string());
    let authed = HttpFetcher::new(&FetchOptions::from_settings(&with_token)).unwrap();
    let dest = tmp.path().join("authed.zip");
    authed
        .fetch(&host.private_url("data.zip"), &dest, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"secret set");
}

#[tokio::test]
async fn cancelled_fetch_writes_nothing() {
    let host = ArchiveHost::start(vec![("data.zip", b"bytes".to_vec())]).await;
    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("data.zip");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let fetcher = HttpFetcher::new(&FetchOptions::default()).unwrap();
    let err = fetcher
        .fetch(&host.url("data.zip"), &dest, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Cancelled));
    assert!(!dest.exists());
    assert!(!partial_path(&dest).exists());
}

#[tokio::test]
async fn stalled_body_hits_the_transfer_timeout() {
    let host = ArchiveHost::start(vec![]).await;
    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("data.zip");
    let options = FetchOptions {
        timeout: Duration::from_secs(1),
        ..FetchOptions::default()
    };

    let fetcher = HttpFetcher::new(&options).unwrap();
    let err = tokio::time::timeout(
        Duration::from_secs(10),
        fetcher.fetch(&host.stalled_url("data.zip"), &dest, &CancellationToken::new()),
    )
    .await
    .expect("fetch must give up on its own")
    .unwrap_err();

    assert!(matches!(err, IngestError::Fetch { .. }), "{err}");
    assert!(!dest.exists());
    assert!(!partial_path(&dest).exists());
}
