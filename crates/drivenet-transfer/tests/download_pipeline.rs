//! Download pipeline against the in-memory network: protocol fallback,
//! shard ordering, progress, cancellation and failure reporting.

mod common;

use bytes::Bytes;
use common::{FakeNetwork, BUCKET};
use drivenet_cache::{LruCache, MemoryStorage};
use drivenet_crypto::derive_key;
use drivenet_transfer::download::DownloadOptions;
use drivenet_transfer::{
    fetch_cached, Credentials, DownloadRequest, DownloadSettings, DownloadState, Downloader,
    ProgressFn, TransferError,
};
use futures::StreamExt;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn downloader(net: &Arc<FakeNetwork>, settings: DownloadSettings) -> Downloader {
    Downloader::new(net.clone(), net.clone(), settings)
}

fn request(file: &str) -> DownloadRequest {
    DownloadRequest::new(BUCKET, file)
        .with_credentials(Credentials::new("user@example.com", "secret"))
        .with_mnemonic(common::mnemonic())
}

#[tokio::test]
async fn v2_download_round_trip() {
    let net = FakeNetwork::new();
    let plain = common::plaintext(10_000);
    net.add_file("f1", &plain, &[4000, 4000, 2000], false);

    let (on_state, states) = common::recorder::<DownloadState>();
    let (on_progress, progress) = common::progress_recorder();
    let options = DownloadOptions::default()
        .with_state_observer(on_state)
        .with_progress(on_progress);

    let stream = downloader(&net, DownloadSettings::default())
        .download(&request("f1"), options)
        .await
        .unwrap();
    assert_eq!(stream.metadata().size, 10_000);
    assert_eq!(stream.collect_bytes().await.unwrap(), plain);

    assert_eq!(
        *states.lock().unwrap(),
        vec![
            DownloadState::MetadataFetching,
            DownloadState::MirrorsResolving,
            DownloadState::Streaming,
            DownloadState::Decrypting,
            DownloadState::Complete,
        ]
    );

    let progress = progress.lock().unwrap();
    assert!(progress.windows(2).all(|w| w[0].1 <= w[1].1));
    assert_eq!(progress.last(), Some(&(10_000, 10_000)));

    let calls = net.calls();
    assert_eq!(calls[0], "v2:f1");
    assert!(!calls.iter().any(|c| c.starts_with("info:")));
}

#[tokio::test]
async fn progress_reports_total_first() {
    let net = FakeNetwork::new();
    let plain = common::plaintext(10_000);
    net.add_file("f1", &plain, &[4000, 6000], false);

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let on_progress: ProgressFn = Arc::new(move |total, transferred| {
        sink.lock().unwrap().push((total, transferred));
    });

    downloader(&net, DownloadSettings::default())
        .download(&request("f1"), DownloadOptions::default().with_progress(on_progress))
        .await
        .unwrap()
        .collect_bytes()
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    let (total, transferred) = seen[0];
    assert_eq!(total, 10_000);
    assert!(transferred < total);
    assert!(seen.iter().all(|(total, _)| *total == 10_000));
    assert_eq!(seen.last(), Some(&(10_000, 10_000)));
}

#[tokio::test]
async fn legacy_file_falls_back_once() {
    let net = FakeNetwork::new();
    let plain = common::plaintext(3000);
    net.add_file("old", &plain, &[3000], true);

    let data = downloader(&net, DownloadSettings::default())
        .download(&request("old"), DownloadOptions::default())
        .await
        .unwrap()
        .collect_bytes()
        .await
        .unwrap();
    assert_eq!(data, plain);

    let calls = net.calls();
    assert_eq!(calls.iter().filter(|c| *c == "v2:old").count(), 1);
    assert!(calls.contains(&"info:old".to_string()));
    assert!(calls.contains(&"mirrors:old".to_string()));
}

#[tokio::test]
async fn legacy_mirrors_go_through_proxy() {
    let net = FakeNetwork::new();
    let plain = common::plaintext(1500);
    let urls = net.add_file("old", &plain, &[1500], true);
    net.mirror_through_proxy("https://proxy.test");

    let settings = DownloadSettings {
        proxy_url: Some("https://proxy.test/".into()),
        ..Default::default()
    };
    let data = downloader(&net, settings)
        .download(&request("old"), DownloadOptions::default())
        .await
        .unwrap()
        .collect_bytes()
        .await
        .unwrap();
    assert_eq!(data, plain);
    assert!(net
        .calls()
        .contains(&format!("fetch:https://proxy.test/{}", urls[0])));
}

#[tokio::test]
async fn other_metadata_errors_do_not_fall_back() {
    let net = FakeNetwork::new();
    net.add_file("f", &common::plaintext(100), &[100], false);
    *net.metadata_failure.lock().unwrap() = Some("HTTP 500: bridge down".into());

    let (on_state, states) = common::recorder::<DownloadState>();
    let result = downloader(&net, DownloadSettings::default())
        .download(&request("f"), DownloadOptions::default().with_state_observer(on_state))
        .await;

    assert!(matches!(result, Err(TransferError::MetadataFetch { .. })));
    assert_eq!(net.calls(), vec!["v2:f".to_string()]);
    assert_eq!(states.lock().unwrap().last(), Some(&DownloadState::Failed));
}

#[tokio::test]
async fn shards_yield_in_index_order_even_when_opened_out_of_order() {
    let net = FakeNetwork::new();
    let plain = common::plaintext(6000);
    let urls = net.add_file("f", &plain, &[2000, 2000, 2000], false);
    net.shard_mut(&urls[0], |s| s.open_delay = Duration::from_millis(80));

    let settings = DownloadSettings {
        shard_prefetch: 3,
        ..Default::default()
    };
    let data = downloader(&net, settings)
        .download(&request("f"), DownloadOptions::default())
        .await
        .unwrap()
        .collect_bytes()
        .await
        .unwrap();
    assert_eq!(data, plain);

    // shard 1 finished opening first, yet its bytes came second
    let opened: Vec<_> = net
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("opened:"))
        .collect();
    assert_eq!(opened[0], format!("opened:{}", urls[1]));
}

#[tokio::test]
async fn abort_mid_stream_yields_one_error_then_ends() {
    let net = FakeNetwork::new();
    let plain = common::plaintext(20_000);
    let urls = net.add_file("big", &plain, &[20_000], false);
    net.shard_mut(&urls[0], |s| s.chunk_delay = Duration::from_millis(20));

    let cancel = CancellationToken::new();
    let (on_state, states) = common::recorder::<DownloadState>();
    let options = DownloadOptions::default()
        .with_cancel(cancel.clone())
        .with_state_observer(on_state);

    let mut stream = downloader(&net, DownloadSettings::default())
        .download(&request("big"), options)
        .await
        .unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 1000);

    cancel.cancel();
    cancel.cancel();
    let next = tokio::time::timeout(Duration::from_millis(50), stream.next())
        .await
        .expect("abort was not observed promptly");
    assert!(matches!(next, Some(Err(TransferError::Aborted { .. }))));
    assert!(stream.next().await.is_none());
    assert!(stream.next().await.is_none());

    let states = states.lock().unwrap();
    assert_eq!(states.last(), Some(&DownloadState::Aborted));
    assert_eq!(
        states.iter().filter(|s| **s == DownloadState::Aborted).count(),
        1
    );
}

#[tokio::test]
async fn abort_before_start() {
    let net = FakeNetwork::new();
    net.add_file("f", &common::plaintext(10), &[10], false);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = downloader(&net, DownloadSettings::default())
        .download(&request("f"), DownloadOptions::default().with_cancel(cancel))
        .await;
    assert!(result.err().is_some_and(|e| e.is_aborted()));
    assert!(net.calls().is_empty());
}

#[tokio::test]
async fn configuration_errors_precede_network_calls() {
    let net = FakeNetwork::new();
    let dl = downloader(&net, DownloadSettings::default());

    let no_auth = DownloadRequest::new(BUCKET, "f").with_mnemonic(common::mnemonic());
    assert!(matches!(
        dl.download(&no_auth, DownloadOptions::default()).await,
        Err(TransferError::Configuration(_))
    ));

    let both_keys = request("f").with_encryption_key(vec![0u8; 32]);
    assert!(matches!(
        dl.download(&both_keys, DownloadOptions::default()).await,
        Err(TransferError::Configuration(_))
    ));

    let short_key = DownloadRequest::new(BUCKET, "f")
        .with_token(SecretString::from("token"))
        .with_encryption_key(vec![0u8; 12]);
    assert!(matches!(
        dl.download(&short_key, DownloadOptions::default()).await,
        Err(TransferError::Configuration(_))
    ));

    assert!(net.calls().is_empty());
}

#[tokio::test]
async fn raw_key_with_bearer_token() {
    let net = FakeNetwork::new();
    let plain = common::plaintext(2500);
    net.add_file("f", &plain, &[1200, 1300], false);

    let key = derive_key(&common::mnemonic(), BUCKET, &common::fixed_index()).unwrap();
    let req = DownloadRequest::new(BUCKET, "f")
        .with_token(SecretString::from("bearer-token"))
        .with_encryption_key(key.as_bytes().to_vec());

    let data = downloader(&net, DownloadSettings::default())
        .download(&req, DownloadOptions::default())
        .await
        .unwrap()
        .collect_bytes()
        .await
        .unwrap();
    assert_eq!(data, plain);
}

#[tokio::test]
async fn failing_mirror_reports_its_shard() {
    let net = FakeNetwork::new();
    let plain = common::plaintext(3000);
    let urls = net.add_file("f", &plain, &[1000, 2000], false);
    net.shard_mut(&urls[1], |s| s.status = Some(503));

    let (on_state, states) = common::recorder::<DownloadState>();
    let mut stream = downloader(&net, DownloadSettings::default())
        .download(&request("f"), DownloadOptions::default().with_state_observer(on_state))
        .await
        .unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(&first[..], &plain[..1000]);
    match stream.next().await {
        Some(Err(TransferError::NetworkShard { shard, reason, .. })) => {
            assert_eq!(shard, 1);
            assert!(reason.contains("503"));
        }
        other => panic!("expected shard failure, got {other:?}"),
    }
    assert!(stream.next().await.is_none());
    assert_eq!(states.lock().unwrap().last(), Some(&DownloadState::Failed));
}

#[tokio::test]
async fn short_ciphertext_is_a_decryption_error() {
    let net = FakeNetwork::new();
    net.add_file("f", &common::plaintext(1000), &[1000], false);
    net.declare_size("f", 1500);

    let result = downloader(&net, DownloadSettings::default())
        .download(&request("f"), DownloadOptions::default())
        .await
        .unwrap()
        .collect_bytes()
        .await;
    assert!(matches!(result, Err(TransferError::Decryption { .. })));
}

#[tokio::test]
async fn long_ciphertext_is_a_decryption_error() {
    let net = FakeNetwork::new();
    net.add_file("f", &common::plaintext(3000), &[3000], false);
    net.declare_size("f", 2000);

    let result = downloader(&net, DownloadSettings::default())
        .download(&request("f"), DownloadOptions::default())
        .await
        .unwrap()
        .collect_bytes()
        .await;
    assert!(matches!(result, Err(TransferError::Decryption { .. })));
}

#[tokio::test]
async fn pipe_into_writer() {
    let net = FakeNetwork::new();
    let plain = common::plaintext(4321);
    net.add_file("f", &plain, &[4321], false);

    let mut sink: Vec<u8> = Vec::new();
    let written = downloader(&net, DownloadSettings::default())
        .download(&request("f"), DownloadOptions::default())
        .await
        .unwrap()
        .pipe_to(&mut sink)
        .await
        .unwrap();
    assert_eq!(written, 4321);
    assert_eq!(sink, plain);
}

#[tokio::test]
async fn empty_file_needs_no_mirrors() {
    let net = FakeNetwork::new();
    net.add_file("empty", &[], &[], false);

    let data = downloader(&net, DownloadSettings::default())
        .download(&request("empty"), DownloadOptions::default())
        .await
        .unwrap()
        .collect_bytes()
        .await
        .unwrap();
    assert!(data.is_empty());
}

#[tokio::test]
async fn cached_fetch_skips_network_on_hit() {
    let net = FakeNetwork::new();
    let plain = common::plaintext(800);
    net.add_file("thumb", &plain, &[800], false);

    let dl = downloader(&net, DownloadSettings::default());
    let cache: LruCache<Bytes, _> = LruCache::new(MemoryStorage::new(), 10_000);

    let first = fetch_cached(&dl, &request("thumb"), DownloadOptions::default(), &cache)
        .await
        .unwrap();
    let calls_after_miss = net.calls().len();
    let second = fetch_cached(&dl, &request("thumb"), DownloadOptions::default(), &cache)
        .await
        .unwrap();

    assert_eq!(first, plain);
    assert_eq!(second, plain);
    assert_eq!(net.calls().len(), calls_after_miss);
    assert_eq!(cache.current_size().await, 800);
}
