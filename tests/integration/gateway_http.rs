//! The gateway over a real socket, driven by an HTTP client.

use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, RANGE};
use scatter_engine::{TaskKind, TaskOutcome};
use scatter_integration_tests::{LiveGateway, encode, settings, test_data, wait_until};
use scatter_uploader::{ChaosUploader, MemoryUploader};

const CHUNK: u32 = 32 * 1024;

async fn put(client: &reqwest::Client, gw: &LiveGateway, name: &str, data: &[u8]) -> String {
    let resp = client
        .put(gw.url(&format!("/api/upload?name={}", encode(name))))
        .body(data.to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    resp.text().await.unwrap()
}

#[tokio::test]
async fn test_put_then_get() {
    let gw = LiveGateway::start(Arc::new(MemoryUploader::new(CHUNK)), None).await;
    let client = reqwest::Client::new();
    let data = test_data(200_000);

    let code = put(&client, &gw, "song.mp3", &data).await;
    assert!(code.starts_with("sc:"));

    let resp = client
        .get(gw.url(&format!("/api/download?s={}", encode(&code))))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[CONTENT_TYPE], "audio/mpeg");
    assert_eq!(resp.content_length(), Some(data.len() as u64));
    assert_eq!(&resp.bytes().await.unwrap()[..], &data[..]);
}

#[tokio::test]
async fn test_range_request_like_a_player() {
    let gw = LiveGateway::start(Arc::new(MemoryUploader::new(CHUNK)), None).await;
    let client = reqwest::Client::new();
    let data = test_data(150_000);
    let code = put(&client, &gw, "clip.mp4", &data).await;
    let url = gw.url(&format!("/api/download/clip.mp4?s={}", encode(&code)));

    // Players probe the start, then seek.
    let resp = client
        .get(&url)
        .header(RANGE, "bytes=0-")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.headers()[CONTENT_RANGE], "bytes 0-149999/150000");
    drop(resp);

    let resp = client
        .get(&url)
        .header(RANGE, "bytes=70000-100000")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.headers()[CONTENT_RANGE], "bytes 70000-100000/150000");
    assert_eq!(&resp.bytes().await.unwrap()[..], &data[70_000..100_001]);

    let resp = client
        .get(&url)
        .header(RANGE, "bytes=150000-")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(resp.headers()[CONTENT_RANGE], "bytes */150000");
}

#[tokio::test]
async fn test_history_and_file_info() {
    let gw = LiveGateway::start(Arc::new(MemoryUploader::new(CHUNK)), None).await;
    let client = reqwest::Client::new();

    let first = put(&client, &gw, "a.txt", b"first file").await;
    let second = put(&client, &gw, "b.txt", b"second file!").await;

    let body = client
        .get(gw.url("/api/upload_history"))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    let history: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let entries = history.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["shareInfoData"], second.as_str());
    assert_eq!(entries[1]["shareInfoData"], first.as_str());
    assert_eq!(gw.history.len(), 2);

    let body = client
        .get(gw.url(&format!("/api/file_info?s={}", encode(&first))))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    let info: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(info["name"], "a.txt");
    assert_eq!(info["size"], 10);
}

#[tokio::test]
async fn test_access_key_over_the_wire() {
    let gw = LiveGateway::start(Arc::new(MemoryUploader::new(CHUNK)), Some("s3cret")).await;
    let client = reqwest::Client::new();

    let resp = client.get(gw.url("/api/tasks")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = client
        .get(gw.url("/api/tasks?accessKey=s3cret"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_client_disconnect_cancels_download() {
    let inner = Arc::new(MemoryUploader::new(CHUNK));
    let gw = LiveGateway::start_with(inner.clone(), settings(4, 2, 1), None).await;
    let client = reqwest::Client::new();
    let data = test_data(64 * CHUNK as usize);
    let code = put(&client, &gw, "long.bin", &data).await;

    // Swap in a slow backend for the download side.
    let slow = Arc::new(ChaosUploader::new(inner).read_latency(20, 30));
    let viewer = LiveGateway::start_with(slow.clone(), settings(4, 2, 1), None).await;

    let resp = client
        .get(viewer.url(&format!("/api/download?s={}", encode(&code))))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    drop(resp);

    let tasks = viewer.engine.tasks().clone();
    wait_until(|| {
        tasks
            .list()
            .iter()
            .any(|t| t.kind == TaskKind::Download && t.outcome == TaskOutcome::Cancelled)
    })
    .await;

    // Fetching stops well short of the whole file.
    let reads = slow.read_calls();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(slow.read_calls() <= reads + 2);
    assert!(slow.read_calls() < 64);
}

#[tokio::test]
async fn test_settings_over_the_wire() {
    let gw = LiveGateway::start(Arc::new(MemoryUploader::new(CHUNK)), None).await;
    let client = reqwest::Client::new();

    let resp = client
        .put(gw.url("/api/settings"))
        .header(CONTENT_TYPE, "application/json")
        .body(r#"{"download_task_count": 7}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(gw.engine.settings().download_task_count(), 7);
}
