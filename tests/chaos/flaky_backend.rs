//! Transfers over a backend that drops requests and answers slowly.

use std::sync::Arc;

use bytes::Bytes;
use scatter_engine::{TaskKind, TaskOutcome, TransferEngine};
use scatter_integration_tests::{settings, test_data_seeded};
use scatter_uploader::{ChaosUploader, DirUploader};

const MIB: usize = 1024 * 1024;

fn flaky_engine(
    dir: &std::path::Path,
    chunk: u32,
    seed: u64,
) -> (TransferEngine, Arc<ChaosUploader>) {
    let disk = Arc::new(DirUploader::new(dir, chunk).unwrap());
    let chaos = Arc::new(
        ChaosUploader::new(disk)
            .failure_rate(0.1)
            .store_latency(0, 10)
            .read_latency(0, 10)
            .seed(seed),
    );
    let engine = TransferEngine::new(chaos.clone(), settings(4, 3, 5));
    (engine, chaos)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ten_mib_over_flaky_disk() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, chaos) = flaky_engine(dir.path(), 2 * MIB as u32, 42);
    let data = test_data_seeded(10 * MIB, 1);

    let task = engine
        .tasks()
        .create(TaskKind::Upload, "flaky.bin", data.len() as u64);
    let descriptor = engine
        .uploads()
        .upload_bytes(Bytes::from(data.clone()), "flaky.bin", &task)
        .await
        .unwrap();
    task.complete(None);

    let task = engine
        .tasks()
        .create(TaskKind::Download, "flaky.bin", descriptor.file_size);
    let got = engine
        .downloads()
        .read_all(&descriptor, task.clone())
        .await
        .unwrap();
    assert_eq!(got.len(), data.len());
    assert!(got[..] == data[..], "content differs after retries");
    assert!(matches!(task.outcome(), TaskOutcome::Completed { .. }));

    // 5 chunks and a manifest each way; anything above is a retry.
    let calls = chaos.store_calls() + chaos.read_calls();
    assert_eq!(calls, 12 + chaos.injected_failures());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_under_chaos() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _chaos) = flaky_engine(dir.path(), 256 * 1024, 7);
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for i in 0..6u32 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let data = test_data_seeded(MIB + i as usize * 4099, i);
            let name = format!("file-{i}");
            let task = engine
                .tasks()
                .create(TaskKind::Upload, &name, data.len() as u64);
            let descriptor = engine
                .uploads()
                .upload_bytes(Bytes::from(data.clone()), &name, &task)
                .await
                .unwrap();

            let task = engine
                .tasks()
                .create(TaskKind::Download, &name, descriptor.file_size);
            let got = engine.downloads().read_all(&descriptor, task).await.unwrap();
            assert!(got[..] == data[..], "{name} corrupted");
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let downloads = engine
        .tasks()
        .list()
        .into_iter()
        .filter(|t| t.kind == TaskKind::Download)
        .filter(|t| matches!(t.outcome, TaskOutcome::Completed { .. }))
        .count();
    assert_eq!(downloads, 6);
}
