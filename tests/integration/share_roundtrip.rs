//! Share codes produced by one engine are enough for another engine to
//! fetch the file back.

use bytes::Bytes;
use scatter_codec::{decode_share, encode_share};
use scatter_engine::{TaskKind, TaskOutcome, TransferError, resolve};
use scatter_integration_tests::{SharedDir, test_data, test_data_seeded};
use scatter_types::ByteRange;

const CHUNK: u32 = 64 * 1024;

async fn share(pair: &SharedDir, data: &[u8], name: &str, compact: bool) -> String {
    let task = pair
        .alice
        .tasks()
        .create(TaskKind::Upload, name, data.len() as u64);
    let descriptor = pair
        .alice
        .uploads()
        .upload_bytes(Bytes::copy_from_slice(data), name, &task)
        .await
        .unwrap();
    let code = encode_share(&descriptor, compact);
    task.complete(Some(code.clone()));
    code
}

async fn fetch(pair: &SharedDir, code: &str, range: Option<ByteRange>) -> Bytes {
    let descriptor = resolve(code).unwrap();
    let len = range.map_or(descriptor.file_size, |r| r.len());
    let task = pair
        .bob
        .tasks()
        .create(TaskKind::Download, &descriptor.file_name, len);
    let mut out = Vec::new();
    pair.bob
        .downloads()
        .download_to(&descriptor, range, &mut out, task.clone())
        .await
        .unwrap();
    assert!(matches!(task.outcome(), TaskOutcome::Completed { .. }));
    Bytes::from(out)
}

#[tokio::test]
async fn test_verbose_code_roundtrip() {
    let pair = SharedDir::new(CHUNK);
    let data = test_data(300_000);

    let code = share(&pair, &data, "report.pdf", false).await;
    assert!(code.starts_with("scatter://share?"));

    assert_eq!(&fetch(&pair, &code, None).await[..], &data[..]);
}

#[tokio::test]
async fn test_compact_code_roundtrip() {
    let pair = SharedDir::new(CHUNK);
    let data = test_data_seeded(1_000_003, 7);

    let code = share(&pair, &data, "big.bin", true).await;
    assert!(code.starts_with("sc:"));

    let descriptor = decode_share(&code).unwrap();
    assert_eq!(descriptor.file_name, "big.bin");
    assert_eq!(descriptor.file_size, data.len() as u64);

    assert_eq!(&fetch(&pair, &code, None).await[..], &data[..]);
}

#[tokio::test]
async fn test_code_pasted_in_a_message() {
    let pair = SharedDir::new(CHUNK);
    let data = test_data(5000);
    let code = share(&pair, &data, "note.txt", true).await;

    let message = format!("grab this before it expires:\n\n{code}\n\nthanks!");
    assert_eq!(&fetch(&pair, &message, None).await[..], &data[..]);
}

#[tokio::test]
async fn test_ranges_across_chunk_boundaries() {
    let pair = SharedDir::new(CHUNK);
    let data = test_data(5 * CHUNK as usize + 123);
    let code = share(&pair, &data, "movie.mkv", true).await;

    let chunk = CHUNK as u64;
    let size = data.len() as u64;
    let ranges = [
        ByteRange { start: 0, end: 1 },
        ByteRange { start: chunk - 1, end: chunk + 1 },
        ByteRange { start: chunk, end: 2 * chunk },
        ByteRange { start: 100, end: 4 * chunk + 7 },
        ByteRange { start: size - 123, end: size },
        ByteRange { start: size - 1, end: size },
    ];
    for range in ranges {
        let got = fetch(&pair, &code, Some(range)).await;
        assert_eq!(
            &got[..],
            &data[range.start as usize..range.end as usize],
            "range {range:?}"
        );
    }
}

#[tokio::test]
async fn test_empty_file() {
    let pair = SharedDir::new(CHUNK);
    let code = share(&pair, &[], "empty", true).await;

    let descriptor = resolve(&code).unwrap();
    assert_eq!(descriptor.file_size, 0);
    assert!(fetch(&pair, &code, None).await.is_empty());
}

#[tokio::test]
async fn test_range_past_end_is_rejected() {
    let pair = SharedDir::new(CHUNK);
    let data = test_data(1000);
    let code = share(&pair, &data, "small", true).await;
    let descriptor = resolve(&code).unwrap();

    let task = pair.bob.tasks().create(TaskKind::Download, "small", 10);
    let err = pair
        .bob
        .downloads()
        .open(&descriptor, Some(ByteRange { start: 995, end: 1005 }), task)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, TransferError::Download(_)), "{err}");
}

#[tokio::test]
async fn test_traffic_is_metered_on_both_sides() {
    let pair = SharedDir::new(CHUNK);
    let data = test_data(3 * CHUNK as usize);
    let code = share(&pair, &data, "metered", true).await;
    fetch(&pair, &code, None).await;

    let up = pair.alice.traffic();
    let down = pair.bob.traffic();
    assert!(up.uploaded > data.len() as u64, "sealed blobs carry overhead");
    assert_eq!(up.downloaded, 0);
    assert!(down.downloaded > data.len() as u64);
    assert_eq!(down.uploaded, 0);
}
