//! Records kept by the file backend survive a restart.

use http::{HeaderMap, Method, StatusCode};
use http_inspector::capture::{RequestDescriptor, ResponseDescriptor};
use http_inspector::storage::{RetentionPolicy, StorageFactory};
use http_inspector::{Recorder, RecorderBuilder};

fn descriptor(path: &str) -> RequestDescriptor {
    RequestDescriptor {
        secure: false,
        method: Method::GET,
        host: "files.test".into(),
        path: path.into(),
        query: None,
        remote_addr: None,
        headers: HeaderMap::new(),
    }
}

async fn open(dir: &std::path::Path, max_requests: usize) -> Recorder {
    RecorderBuilder::default()
        .storage(StorageFactory::File {
            directory: dir.to_path_buf(),
        })
        .retention(RetentionPolicy::new(max_requests))
        .build()
        .await
        .unwrap()
}

async fn record(recorder: &Recorder, path: &str) {
    let session = recorder.on_request_start(&descriptor(path)).unwrap();
    session.start_processing();
    session.capture_response_body(path.as_bytes());
    recorder
        .on_request_end(session, &ResponseDescriptor::new(StatusCode::OK))
        .await
        .unwrap();
}

fn paths(summaries: &[http_inspector::record::RecordSummary]) -> Vec<&str> {
    summaries.iter().map(|s| s.path.as_str()).collect()
}

#[tokio::test]
async fn test_records_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let recorder = open(dir.path(), 10).await;
    for path in ["/one", "/two", "/three"] {
        record(&recorder, path).await;
    }
    let before = recorder.query().list().await.unwrap();
    drop(recorder);

    let reopened = open(dir.path(), 10).await;
    let after = reopened.query().list().await.unwrap();
    assert_eq!(paths(&after), vec!["/three", "/two", "/one"]);
    assert_eq!(before, after);

    let body = reopened.query().get_response_body(&after[0].id).await.unwrap();
    assert_eq!(body.unwrap(), "/three");
}

#[tokio::test]
async fn test_smaller_retention_applies_on_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let recorder = open(dir.path(), 10).await;
    for path in ["/a", "/b", "/c", "/d"] {
        record(&recorder, path).await;
    }
    drop(recorder);

    let reopened = open(dir.path(), 2).await;
    let listed = reopened.query().list().await.unwrap();
    assert_eq!(paths(&listed), vec!["/d", "/c"]);

    record(&reopened, "/e").await;
    let listed = reopened.query().list().await.unwrap();
    assert_eq!(paths(&listed), vec!["/e", "/d"]);
}
