use std::time::Duration;

use rstest::{fixture, rstest};
use segflow_net::{Headers, HttpClient, Net, NetError, NetExt, NetOptions, RangeSpec, RetryPolicy};
use segflow_test_utils::{MediaServer, payload};

#[fixture]
fn server() -> MediaServer {
    MediaServer::builder()
        .file("/data.bin", payload(100_000))
        .content_type("/data.bin", "video/mp2t")
        .file("/flaky.bin", b"recovered".to_vec())
        .failing("/flaky.bin", 2)
        .status("/missing.bin", 404)
        .build()
}

fn client() -> HttpClient {
    HttpClient::new(NetOptions {
        chunk_size: 4096,
        ..NetOptions::default()
    })
    .unwrap()
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn get_bytes_returns_whole_body(server: MediaServer) {
    let body = client().get_bytes(server.url("/data.bin"), None).unwrap();
    assert_eq!(body.to_vec(), payload(100_000));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn stream_yields_bounded_chunks(server: MediaServer) {
    let stream = client().stream(server.url("/data.bin"), None).unwrap();
    assert_eq!(stream.content_length(), Some(100_000));

    let mut total = Vec::new();
    for chunk in stream {
        let chunk = chunk.unwrap();
        assert!(chunk.len() <= 4096);
        total.extend_from_slice(&chunk);
    }
    assert_eq!(total, payload(100_000));
}

#[rstest]
#[case::head_of_file(0, 99)]
#[case::middle(50_000, 50_999)]
#[case::tail(99_990, 99_999)]
#[timeout(Duration::from_secs(10))]
fn get_range_returns_slice(server: MediaServer, #[case] start: u64, #[case] end: u64) {
    let body = client()
        .get_range(server.url("/data.bin"), RangeSpec::new(start, Some(end)), None)
        .unwrap()
        .collect_bytes()
        .unwrap();
    assert_eq!(body.to_vec(), payload(100_000)[start as usize..=end as usize]);
    assert_eq!(server.ranges("/data.bin"), vec![format!("bytes={start}-{end}")]);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn head_reports_length_and_type(server: MediaServer) {
    let headers = client().head(server.url("/data.bin"), None).unwrap();
    assert_eq!(headers.content_length(), Some(100_000));
    assert_eq!(headers.content_type(), Some("video/mp2t"));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn error_status_is_reported(server: MediaServer) {
    let err = client().get_bytes(server.url("/missing.bin"), None).unwrap_err();
    assert_eq!(err.status_code(), Some(404));
    assert!(!err.is_retryable());
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn retry_layer_recovers_from_server_errors(server: MediaServer) {
    let net = client().with_retry(RetryPolicy::new(
        3,
        Duration::from_millis(5),
        Duration::from_millis(20),
    ));
    let body = net.get_bytes(server.url("/flaky.bin"), None).unwrap();
    assert_eq!(&body[..], b"recovered");
    assert_eq!(server.hits("/flaky.bin"), 3);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn invalid_range_is_rejected_locally(server: MediaServer) {
    let err = client()
        .get_range(server.url("/data.bin"), RangeSpec::new(10, Some(5)), None)
        .unwrap_err();
    assert!(matches!(err, NetError::InvalidRange(_)));
    assert_eq!(server.hits("/data.bin"), 0);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn default_headers_are_sent(server: MediaServer) {
    let mut extra = Headers::new();
    extra.insert("Range", "bytes=0-9");
    let body = client()
        .get_bytes(server.url("/data.bin"), Some(extra))
        .unwrap();
    assert_eq!(body.len(), 10);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn slow_response_hits_request_timeout() {
    let server = MediaServer::builder()
        .file("/slow.bin", payload(10))
        .delayed("/slow.bin", Duration::from_secs(3))
        .build();
    let client = HttpClient::new(NetOptions {
        request_timeout: Duration::from_millis(200),
        ..NetOptions::default()
    })
    .unwrap();

    let err = client.get_bytes(server.url("/slow.bin"), None).unwrap_err();
    assert!(err.is_timeout(), "{err}");
}
