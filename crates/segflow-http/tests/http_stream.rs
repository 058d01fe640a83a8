use std::{sync::Arc, time::Duration};

use rstest::{fixture, rstest};
use segflow_http::{HttpStream, SegmentedHttpStream, probe};
use segflow_net::{HttpClient, Net, NetOptions};
use segflow_stream::{StreamOptions, StreamReader};
use segflow_test_utils::{MediaServer, init_tracing, payload};

const FILE_LEN: usize = 10_000;

#[fixture]
fn server() -> MediaServer {
    init_tracing();
    MediaServer::builder()
        .file("/video.mp4", payload(FILE_LEN))
        .content_type("/video.mp4", "video/mp4")
        .build()
}

fn net() -> Arc<dyn Net> {
    Arc::new(HttpClient::new(NetOptions::default()).unwrap())
}

fn options() -> StreamOptions {
    StreamOptions::new()
        .with_http_segment_size(1024)
        .with_read_timeout(Duration::from_secs(5))
        .with_seek_timeout(Duration::from_secs(5))
}

fn read_all(reader: &mut StreamReader) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let chunk = reader.read(3000).unwrap();
        if chunk.is_empty() {
            return out;
        }
        out.extend_from_slice(&chunk);
    }
}

#[rstest]
#[timeout(Duration::from_secs(15))]
fn probe_reports_length_and_type(server: MediaServer) {
    let probe = probe(net().as_ref(), &server.url("/video.mp4")).unwrap();
    assert_eq!(probe.content_length, Some(FILE_LEN as u64));
    assert_eq!(probe.content_type.as_deref(), Some("video/mp4"));
    assert!(probe.accepts_ranges);
}

#[rstest]
#[timeout(Duration::from_secs(15))]
fn segmented_stream_reads_whole_file_in_ranges(server: MediaServer) {
    let stream = SegmentedHttpStream::new(server.url("/video.mp4"), net(), options());
    let mut reader = stream.open().unwrap();

    assert!(reader.supports_seek());
    assert_eq!(reader.content_length(), Some(FILE_LEN as u64));
    assert_eq!(reader.content_type(), Some("video/mp4"));
    assert_eq!(read_all(&mut reader), payload(FILE_LEN));

    let ranges = server.ranges("/video.mp4");
    assert_eq!(ranges.len(), 10);
    assert!(ranges.contains(&"bytes=9216-9999".to_owned()));
}

#[rstest]
#[timeout(Duration::from_secs(15))]
fn segmented_stream_seeks(server: MediaServer) {
    let stream = SegmentedHttpStream::new(server.url("/video.mp4"), net(), options());
    let mut reader = stream.open().unwrap();
    let expected = payload(FILE_LEN);

    let head = reader.read(100).unwrap();
    assert_eq!(&head[..], &expected[..head.len()]);

    reader.seek(5000).unwrap();
    assert_eq!(read_all(&mut reader), &expected[5000..]);
}

#[rstest]
#[timeout(Duration::from_secs(15))]
fn transient_range_failure_is_retried() {
    init_tracing();
    let server = MediaServer::builder()
        .file("/flaky.bin", payload(3000))
        .failing("/flaky.bin", 1)
        .build();
    let stream = SegmentedHttpStream::new(server.url("/flaky.bin"), net(), options());
    let mut reader = stream.open().unwrap();
    assert_eq!(read_all(&mut reader), payload(3000));
}

#[rstest]
#[timeout(Duration::from_secs(15))]
fn progressive_stream_reads_body(server: MediaServer) {
    let stream = HttpStream::new(server.url("/video.mp4"), net(), options());
    let mut reader = stream.open().unwrap();

    assert!(!reader.supports_seek());
    assert_eq!(read_all(&mut reader), payload(FILE_LEN));
    assert!(server.ranges("/video.mp4").is_empty());
}

#[rstest]
#[timeout(Duration::from_secs(15))]
fn missing_resource_fails_open(server: MediaServer) {
    let stream = SegmentedHttpStream::new(server.url("/missing.mp4"), net(), options());
    assert!(stream.open().is_err());
}
