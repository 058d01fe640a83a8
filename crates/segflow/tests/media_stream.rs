use std::{io::Read, sync::Arc, time::Duration};

use rstest::{fixture, rstest};
use segflow::{HttpSelect, MediaError, MediaReader, MediaStream, default_net};
use segflow_net::Net;
use segflow_stream::{StreamError, StreamOptions};
use segflow_test_utils::{MediaServer, init_tracing, payload};

const FILE_LEN: usize = 6000;

#[fixture]
fn server() -> MediaServer {
    init_tracing();
    let playlist = "#EXTM3U
#EXT-X-TARGETDURATION:2
#EXT-X-PLAYLIST-TYPE:VOD
#EXTINF:2.0,
video.mp4
#EXT-X-ENDLIST
";
    MediaServer::builder()
        .file("/video.mp4", payload(FILE_LEN))
        .content_type("/video.mp4", "video/mp4")
        .file("/hidden.mp4", payload(FILE_LEN))
        .hide_length("/hidden.mp4")
        .file("/index.m3u8", playlist)
        .build()
}

fn options() -> StreamOptions {
    StreamOptions::new()
        .with_http_segment_size(1000)
        .with_read_timeout(Duration::from_secs(5))
        .with_seek_timeout(Duration::from_secs(5))
}

fn net(options: &StreamOptions) -> Arc<dyn Net> {
    default_net(options).unwrap()
}

fn read_all(reader: &mut MediaReader) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let chunk = reader.read(4096).unwrap();
        if chunk.is_empty() {
            return out;
        }
        out.extend_from_slice(&chunk);
    }
}

#[rstest]
#[case::segmented(options(), "/video.mp4", "segmented_http")]
#[case::single_thread(options().with_segment_threads(1), "/video.mp4", "http")]
#[case::unknown_length(options(), "/hidden.mp4", "http")]
#[case::missing(options(), "/missing.mp4", "http")]
#[timeout(Duration::from_secs(15))]
fn http_select_picks_stream_kind(
    server: MediaServer,
    #[case] options: StreamOptions,
    #[case] path: &str,
    #[case] kind: &str,
) {
    let stream = HttpSelect::select(server.url(path), net(&options), options);
    assert_eq!(stream.kind(), kind);
}

#[rstest]
#[timeout(Duration::from_secs(15))]
fn segmented_url_reads_and_seeks(server: MediaServer) {
    let options = options();
    let stream =
        MediaStream::from_url(server.url("/video.mp4").as_str(), net(&options), options).unwrap();
    let mut reader = stream.open().unwrap();
    let expected = payload(FILE_LEN);

    assert!(reader.supports_seek());
    assert_eq!(reader.content_length(), Some(FILE_LEN as u64));
    assert_eq!(reader.content_type(), Some("video/mp4"));

    reader.seek(4321).unwrap();
    assert_eq!(read_all(&mut reader), &expected[4321..]);
}

#[rstest]
#[timeout(Duration::from_secs(15))]
fn progressive_url_reads_through_io_read(server: MediaServer) {
    let options = options();
    let stream =
        MediaStream::from_url(server.url("/hidden.mp4").as_str(), net(&options), options).unwrap();
    let mut reader = stream.open().unwrap();

    assert!(!reader.supports_seek());
    assert_eq!(reader.seek(10), Err(StreamError::SeekNotSupported));

    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, payload(FILE_LEN));
}

#[rstest]
#[timeout(Duration::from_secs(15))]
fn playlist_url_opens_hls(server: MediaServer) {
    let options = options();
    let stream =
        MediaStream::from_url(server.url("/index.m3u8").as_str(), net(&options), options).unwrap();
    assert_eq!(stream.kind(), "hls");

    let mut reader = stream.open().unwrap();
    assert_eq!(reader.duration(), Some(Duration::from_secs(2)));
    assert_eq!(read_all(&mut reader), payload(FILE_LEN));
}

#[rstest]
fn invalid_url_is_rejected() {
    let options = options();
    let err = MediaStream::from_url("http://[::1", net(&options), options).unwrap_err();
    assert!(matches!(err, MediaError::InvalidUrl(_)));
}

#[cfg(unix)]
mod process {
    use segflow::ProcessStream;

    use super::*;

    fn shell(script: &str) -> MediaStream {
        MediaStream::Process(
            ProcessStream::new("sh", options())
                .args(["-c", script])
                .with_startup_grace(Duration::from_millis(100)),
        )
    }

    #[rstest]
    #[timeout(Duration::from_secs(10))]
    fn reads_process_stdout() {
        init_tracing();
        let mut reader = shell("printf 'hello '; printf 'world'").open().unwrap();

        assert!(!reader.supports_seek());
        assert_eq!(reader.seek(0), Err(StreamError::SeekNotSupported));
        assert_eq!(read_all(&mut reader), b"hello world");
    }

    #[rstest]
    #[timeout(Duration::from_secs(10))]
    fn failing_process_is_an_error() {
        init_tracing();
        let err = shell("exit 3").open().unwrap_err();
        assert!(matches!(err, MediaError::Process(_)), "{err}");
    }

    #[rstest]
    #[timeout(Duration::from_secs(10))]
    fn missing_program_is_an_error() {
        let stream = ProcessStream::new("/nonexistent/segflow-dumper", options());
        assert!(matches!(stream.open(), Err(MediaError::Process(_))));
    }

    #[rstest]
    #[timeout(Duration::from_secs(10))]
    fn close_kills_a_running_process() {
        init_tracing();
        let mut reader = shell("printf start; exec sleep 30").open().unwrap();
        assert_eq!(&reader.read(5).unwrap()[..], b"start");
        reader.close();
        assert_eq!(reader.read(5), Err(StreamError::Closed));
    }
}

#[rstest]
#[timeout(Duration::from_secs(15))]
fn stalled_segment_fails_after_segment_timeout() {
    init_tracing();
    let playlist = "#EXTM3U
#EXT-X-TARGETDURATION:2
#EXTINF:2.0,
slow.ts
#EXT-X-ENDLIST
";
    let server = MediaServer::builder()
        .file("/slow.ts", payload(100))
        .delayed("/slow.ts", Duration::from_secs(5))
        .file("/slow.m3u8", playlist)
        .build();
    let options = options()
        .with_segment_timeout(Duration::from_millis(300))
        .with_segment_attempts(1);
    let stream =
        MediaStream::from_url(server.url("/slow.m3u8").as_str(), net(&options), options).unwrap();
    let mut reader = stream.open().unwrap();

    let started = std::time::Instant::now();
    let err = reader.read(100).unwrap_err();
    assert!(matches!(err, StreamError::SegmentFetch { sequence: 0, .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(3));
}
