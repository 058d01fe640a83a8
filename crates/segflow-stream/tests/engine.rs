mod common;

use std::{
    io::Read,
    time::{Duration, Instant},
};

use common::{
    MemoryNet, StalledSource, VecSource, read_exact, read_to_end, segment_body, segment_url,
};
use rstest::rstest;
use segflow_net::NetError;
use segflow_stream::{SegmentedStream, StreamError, StreamOptions, StreamState};
use segflow_test_utils::{encrypt_aes128_cbc, init_tracing, sequence_iv};
use url::Url;

fn options() -> StreamOptions {
    StreamOptions::new()
        .with_read_timeout(Duration::from_secs(5))
        .with_seek_timeout(Duration::from_secs(5))
        .with_segment_threads(3)
}

#[rstest]
#[case::single_writer(1)]
#[case::parallel_writers(3)]
#[timeout(Duration::from_secs(10))]
fn segments_are_read_in_order_then_eof(#[case] writers: usize) {
    init_tracing();
    let net = MemoryNet::new();
    let source = VecSource::new(&net, &[1000, 10, 4096, 777, 1]);
    let expected = source.expected();

    let options = options().with_writer_threads(writers);
    let mut reader = SegmentedStream::new(source, net, options).open().unwrap();

    assert_eq!(read_to_end(&mut reader).unwrap(), expected);
    assert!(reader.read(16).unwrap().is_empty());
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn slow_early_segments_keep_their_place() {
    init_tracing();
    let net = MemoryNet::new();
    let source = VecSource::new(&net, &[500; 6]);
    let expected = source.expected();
    net.delay(&segment_url(0), Duration::from_millis(150));
    net.delay(&segment_url(1), Duration::from_millis(100));

    let options = options().with_writer_threads(2).with_segment_threads(4);
    let mut reader = SegmentedStream::new(source, net, options).open().unwrap();

    assert_eq!(read_to_end(&mut reader).unwrap(), expected);
}

#[rstest]
#[timeout(Duration::from_secs(15))]
fn seek_continues_exactly_at_offset() {
    init_tracing();
    let net = MemoryNet::new();
    let source = VecSource::new(&net, &[1000; 5]);
    let expected = source.expected();
    let mut reader = SegmentedStream::new(source, net, options()).open().unwrap();

    assert_eq!(read_exact(&mut reader, 1500).unwrap(), &expected[..1500]);

    reader.seek(2500).unwrap();
    assert_eq!(reader.state(), StreamState::Running);
    assert_eq!(read_exact(&mut reader, 700).unwrap(), &expected[2500..3200]);

    reader.seek(100).unwrap();
    assert_eq!(reader.position(), 100);
    assert_eq!(read_to_end(&mut reader).unwrap(), &expected[100..]);
}

#[rstest]
#[timeout(Duration::from_secs(15))]
fn seek_after_end_of_stream_restarts_reading() {
    init_tracing();
    let net = MemoryNet::new();
    let source = VecSource::new(&net, &[300; 3]);
    let expected = source.expected();
    let mut reader = SegmentedStream::new(source, net, options()).open().unwrap();

    assert_eq!(read_to_end(&mut reader).unwrap(), expected);
    reader.seek(650).unwrap();
    assert_eq!(read_to_end(&mut reader).unwrap(), &expected[650..]);
}

#[rstest]
#[timeout(Duration::from_secs(15))]
fn seek_with_parallel_writers() {
    init_tracing();
    let net = MemoryNet::new();
    let source = VecSource::new(&net, &[400; 8]);
    let expected = source.expected();
    let options = options().with_writer_threads(2).with_segment_threads(4);
    let mut reader = SegmentedStream::new(source, net, options).open().unwrap();

    assert_eq!(read_exact(&mut reader, 100).unwrap(), &expected[..100]);
    reader.seek(1799).unwrap();
    assert_eq!(read_to_end(&mut reader).unwrap(), &expected[1799..]);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn seek_rejections() {
    let net = MemoryNet::new();
    let mut seekable = SegmentedStream::new(VecSource::new(&net, &[10, 10]), net.clone(), options())
        .open()
        .unwrap();
    assert_eq!(
        seekable.seek(20),
        Err(StreamError::InvalidSeek {
            position: 20,
            length: Some(20)
        })
    );

    let source = VecSource::new(&net, &[10, 10]).not_seekable();
    let mut fixed = SegmentedStream::new(source, net, options()).open().unwrap();
    assert_eq!(fixed.seek(5), Err(StreamError::SeekNotSupported));
    assert!(!fixed.supports_seek());
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn failed_segment_is_fatal_for_on_demand_streams() {
    init_tracing();
    let net = MemoryNet::new();
    let source = VecSource::new(&net, &[100; 4]);
    net.fail(&segment_url(2), 100);

    let options = options().with_segment_attempts(2);
    let mut reader = SegmentedStream::new(source, net.clone(), options).open().unwrap();

    let err = read_to_end(&mut reader).unwrap_err();
    assert!(matches!(err, StreamError::SegmentFetch { sequence: 2, .. }), "{err:?}");
    assert_eq!(net.hits(&segment_url(2)), 2);
    assert_eq!(reader.error(), Some(err));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn failed_segment_is_dropped_for_live_streams() {
    init_tracing();
    let net = MemoryNet::new();
    let source = VecSource::new(&net, &[100; 4]).live();
    net.fail(&segment_url(1), 100);

    let options = options().with_segment_attempts(3);
    let mut reader = SegmentedStream::new(source, net.clone(), options).open().unwrap();

    let expected: Vec<u8> = [0, 2, 3]
        .into_iter()
        .flat_map(|index| segment_body(index, 100))
        .collect();
    assert_eq!(read_to_end(&mut reader).unwrap(), expected);
    assert_eq!(net.hits(&segment_url(1)), 3);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn hung_segment_is_dropped_after_segment_timeout_for_live_streams() {
    init_tracing();
    let net = MemoryNet::new();
    let source = VecSource::new(&net, &[100; 4]).live();
    net.delay(&segment_url(1), Duration::from_secs(3));

    let options = options().with_segment_timeout(Duration::from_millis(200));
    let mut reader = SegmentedStream::new(source, net.clone(), options).open().unwrap();

    let started = Instant::now();
    let expected: Vec<u8> = [0, 2, 3]
        .into_iter()
        .flat_map(|index| segment_body(index, 100))
        .collect();
    assert_eq!(read_to_end(&mut reader).unwrap(), expected);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn hung_segment_is_fatal_for_on_demand_streams() {
    init_tracing();
    let net = MemoryNet::new();
    let source = VecSource::new(&net, &[100; 3]);
    net.delay(&segment_url(1), Duration::from_secs(3));

    let options = options().with_segment_timeout(Duration::from_millis(200));
    let mut reader = SegmentedStream::new(source, net, options).open().unwrap();

    let started = Instant::now();
    let err = read_to_end(&mut reader).unwrap_err();
    assert!(
        matches!(err, StreamError::SegmentFetch { sequence: 1, source: NetError::Timeout }),
        "{err:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn a_retried_segment_is_not_duplicated() {
    let net = MemoryNet::new();
    let source = VecSource::new(&net, &[100; 3]);
    let expected = source.expected();
    net.fail(&segment_url(1), 2);

    let mut reader = SegmentedStream::new(source, net.clone(), options()).open().unwrap();
    assert_eq!(read_to_end(&mut reader).unwrap(), expected);
    assert_eq!(net.hits(&segment_url(1)), 3);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn encrypted_segments_are_decrypted_with_sequence_iv() {
    init_tracing();
    const KEY: [u8; 16] = *b"segflow-test-key";
    let key_url = Url::parse("http://media.test/key.bin").unwrap();
    let net = MemoryNet::new();
    let sizes = [1000, 33, 16, 512];
    let source = VecSource::new(&net, &sizes).encrypted(&key_url);
    let expected = source.expected();
    net.insert(&key_url, KEY.to_vec());
    for (index, &len) in sizes.iter().enumerate() {
        let cipher = encrypt_aes128_cbc(&segment_body(index, len), &KEY, &sequence_iv(index as u64));
        net.insert(&segment_url(index), cipher);
    }

    let mut reader = SegmentedStream::new(source, net.clone(), options()).open().unwrap();

    assert_eq!(read_to_end(&mut reader).unwrap(), expected);
    assert_eq!(net.hits(&key_url), 1);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn missing_key_is_fatal() {
    let key_url = Url::parse("http://media.test/missing.key").unwrap();
    let net = MemoryNet::new();
    let source = VecSource::new(&net, &[64]).encrypted(&key_url);
    let mut reader = SegmentedStream::new(source, net, options()).open().unwrap();

    let err = read_to_end(&mut reader).unwrap_err();
    assert!(matches!(err, StreamError::Decryption(_)), "{err:?}");
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn starved_read_times_out() {
    let net = MemoryNet::new();
    let options = options().with_read_timeout(Duration::from_millis(100));
    let mut reader = SegmentedStream::new(StalledSource, net, options).open().unwrap();

    assert_eq!(reader.read(10), Err(StreamError::ReadTimeout));
    // Recoverable: the stream is still open.
    assert_eq!(reader.state(), StreamState::Running);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn close_unblocks_writer_on_full_buffer() {
    init_tracing();
    let net = MemoryNet::new();
    let source = VecSource::new(&net, &[4096; 8]);
    let options = options().with_ringbuffer_size(256);
    let mut reader = SegmentedStream::new(source, net, options).open().unwrap();

    assert_eq!(reader.read(10).unwrap().len(), 10);
    reader.close();
    assert_eq!(reader.state(), StreamState::Closed);
    assert_eq!(reader.read(10), Err(StreamError::Closed));
    reader.close();
}

#[rstest]
#[timeout(Duration::from_secs(10))]
fn reader_metadata_and_io_read() {
    let net = MemoryNet::new();
    let source = VecSource::new(&net, &[50, 70]);
    let expected = source.expected();
    let mut reader = SegmentedStream::new(source, net, options()).open().unwrap();

    assert!(reader.supports_seek());
    assert_eq!(reader.content_length(), Some(120));
    assert_eq!(reader.content_type(), Some("video/mp2t"));

    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, expected);
}
