use std::{ops::Range, sync::Arc, time::Duration};

use rstest::rstest;
use segflow_hls::{HlsStream, NameKey};
use segflow_net::{HttpClient, Net, NetOptions};
use segflow_stream::{StreamOptions, StreamReader};
use segflow_test_utils::{
    MediaServer, MediaServerBuilder, encrypt_aes128_cbc, init_tracing, payload, sequence_iv,
};

const SEGMENT_LEN: usize = 1000;
const KEY: [u8; 16] = *b"0123456789abcdef";

fn net() -> Arc<dyn Net> {
    Arc::new(HttpClient::new(NetOptions::default()).unwrap())
}

fn options() -> StreamOptions {
    StreamOptions::new()
        .with_read_timeout(Duration::from_secs(5))
        .with_seek_timeout(Duration::from_secs(5))
}

fn segment_body(sequence: u64) -> Vec<u8> {
    payload(SEGMENT_LEN)
        .into_iter()
        .map(|b| b.wrapping_add(sequence as u8))
        .collect()
}

fn media_playlist(first: u64, count: u64, target: u64, tail: &str) -> String {
    let mut text = format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:{target}\n#EXT-X-MEDIA-SEQUENCE:{first}\n"
    );
    for sequence in first..first + count {
        text.push_str(&format!("#EXTINF:{target}.0,\nseg{sequence}.ts\n"));
    }
    text.push_str(tail);
    text
}

fn with_segments(mut builder: MediaServerBuilder, sequences: Range<u64>) -> MediaServerBuilder {
    for sequence in sequences {
        let path = format!("/seg{sequence}.ts");
        builder = builder
            .file(&path, segment_body(sequence))
            .content_type(&path, "video/mp2t");
    }
    builder
}

fn expected(sequences: Range<u64>) -> Vec<u8> {
    sequences.flat_map(segment_body).collect()
}

fn read_all(reader: &mut StreamReader) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let chunk = reader.read(1500).unwrap();
        if chunk.is_empty() {
            return out;
        }
        out.extend_from_slice(&chunk);
    }
}

fn vod_server() -> MediaServer {
    init_tracing();
    let playlist = media_playlist(0, 4, 4, "#EXT-X-PLAYLIST-TYPE:VOD\n#EXT-X-ENDLIST\n");
    with_segments(MediaServer::builder(), 0..4)
        .file("/vod.m3u8", playlist)
        .build()
}

#[rstest]
#[timeout(Duration::from_secs(20))]
fn vod_playlist_streams_all_segments() {
    let server = vod_server();
    let stream = HlsStream::new(server.url("/vod.m3u8"), net(), options());
    let mut reader = stream.open().unwrap();

    assert!(reader.supports_seek());
    assert_eq!(reader.content_length(), Some(4 * SEGMENT_LEN as u64));
    assert_eq!(reader.duration(), Some(Duration::from_secs(16)));
    assert_eq!(reader.content_type(), Some("video/mp2t"));
    assert_eq!(read_all(&mut reader), expected(0..4));
}

#[rstest]
#[timeout(Duration::from_secs(20))]
fn vod_playlist_seeks_into_a_segment() {
    let server = vod_server();
    let stream = HlsStream::new(server.url("/vod.m3u8"), net(), options());
    let mut reader = stream.open().unwrap();
    let all = expected(0..4);

    let head = reader.read(200).unwrap();
    assert_eq!(&head[..], &all[..head.len()]);

    reader.seek(2500).unwrap();
    assert_eq!(read_all(&mut reader), &all[2500..]);

    reader.seek(10).unwrap();
    assert_eq!(read_all(&mut reader), &all[10..]);
}

#[rstest]
#[timeout(Duration::from_secs(20))]
fn encrypted_segments_are_decrypted() {
    init_tracing();
    let mut playlist = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:5\n");
    playlist.push_str("#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n");
    let mut builder = MediaServer::builder().file("/key.bin", KEY.to_vec());
    for sequence in 5..8 {
        playlist.push_str(&format!("#EXTINF:4.0,\nseg{sequence}.ts\n"));
        let body = encrypt_aes128_cbc(&segment_body(sequence), &KEY, &sequence_iv(sequence));
        builder = builder.file(&format!("/seg{sequence}.ts"), body);
    }
    playlist.push_str("#EXT-X-ENDLIST\n");
    let server = builder.file("/enc.m3u8", playlist).build();

    let stream = HlsStream::new(server.url("/enc.m3u8"), net(), options());
    let mut reader = stream.open().unwrap();

    assert!(!reader.supports_seek());
    assert_eq!(read_all(&mut reader), expected(5..8));
    assert_eq!(server.hits("/key.bin"), 1);
}

#[rstest]
#[timeout(Duration::from_secs(20))]
fn encrypted_vod_playlist_seeks_by_plaintext_offset() {
    init_tracing();
    let mut playlist = String::from(
        "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-PLAYLIST-TYPE:VOD\n#EXT-X-MEDIA-SEQUENCE:0\n",
    );
    playlist.push_str("#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n");
    let mut builder = MediaServer::builder().file("/key.bin", KEY.to_vec());
    for sequence in 0..3 {
        playlist.push_str(&format!("#EXTINF:4.0,\nseg{sequence}.ts\n"));
        let body = encrypt_aes128_cbc(&segment_body(sequence), &KEY, &sequence_iv(sequence));
        assert_eq!(body.len(), 1008);
        builder = builder.file(&format!("/seg{sequence}.ts"), body);
    }
    playlist.push_str("#EXT-X-ENDLIST\n");
    let server = builder.file("/enc-vod.m3u8", playlist).build();

    let stream = HlsStream::new(server.url("/enc-vod.m3u8"), net(), options());
    let mut reader = stream.open().unwrap();
    let all = expected(0..3);

    assert!(reader.supports_seek());
    assert_eq!(reader.content_length(), Some(3 * SEGMENT_LEN as u64));

    reader.seek(2100).unwrap();
    assert_eq!(read_all(&mut reader), &all[2100..]);

    reader.seek(999).unwrap();
    assert_eq!(read_all(&mut reader), &all[999..]);
}

#[rstest]
#[timeout(Duration::from_secs(20))]
fn live_playlist_starts_at_edge_and_follows_reloads() {
    init_tracing();
    let server = with_segments(MediaServer::builder(), 0..6)
        .file("/live.m3u8", media_playlist(0, 5, 1, ""))
        .build();

    let stream = HlsStream::new(
        server.url("/live.m3u8"),
        net(),
        options().with_hls_live_edge(2),
    );
    let mut reader = stream.open().unwrap();
    assert!(!reader.supports_seek());

    let mut out = Vec::new();
    while out.len() < 2 * SEGMENT_LEN {
        out.extend_from_slice(&reader.read(SEGMENT_LEN).unwrap());
    }
    assert_eq!(out, expected(3..5));

    server.set_body("/live.m3u8", media_playlist(1, 5, 1, "#EXT-X-ENDLIST\n"));
    assert_eq!(read_all(&mut reader), expected(5..6));
    assert_eq!(server.hits("/seg0.ts"), 0);
    assert!(server.hits("/live.m3u8") >= 2);
}

#[rstest]
#[timeout(Duration::from_secs(20))]
fn byte_range_playlist_reads_ranges_of_one_file() {
    init_tracing();
    let body = payload(3000);
    let playlist = "#EXTM3U
#EXT-X-VERSION:4
#EXT-X-TARGETDURATION:2
#EXT-X-PLAYLIST-TYPE:VOD
#EXTINF:2.0,
#EXT-X-BYTERANGE:1200@0
all.ts
#EXTINF:2.0,
#EXT-X-BYTERANGE:1200
all.ts
#EXTINF:2.0,
#EXT-X-BYTERANGE:600
all.ts
#EXT-X-ENDLIST
";
    let server = MediaServer::builder()
        .file("/all.ts", body.clone())
        .file("/ranges.m3u8", playlist)
        .build();

    let stream = HlsStream::new(server.url("/ranges.m3u8"), net(), options());
    let mut reader = stream.open().unwrap();

    assert_eq!(reader.content_length(), Some(3000));
    assert_eq!(read_all(&mut reader), body);
    let mut ranges = server.ranges("/all.ts");
    ranges.sort();
    assert_eq!(ranges, vec!["bytes=0-1199", "bytes=1200-2399", "bytes=2400-2999"]);
}

#[rstest]
#[timeout(Duration::from_secs(20))]
fn master_playlist_is_not_playable() {
    init_tracing();
    let server = MediaServer::builder()
        .file(
            "/master.m3u8",
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\nlow.m3u8\n",
        )
        .build();
    let stream = HlsStream::new(server.url("/master.m3u8"), net(), options());
    let err = stream.open().unwrap_err();
    assert!(err.to_string().contains("variant playlist"), "{err}");
}

#[rstest]
#[timeout(Duration::from_secs(20))]
fn variants_are_listed_and_playable() {
    init_tracing();
    let master = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1280x720
vod.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
low.m3u8
";
    let playlist = media_playlist(0, 4, 4, "#EXT-X-PLAYLIST-TYPE:VOD\n#EXT-X-ENDLIST\n");
    let server = with_segments(MediaServer::builder(), 0..4)
        .file("/vod.m3u8", playlist)
        .file("/master.m3u8", master)
        .build();

    let variants = HlsStream::parse_variant_playlist(
        &server.url("/master.m3u8"),
        net(),
        options(),
        NameKey::Bitrate,
    )
    .unwrap();
    let names: Vec<_> = variants.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["2000k", "800k"]);

    let mut reader = variants[0].stream.open().unwrap();
    assert_eq!(read_all(&mut reader), expected(0..4));
}
