#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc, thread, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use segflow_net::{ByteStream, Headers, Net, NetError, NetResult, RangeSpec};
use segflow_stream::{Segment, SegmentKey, SegmentSource, SourceInfo, SourceStep, StreamResult};
use url::Url;

#[derive(Default)]
struct Entry {
    body: Bytes,
    delay: Option<Duration>,
    failures: usize,
}

/// In-memory `Net` serving registered URLs.
#[derive(Default)]
pub struct MemoryNet {
    entries: Mutex<HashMap<Url, Entry>>,
    hits: Mutex<HashMap<Url, usize>>,
}

impl MemoryNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, url: &Url, body: impl Into<Bytes>) {
        self.entries.lock().insert(
            url.clone(),
            Entry {
                body: body.into(),
                ..Entry::default()
            },
        );
    }

    pub fn delay(&self, url: &Url, delay: Duration) {
        if let Some(entry) = self.entries.lock().get_mut(url) {
            entry.delay = Some(delay);
        }
    }

    /// Fail the next `count` requests with a 503.
    pub fn fail(&self, url: &Url, count: usize) {
        if let Some(entry) = self.entries.lock().get_mut(url) {
            entry.failures = count;
        }
    }

    pub fn hits(&self, url: &Url) -> usize {
        self.hits.lock().get(url).copied().unwrap_or(0)
    }

    fn body(&self, url: &Url) -> NetResult<Bytes> {
        *self.hits.lock().entry(url.clone()).or_default() += 1;
        let (body, delay) = {
            let mut entries = self.entries.lock();
            let entry = entries
                .get_mut(url)
                .ok_or_else(|| NetError::http_status(404, url.to_string()))?;
            if entry.failures > 0 {
                entry.failures -= 1;
                return Err(NetError::http_status(503, url.to_string()));
            }
            (entry.body.clone(), entry.delay)
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        Ok(body)
    }
}

impl Net for MemoryNet {
    fn get_bytes(&self, url: Url, _headers: Option<Headers>) -> NetResult<Bytes> {
        self.body(&url)
    }

    fn stream(&self, url: Url, _headers: Option<Headers>) -> NetResult<ByteStream> {
        Ok(ByteStream::from_bytes(self.body(&url)?).with_chunk_size(7))
    }

    fn get_range(&self, url: Url, range: RangeSpec, _headers: Option<Headers>) -> NetResult<ByteStream> {
        let body = self.body(&url)?;
        let start = usize::try_from(range.start).unwrap_or(usize::MAX).min(body.len());
        let end = range
            .end
            .map_or(body.len(), |end| usize::try_from(end + 1).unwrap_or(usize::MAX).min(body.len()));
        Ok(ByteStream::from_bytes(body.slice(start..end)).with_chunk_size(7))
    }

    fn head(&self, url: Url, _headers: Option<Headers>) -> NetResult<Headers> {
        let body = self.body(&url)?;
        let mut headers = Headers::new();
        headers.insert("content-length", body.len().to_string());
        Ok(headers)
    }
}

pub fn segment_url(index: usize) -> Url {
    Url::parse(&format!("http://media.test/seg{index}.ts")).unwrap()
}

/// Distinct, recognisable content for segment `index`.
pub fn segment_body(index: usize, len: usize) -> Vec<u8> {
    (0..len).map(|i| ((index * 31 + i) % 251) as u8).collect()
}

/// Finite list of segments with a cumulative byte index.
pub struct VecSource {
    segments: Vec<(Segment, u64)>,
    next: usize,
    live: bool,
    seekable: bool,
}

impl VecSource {
    pub fn new(net: &MemoryNet, sizes: &[usize]) -> Self {
        let count = sizes.len();
        let segments = sizes
            .iter()
            .enumerate()
            .map(|(index, &len)| {
                let url = segment_url(index);
                net.insert(&url, segment_body(index, len));
                let segment = Segment::new(url, index as u64).last(index + 1 == count);
                (segment, len as u64)
            })
            .collect();
        Self {
            segments,
            next: 0,
            live: false,
            seekable: true,
        }
    }

    pub fn live(mut self) -> Self {
        self.live = true;
        self.seekable = false;
        self
    }

    pub fn not_seekable(mut self) -> Self {
        self.seekable = false;
        self
    }

    pub fn encrypted(mut self, key_url: &Url) -> Self {
        for (segment, _) in &mut self.segments {
            segment.key = Some(SegmentKey::new(key_url.clone(), None));
        }
        self
    }

    pub fn expected(&self) -> Vec<u8> {
        (0..self.segments.len())
            .flat_map(|index| segment_body(index, self.segments[index].1 as usize))
            .collect()
    }
}

impl SegmentSource for VecSource {
    fn next_step(&mut self) -> StreamResult<SourceStep> {
        let Some((segment, _)) = self.segments.get(self.next) else {
            return Ok(SourceStep::End);
        };
        self.next += 1;
        Ok(SourceStep::Segment(segment.clone()))
    }

    fn seek(&mut self, position: u64) -> StreamResult<u64> {
        let mut start = 0;
        for (index, (_, len)) in self.segments.iter().enumerate() {
            if position < start + len {
                self.next = index;
                return Ok(position - start);
            }
            start += len;
        }
        Err(segflow_stream::StreamError::InvalidSeek {
            position,
            length: Some(start),
        })
    }

    fn info(&self) -> SourceInfo {
        SourceInfo {
            supports_seek: self.seekable,
            content_length: Some(self.segments.iter().map(|(_, len)| len).sum()),
            duration: None,
            content_type: Some("video/mp2t".to_owned()),
            is_live: self.live,
        }
    }
}

/// Live source that never produces anything.
pub struct StalledSource;

impl SegmentSource for StalledSource {
    fn next_step(&mut self) -> StreamResult<SourceStep> {
        Ok(SourceStep::Wait(Duration::from_millis(50)))
    }

    fn info(&self) -> SourceInfo {
        SourceInfo {
            is_live: true,
            ..SourceInfo::default()
        }
    }
}

pub fn read_to_end(reader: &mut segflow_stream::StreamReader) -> StreamResult<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let chunk = reader.read(4096)?;
        if chunk.is_empty() {
            return Ok(out);
        }
        out.extend_from_slice(&chunk);
    }
}

pub fn read_exact(reader: &mut segflow_stream::StreamReader, len: usize) -> StreamResult<Vec<u8>> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let chunk = reader.read(len - out.len())?;
        if chunk.is_empty() {
            break;
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}
