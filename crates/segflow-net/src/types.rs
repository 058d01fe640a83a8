use std::{cmp::min, collections::HashMap, time::Duration};

use crate::{NetError, NetResult};

/// Header map with lowercase keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.inner
            .insert(key.into().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Entries of `other` override ours.
    pub fn merged(&self, other: Option<&Headers>) -> Headers {
        let mut out = self.clone();
        if let Some(other) = other {
            out.inner
                .extend(other.inner.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length")?.trim().parse().ok()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get("content-type")
    }
}

impl From<HashMap<String, String>> for Headers {
    fn from(map: HashMap<String, String>) -> Self {
        let mut headers = Self::new();
        for (k, v) in map {
            headers.insert(k, v);
        }
        headers
    }
}

/// Inclusive byte range as sent in a `Range` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

impl RangeSpec {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn from_start(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Range of `len` bytes starting at `start`.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidRange`] for an empty range.
    pub fn with_len(start: u64, len: u64) -> NetResult<Self> {
        if len == 0 {
            return Err(NetError::InvalidRange(format!("bytes={start}- (empty)")));
        }
        Ok(Self::new(start, Some(start + len - 1)))
    }

    /// Number of bytes covered, if bounded.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_sub(self.start) + 1)
    }

    pub fn to_header_value(&self) -> String {
        if let Some(end) = self.end {
            format!("bytes={}-{}", self.start, end)
        } else {
            format!("bytes={}-", self.start)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponential_delay = self.base_delay * 2_u32.pow(attempt.saturating_sub(1).min(16));
        min(exponential_delay, self.max_delay)
    }
}

#[derive(Clone, Debug)]
pub struct NetOptions {
    /// Whole-request bound for `get_bytes` and `head`.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Whole-request bound for streamed bodies. `None` streams without limit.
    pub stream_timeout: Option<Duration>,
    pub retry_policy: RetryPolicy,
    /// Max idle connections per host. Set to 0 to disable pooling and reduce memory.
    pub pool_max_idle_per_host: usize,
    /// Sent with every request.
    pub headers: Headers,
    pub user_agent: Option<String>,
    /// Read size used when draining streamed bodies.
    pub chunk_size: usize,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            stream_timeout: None,
            retry_policy: RetryPolicy::default(),
            pool_max_idle_per_host: 0,
            headers: Headers::new(),
            user_agent: None,
            chunk_size: 8192,
        }
    }
}
