//! Static file server with byte-range support and failure injection.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::Response,
};
use bytes::Bytes;
use parking_lot::Mutex;
use url::Url;

use crate::TestHttpServer;

#[derive(Clone, Default)]
struct Route {
    body: Bytes,
    content_type: Option<String>,
    /// Remaining GET requests answered with 503.
    fail_next: usize,
    /// Answer every request with this status instead.
    status: Option<StatusCode>,
    delay: Duration,
    /// Omit `Content-Length` from HEAD responses.
    hide_length: bool,
}

#[derive(Default)]
struct ServerState {
    routes: Mutex<HashMap<String, Route>>,
    hits: Mutex<HashMap<String, usize>>,
    ranges: Mutex<Vec<(String, String)>>,
}

/// Builder for [`MediaServer`].
#[derive(Default)]
pub struct MediaServerBuilder {
    routes: HashMap<String, Route>,
}

impl MediaServerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn file(mut self, path: &str, body: impl Into<Bytes>) -> Self {
        self.routes.entry(path.to_owned()).or_default().body = body.into();
        self
    }

    #[must_use]
    pub fn content_type(mut self, path: &str, content_type: &str) -> Self {
        self.routes.entry(path.to_owned()).or_default().content_type =
            Some(content_type.to_owned());
        self
    }

    /// Answer the first `count` GET requests for `path` with 503.
    #[must_use]
    pub fn failing(mut self, path: &str, count: usize) -> Self {
        self.routes.entry(path.to_owned()).or_default().fail_next = count;
        self
    }

    /// Answer every request for `path` with `status`.
    #[must_use]
    pub fn status(mut self, path: &str, status: u16) -> Self {
        self.routes.entry(path.to_owned()).or_default().status =
            StatusCode::from_u16(status).ok();
        self
    }

    #[must_use]
    pub fn delayed(mut self, path: &str, delay: Duration) -> Self {
        self.routes.entry(path.to_owned()).or_default().delay = delay;
        self
    }

    #[must_use]
    pub fn hide_length(mut self, path: &str) -> Self {
        self.routes.entry(path.to_owned()).or_default().hide_length = true;
        self
    }

    #[must_use]
    pub fn build(self) -> MediaServer {
        let state = Arc::new(ServerState {
            routes: Mutex::new(self.routes),
            ..ServerState::default()
        });
        let router = Router::new()
            .fallback(serve)
            .with_state(Arc::clone(&state));
        MediaServer {
            server: TestHttpServer::new(router),
            state,
        }
    }
}

/// HTTP server for media fixtures: playlists, segments, keys, plain files.
pub struct MediaServer {
    server: TestHttpServer,
    state: Arc<ServerState>,
}

impl MediaServer {
    #[must_use]
    pub fn builder() -> MediaServerBuilder {
        MediaServerBuilder::new()
    }

    #[must_use]
    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }

    /// Requests (any method) received for `path`.
    #[must_use]
    pub fn hits(&self, path: &str) -> usize {
        self.state.hits.lock().get(path).copied().unwrap_or(0)
    }

    /// `Range` headers received for `path`, in arrival order.
    #[must_use]
    pub fn ranges(&self, path: &str) -> Vec<String> {
        self.state
            .ranges
            .lock()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Replace the body served at `path`, e.g. to advance a live playlist.
    pub fn set_body(&self, path: &str, body: impl Into<Bytes>) {
        self.state
            .routes
            .lock()
            .entry(path.to_owned())
            .or_default()
            .body = body.into();
    }
}

fn parse_range(value: &str, len: usize) -> Option<(usize, usize)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: usize = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => len.checked_sub(1)?,
        end => end.parse::<usize>().ok()?.min(len.checked_sub(1)?),
    };
    (start <= end).then_some((start, end))
}

async fn serve(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = uri.path().to_owned();
    *state.hits.lock().entry(path.clone()).or_insert(0) += 1;

    let route = {
        let mut routes = state.routes.lock();
        let Some(route) = routes.get_mut(&path) else {
            return status_only(StatusCode::NOT_FOUND);
        };
        let snapshot = route.clone();
        if method == Method::GET && route.fail_next > 0 {
            route.fail_next -= 1;
        }
        snapshot
    };

    if !route.delay.is_zero() {
        tokio::time::sleep(route.delay).await;
    }
    if let Some(status) = route.status {
        return status_only(status);
    }
    if method == Method::GET && route.fail_next > 0 {
        return status_only(StatusCode::SERVICE_UNAVAILABLE);
    }

    let total = route.body.len();
    let mut builder = Response::builder().header(header::ACCEPT_RANGES, "bytes");
    if let Some(content_type) = &route.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type.as_str());
    }

    if method == Method::HEAD {
        if !route.hide_length {
            builder = builder.header(header::CONTENT_LENGTH, total);
        }
        return builder
            .status(StatusCode::OK)
            .body(Body::empty())
            .expect("build HEAD response");
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let Some(range) = range else {
        return builder
            .status(StatusCode::OK)
            .body(Body::from(route.body))
            .expect("build response");
    };
    state.ranges.lock().push((path, range.clone()));

    match parse_range(&range, total) {
        Some((start, end)) => builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{total}"))
            .body(Body::from(route.body.slice(start..=end)))
            .expect("build range response"),
        None => builder
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{total}"))
            .body(Body::empty())
            .expect("build 416 response"),
    }
}

fn status_only(status: StatusCode) -> Response {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .expect("build status response")
}
