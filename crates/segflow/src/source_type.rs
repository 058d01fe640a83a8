#![forbid(unsafe_code)]

//! Detected source type from URL analysis.

use url::Url;

use crate::{MediaError, MediaResult};

/// Detected source type from URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceType {
    /// Plain HTTP resource, fetched in ranges when possible.
    Http(Url),
    /// HLS media playlist.
    Hls(Url),
}

impl SourceType {
    /// Detect source type from a URL string.
    ///
    /// - `hls://` prefix or a path ending with `.m3u8` -> HLS
    /// - `httpstream://` prefix or anything else -> HTTP
    ///
    /// Prefixed URLs without a scheme of their own get `http://`.
    ///
    /// # Errors
    ///
    /// [`MediaError::InvalidUrl`] if the URL does not parse.
    pub fn detect(url: &str) -> MediaResult<Self> {
        let url = url.trim();
        if let Some(rest) = url.strip_prefix("hls://") {
            return Ok(Self::Hls(parse(rest)?));
        }
        if let Some(rest) = url.strip_prefix("httpstream://") {
            return Ok(Self::Http(parse(rest)?));
        }

        let parsed = parse(url)?;
        if parsed.path().ends_with(".m3u8") {
            Ok(Self::Hls(parsed))
        } else {
            Ok(Self::Http(parsed))
        }
    }

    pub fn url(&self) -> &Url {
        match self {
            Self::Http(url) | Self::Hls(url) => url,
        }
    }
}

fn parse(url: &str) -> MediaResult<Url> {
    let with_scheme = if url.contains("://") {
        url.to_owned()
    } else {
        format!("http://{url}")
    };
    Url::parse(&with_scheme).map_err(|e| MediaError::InvalidUrl(format!("{url}: {e}")))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("https://cdn.test/live/index.m3u8", "hls", "https://cdn.test/live/index.m3u8")]
    #[case("https://cdn.test/live/index.m3u8?token=1", "hls", "https://cdn.test/live/index.m3u8?token=1")]
    #[case("hls://cdn.test/live/playlist", "hls", "http://cdn.test/live/playlist")]
    #[case("hls://https://cdn.test/a", "hls", "https://cdn.test/a")]
    #[case("http://cdn.test/video.mp4", "http", "http://cdn.test/video.mp4")]
    #[case("httpstream://cdn.test/video.flv", "http", "http://cdn.test/video.flv")]
    fn detects_source_type(#[case] input: &str, #[case] kind: &str, #[case] url: &str) {
        let detected = SourceType::detect(input).unwrap();
        let actual_kind = match detected {
            SourceType::Http(_) => "http",
            SourceType::Hls(_) => "hls",
        };
        assert_eq!(actual_kind, kind);
        assert_eq!(detected.url().as_str(), url);
    }

    #[rstest]
    fn rejects_garbage() {
        assert!(matches!(
            SourceType::detect("http://[::1"),
            Err(MediaError::InvalidUrl(_))
        ));
    }
}
