//! Source resolution for rangefetch
//!
//! Maps a URL onto the content handler that serves it. Only chunked media
//! fetching over HTTP(S) exists today.

use crate::core::config::FetchConfig;
use crate::core::error::{Error, Result};
use crate::core::session::{Session, SessionState};
use crate::core::transport::{HttpTransport, Readiness};

/// Content handler kinds a URL can resolve to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Parallel byte-range fetch of a remote resource
    Media,
}

/// An open content handler
#[derive(Debug)]
pub enum Source {
    Media(Session<HttpTransport>),
}

impl Source {
    /// Classify `url` and start the matching handler
    pub fn open(url: &str, config: FetchConfig) -> Result<Self> {
        match classify(url)? {
            SourceKind::Media => {
                let transport = HttpTransport::new(&config.transport)?;
                Ok(Source::Media(Session::create(url, transport, config)?))
            }
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Media(_) => SourceKind::Media,
        }
    }

    pub fn step(&mut self) -> Result<usize> {
        match self {
            Source::Media(session) => session.step(),
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Source::Media(session) => session.read(buf),
        }
    }

    pub fn readiness(&self) -> Readiness {
        match self {
            Source::Media(session) => session.readiness(),
        }
    }

    pub fn destroy(&mut self) {
        match self {
            Source::Media(session) => session.destroy(),
        }
    }

    pub fn is_drained(&self) -> bool {
        match self {
            Source::Media(session) => session.is_drained(),
        }
    }

    pub fn state(&self) -> &SessionState {
        match self {
            Source::Media(session) => session.state(),
        }
    }

    pub fn content_length(&self) -> u64 {
        match self {
            Source::Media(session) => session.content_length(),
        }
    }
}

/// Decide which handler serves `url`
pub fn classify(url: &str) -> Result<SourceKind> {
    let parsed = reqwest::Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(SourceKind::Media),
        scheme => Err(Error::InvalidUrl(format!(
            "{url}: unsupported scheme '{scheme}'"
        ))),
    }
}

/// Generates output filename from the last path segment of a URL
pub fn resolve_output_filename(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "index.html".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_http_schemes() {
        assert_eq!(classify("http://example.com/a.ts").unwrap(), SourceKind::Media);
        assert_eq!(classify("https://example.com/a.ts").unwrap(), SourceKind::Media);
    }

    #[test]
    fn test_classify_rejects_other_schemes() {
        assert!(matches!(
            classify("file:///etc/passwd"),
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(classify("no scheme"), Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_resolve_output_filename() {
        assert_eq!(
            resolve_output_filename("https://cdn.example.com/media/movie.mp4"),
            "movie.mp4"
        );
        assert_eq!(
            resolve_output_filename("https://cdn.example.com/media/movie.mp4?token=1"),
            "movie.mp4"
        );
        assert_eq!(resolve_output_filename("https://cdn.example.com/"), "index.html");
        assert_eq!(resolve_output_filename("https://cdn.example.com"), "index.html");
        assert_eq!(resolve_output_filename("garbage"), "index.html");
    }

    #[test]
    fn test_open_rejects_unsupported_url() {
        assert!(matches!(
            Source::open("ftp://example.com/file", FetchConfig::default()),
            Err(Error::InvalidUrl(_))
        ));
    }
}
