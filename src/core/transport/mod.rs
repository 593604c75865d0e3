//! Transport abstraction for concurrent HTTP requests
//!
//! A [`Transport`] owns a set of requests and advances all of them one
//! non-blocking tick at a time. Response bytes are pushed into a
//! [`TransferSink`] supplied by the caller on every [`Transport::step`], so
//! the sink always runs on the caller's thread.

use std::fmt;

use crate::core::error::Result;
use crate::core::planner::ByteRange;

pub mod http;
pub mod memory;

pub use http::HttpTransport;
pub use memory::{MemoryOptions, MemoryTransport};

/// Opaque handle for one request owned by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything a transport needs to issue one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub url: String,
    /// Sent as `Range: bytes=start-end` when present
    pub range: Option<ByteRange>,
    /// Ask for headers only (`HEAD`)
    pub header_only: bool,
    /// Deliver raw header lines to [`TransferSink::on_header`]
    pub deliver_headers: bool,
    /// Deliver body bytes to [`TransferSink::on_body`]
    pub deliver_body: bool,
}

impl RequestSpec {
    /// Header-discovery request for `url`
    pub fn header(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            range: None,
            header_only: true,
            deliver_headers: true,
            deliver_body: false,
        }
    }

    /// Body request for one byte range of `url`
    pub fn body_range(url: impl Into<String>, range: ByteRange) -> Self {
        Self {
            url: url.into(),
            range: Some(range),
            header_only: false,
            deliver_headers: false,
            deliver_body: true,
        }
    }
}

/// How a request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    /// Protocol or network failure, including non-success HTTP statuses
    Failed(String),
    /// The sink accepted fewer bytes than were delivered
    Aborted,
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Completed)
    }
}

/// Receiver for response data
///
/// `on_header` is called once per raw header line including its CRLF, and the
/// final blank line is delivered as `"\r\n"`. Returning fewer bytes than
/// delivered from either data callback aborts that request.
pub trait TransferSink {
    fn on_header(&mut self, id: RequestId, line: &[u8]) -> usize;

    fn on_body(&mut self, id: RequestId, data: &[u8]) -> usize;

    fn on_finished(&mut self, id: RequestId, outcome: &TransferOutcome) {
        let _ = (id, outcome);
    }
}

/// Descriptors a caller can wait on before the next step
///
/// `max_fd` is -1 when there is nothing to wait on; callers should then sleep
/// briefly instead of polling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    pub read: Vec<i32>,
    pub write: Vec<i32>,
    pub except: Vec<i32>,
    pub max_fd: i32,
}

impl Readiness {
    pub fn none() -> Self {
        Self {
            max_fd: -1,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max_fd < 0
    }
}

/// Multi-request engine driven by the caller's event loop
///
/// Created and dropped as a value; one transport per session.
pub trait Transport {
    /// Prepare a request without starting it. Fails if the URL is rejected.
    fn create_request(&mut self, spec: RequestSpec) -> Result<RequestId>;

    /// Release a request. Unknown ids are ignored.
    fn destroy_request(&mut self, id: RequestId);

    /// Start a prepared request
    fn add(&mut self, id: RequestId) -> Result<()>;

    /// Stop a request; any transfer still running is aborted
    fn remove(&mut self, id: RequestId) -> Result<()>;

    /// Advance every added request without blocking.
    ///
    /// Returns how many added requests have not finished yet.
    fn step(&mut self, sink: &mut dyn TransferSink) -> Result<usize>;

    fn readiness(&self) -> Readiness;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn create_request(&mut self, spec: RequestSpec) -> Result<RequestId> {
        (**self).create_request(spec)
    }

    fn destroy_request(&mut self, id: RequestId) {
        (**self).destroy_request(id)
    }

    fn add(&mut self, id: RequestId) -> Result<()> {
        (**self).add(id)
    }

    fn remove(&mut self, id: RequestId) -> Result<()> {
        (**self).remove(id)
    }

    fn step(&mut self, sink: &mut dyn TransferSink) -> Result<usize> {
        (**self).step(sink)
    }

    fn readiness(&self) -> Readiness {
        (**self).readiness()
    }
}
