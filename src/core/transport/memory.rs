//! In-memory transport serving one resource deterministically
//!
//! Each step delivers at most one slice per active request, in request order.
//! Useful for simulation and for exercising the orchestrator without a
//! network.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Readiness, RequestId, RequestSpec, TransferOutcome, TransferSink, Transport};
use crate::core::error::{Error, Result};

/// Behaviour knobs for [`MemoryTransport`]
#[derive(Debug, Clone)]
pub struct MemoryOptions {
    /// Body bytes delivered per request per step
    pub slice_size: usize,
    /// Whether the header response carries `Content-Length`
    pub send_content_length: bool,
    /// Extra header lines, without CRLF
    pub extra_headers: Vec<String>,
    /// Status of the header response; anything outside 2xx fails the request
    pub header_status: u16,
    /// 1-based step number on which `step` reports a hard error
    pub fail_on_step: Option<usize>,
    /// `(start, kept)`: the range starting at `start` delivers only `kept`
    /// bytes, then completes
    pub truncate_range: Option<(u64, u64)>,
    /// `(start, extra)`: the range starting at `start` runs `extra` bytes
    /// past its end, as a server ignoring the range end would
    pub overrun_range: Option<(u64, u64)>,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            slice_size: 64 * 1024,
            send_content_length: true,
            extra_headers: vec!["Accept-Ranges: bytes".to_string()],
            header_status: 200,
            fail_on_step: None,
            truncate_range: None,
            overrun_range: None,
        }
    }
}

/// Lifetime counters, shared so they stay observable after the transport moves
#[derive(Debug, Default)]
pub struct MemoryCounters {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub added: AtomicUsize,
    pub removed: AtomicUsize,
    pub steps: AtomicUsize,
}

impl MemoryCounters {
    /// Requests created and not yet destroyed
    pub fn outstanding(&self) -> usize {
        self.created
            .load(Ordering::SeqCst)
            .saturating_sub(self.destroyed.load(Ordering::SeqCst))
    }
}

#[derive(Debug)]
struct MemoryRequest {
    spec: RequestSpec,
    added: bool,
    finished: bool,
    header_lines: VecDeque<Vec<u8>>,
    /// Next absolute body offset to deliver
    position: u64,
    /// Exclusive end of the body slice to deliver
    end: u64,
    failure: Option<String>,
}

/// Deterministic transport over an in-memory body
#[derive(Debug)]
pub struct MemoryTransport {
    url: String,
    body: Arc<Vec<u8>>,
    options: MemoryOptions,
    requests: BTreeMap<RequestId, MemoryRequest>,
    next_id: u64,
    counters: Arc<MemoryCounters>,
}

impl MemoryTransport {
    pub fn new(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self::with_options(url, body, MemoryOptions::default())
    }

    pub fn with_options(url: impl Into<String>, body: Vec<u8>, options: MemoryOptions) -> Self {
        Self {
            url: url.into(),
            body: Arc::new(body),
            options,
            requests: BTreeMap::new(),
            next_id: 1,
            counters: Arc::new(MemoryCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<MemoryCounters> {
        Arc::clone(&self.counters)
    }

    /// Requests currently held, whether added or not
    pub fn live_requests(&self) -> usize {
        self.requests.len()
    }

    fn header_lines(&self) -> VecDeque<Vec<u8>> {
        let mut lines = VecDeque::new();
        lines.push_back(format!("HTTP/1.1 {} OK\r\n", self.options.header_status).into_bytes());
        if self.options.send_content_length {
            lines.push_back(format!("Content-Length: {}\r\n", self.body.len()).into_bytes());
        }
        for header in &self.options.extra_headers {
            lines.push_back(format!("{header}\r\n").into_bytes());
        }
        lines.push_back(b"\r\n".to_vec());
        lines
    }

    fn build_request(&self, spec: RequestSpec) -> MemoryRequest {
        let total = self.body.len() as u64;
        let mut failure = None;
        let mut header_lines = VecDeque::new();

        if spec.url != self.url {
            failure = Some("HTTP 404 Not Found".to_string());
        } else if spec.header_only && !(200..300).contains(&self.options.header_status) {
            failure = Some(format!("HTTP {}", self.options.header_status));
        } else if spec.header_only {
            header_lines = self.header_lines();
        }

        let (position, end) = match (spec.header_only, spec.range) {
            (true, _) => (0, 0),
            (false, None) => (0, total),
            (false, Some(range)) => {
                if range.start >= total && failure.is_none() {
                    failure = Some("HTTP 416 Range Not Satisfiable".to_string());
                }
                let mut end = range.end.saturating_add(1);
                if let Some((start, extra)) = self.options.overrun_range {
                    if start == range.start {
                        end = end.saturating_add(extra);
                    }
                }
                if let Some((start, kept)) = self.options.truncate_range {
                    if start == range.start {
                        end = end.min(range.start.saturating_add(kept));
                    }
                }
                (range.start.min(total), end.min(total))
            }
        };

        MemoryRequest {
            spec,
            added: false,
            finished: false,
            header_lines,
            position,
            end,
            failure,
        }
    }
}

impl Transport for MemoryTransport {
    fn create_request(&mut self, spec: RequestSpec) -> Result<RequestId> {
        reqwest::Url::parse(&spec.url).map_err(|e| Error::InvalidUrl(format!("{}: {e}", spec.url)))?;

        let id = RequestId(self.next_id);
        self.next_id += 1;
        let request = self.build_request(spec);
        self.requests.insert(id, request);
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn destroy_request(&mut self, id: RequestId) {
        if self.requests.remove(&id).is_some() {
            self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn add(&mut self, id: RequestId) -> Result<()> {
        let request = self
            .requests
            .get_mut(&id)
            .ok_or_else(|| Error::TransportError(format!("unknown request {id}")))?;
        request.added = true;
        self.counters.added.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&mut self, id: RequestId) -> Result<()> {
        let request = self
            .requests
            .get_mut(&id)
            .ok_or_else(|| Error::TransportError(format!("unknown request {id}")))?;
        if request.added {
            request.added = false;
            self.counters.removed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn step(&mut self, sink: &mut dyn TransferSink) -> Result<usize> {
        let step = self.counters.steps.fetch_add(1, Ordering::SeqCst) + 1;
        if self.options.fail_on_step == Some(step) {
            return Err(Error::TransportError(format!("simulated failure on step {step}")));
        }

        let slice_size = self.options.slice_size.max(1) as u64;
        let body = Arc::clone(&self.body);
        let mut active = 0;

        for (&id, request) in self.requests.iter_mut() {
            if !request.added || request.finished {
                continue;
            }

            if let Some(reason) = request.failure.take() {
                request.finished = true;
                sink.on_finished(id, &TransferOutcome::Failed(reason));
                continue;
            }

            let mut aborted = false;
            while let Some(line) = request.header_lines.pop_front() {
                if request.spec.deliver_headers && sink.on_header(id, &line) < line.len() {
                    aborted = true;
                    break;
                }
            }

            if !aborted && request.position < request.end {
                let stop = (request.position + slice_size).min(request.end);
                let chunk = &body[request.position as usize..stop as usize];
                request.position = stop;
                if request.spec.deliver_body && sink.on_body(id, chunk) < chunk.len() {
                    aborted = true;
                }
            }

            if aborted {
                request.finished = true;
                sink.on_finished(id, &TransferOutcome::Aborted);
            } else if request.header_lines.is_empty() && request.position >= request.end {
                request.finished = true;
                sink.on_finished(id, &TransferOutcome::Completed);
            } else {
                active += 1;
            }
        }

        Ok(active)
    }

    fn readiness(&self) -> Readiness {
        Readiness::none()
    }
}
