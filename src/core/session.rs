//! Download orchestration
//!
//! A [`Session`] discovers the resource length with a header request, then
//! fetches the body in waves of parallel range requests. Each wave fills one
//! pooled buffer which is published to the ready queue once every request of
//! the wave has finished. The caller drives everything through
//! [`Session::step`] and drains bytes with [`Session::read`].

use std::fmt;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::core::buffer::{BufferItem, BufferKind, BufferPool, PoolStats, ReadyQueue};
use crate::core::config::FetchConfig;
use crate::core::error::{Error, Result};
use crate::core::header::{is_header_end, parse_content_length};
use crate::core::planner::{plan_wave, SubFetchWindow, WavePlan};
use crate::core::reader::StreamReader;
use crate::core::transport::{
    Readiness, RequestId, RequestSpec, TransferOutcome, TransferSink, Transport,
};

/// Why a session stopped before completing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Headers ended without a usable `Content-Length`
    UnknownContentLength,
    /// The header request itself failed (HTTP error status, connection error)
    HeaderRequestFailed(String),
    /// The transport reported a hard failure while stepping
    Transport(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::UnknownContentLength => write!(f, "unknown content length"),
            FailureReason::HeaderRequestFailed(reason) => {
                write!(f, "header request failed: {reason}")
            }
            FailureReason::Transport(reason) => write!(f, "transport failure: {reason}"),
        }
    }
}

/// Orchestrator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHeader,
    HeaderInFlight,
    BodyWaveInFlight,
    Complete,
    Failed(FailureReason),
    Closed,
}

impl SessionState {
    /// No further network activity will happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Complete | SessionState::Failed(_) | SessionState::Closed
        )
    }
}

/// Counters describing what a session has fetched so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub waves_completed: usize,
    pub body_bytes_received: u64,
    /// Waves whose received byte count differed from the plan
    pub short_waves: usize,
    /// Bytes delivered past a window or buffer boundary and discarded
    pub bytes_dropped: u64,
    pub header_bytes: usize,
}

#[derive(Debug, Default)]
struct HeaderPhase {
    request: Option<RequestId>,
    buffer: Option<BufferItem>,
    ended: bool,
    failure: Option<String>,
}

#[derive(Debug)]
struct WindowProgress {
    id: RequestId,
    window: SubFetchWindow,
    written: usize,
}

#[derive(Debug)]
struct Wave {
    plan: WavePlan,
    buffer: BufferItem,
    windows: Vec<WindowProgress>,
}

/// Routes transport callbacks into the header buffer or the wave windows
struct SessionSink<'a> {
    header: &'a mut HeaderPhase,
    content_length: &'a mut u64,
    wave: Option<&'a mut Wave>,
    stats: &'a mut SessionStats,
}

impl TransferSink for SessionSink<'_> {
    fn on_header(&mut self, id: RequestId, line: &[u8]) -> usize {
        if self.header.request != Some(id) || self.header.ended {
            return line.len();
        }

        if let Some(buffer) = self.header.buffer.as_mut() {
            let stored = buffer.append(line);
            self.stats.header_bytes += stored;
            if stored < line.len() {
                warn!(
                    "Header buffer full, dropped {} bytes of a header line",
                    line.len() - stored
                );
            }
        }

        if *self.content_length == 0 {
            if let Some(length) = parse_content_length(line) {
                debug!("Content-Length: {}", length);
                *self.content_length = length;
            }
        }

        if is_header_end(line) {
            self.header.ended = true;
        }

        line.len()
    }

    fn on_body(&mut self, id: RequestId, data: &[u8]) -> usize {
        let Some(wave) = self.wave.as_mut() else {
            return data.len();
        };
        let Some(progress) = wave.windows.iter_mut().find(|w| w.id == id) else {
            return data.len();
        };

        let room = progress.window.len - progress.written;
        let wanted = data.len().min(room);
        let stored = wave
            .buffer
            .write_at(progress.window.offset + progress.written, &data[..wanted]);
        progress.written += stored;

        if stored < data.len() {
            let dropped = data.len() - stored;
            self.stats.bytes_dropped += dropped as u64;
            warn!(
                "Range {} overflowed its window, dropped {} bytes",
                progress.window.range, dropped
            );
        }

        data.len()
    }

    fn on_finished(&mut self, id: RequestId, outcome: &TransferOutcome) {
        if self.header.request == Some(id) {
            if let TransferOutcome::Failed(reason) = outcome {
                self.header.failure = Some(reason.clone());
            }
            return;
        }

        if let TransferOutcome::Failed(reason) = outcome {
            if let Some(progress) = self
                .wave
                .as_ref()
                .and_then(|wave| wave.windows.iter().find(|w| w.id == id))
            {
                warn!("Range {} failed: {}", progress.window.range, reason);
            }
        }
    }
}

/// One chunked download of one URL
pub struct Session<T: Transport> {
    url: String,
    config: FetchConfig,
    /// Released by [`Session::destroy`]
    transport: Option<T>,
    state: SessionState,
    content_length: u64,
    next_start: u64,
    header: HeaderPhase,
    wave: Option<Wave>,
    pool: Arc<BufferPool>,
    ready: Arc<ReadyQueue>,
    reader: StreamReader,
    stats: SessionStats,
}

impl<T: Transport> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("content_length", &self.content_length)
            .field("next_start", &self.next_start)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<T: Transport> Session<T> {
    /// Start a session: issue the header request for `url` on `transport`.
    pub fn create(url: &str, transport: T, config: FetchConfig) -> Result<Self> {
        config.validate()?;

        let pool = Arc::new(BufferPool::new(config.chunk_size));
        let ready = Arc::new(ReadyQueue::new());
        let reader = StreamReader::new(Arc::clone(&pool), Arc::clone(&ready));

        let mut session = Self {
            url: url.to_string(),
            config,
            transport: Some(transport),
            state: SessionState::AwaitingHeader,
            content_length: 0,
            next_start: 0,
            header: HeaderPhase::default(),
            wave: None,
            pool,
            ready,
            reader,
            stats: SessionStats::default(),
        };

        let mut buffer = session.pool.obtain()?;
        buffer.reset(BufferKind::Header);
        session.header.buffer = Some(buffer);

        let id = session.issue(RequestSpec::header(url))?;
        session.header.request = Some(id);
        session.state = SessionState::HeaderInFlight;

        info!("Requesting headers for {}", url);
        Ok(session)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Discovered resource length, 0 while unknown
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// The transport, `None` once the session is destroyed
    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    /// Terminal, with every published byte already read
    pub fn is_drained(&self) -> bool {
        self.state.is_terminal() && self.ready.is_empty() && !self.reader.has_current()
    }

    /// Advance the download one non-blocking tick.
    ///
    /// Returns the number of requests still active. 0 means the session has
    /// reached a terminal state; waves that finish immediately are resolved
    /// within the same call.
    pub fn step(&mut self) -> Result<usize> {
        self.ensure_open()?;

        loop {
            if self.state.is_terminal() {
                return Ok(0);
            }

            let active = self.drive_transport()?;

            if self.state == SessionState::HeaderInFlight {
                if self.header.ended {
                    self.finish_header_phase()?;
                    continue;
                }
                if let Some(reason) = self.header.failure.take() {
                    error!("Header request for {} failed: {}", self.url, reason);
                    self.fail(FailureReason::HeaderRequestFailed(reason));
                    return Ok(0);
                }
            }

            if active > 0 {
                return Ok(active);
            }

            self.resolve_idle()?;
        }
    }

    /// Copy published bytes into `buf`. 0 means nothing is ready yet.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.reader.read(buf))
    }

    /// Descriptors to wait on before the next [`Session::step`]
    pub fn readiness(&self) -> Readiness {
        self.transport
            .as_ref()
            .map_or_else(Readiness::none, |transport| transport.readiness())
    }

    /// Cancel everything and free every buffer. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        self.teardown_header_request();
        self.abandon_wave();

        if let Some(buffer) = self.header.buffer.take() {
            self.pool.release(buffer);
        }
        self.reader.teardown();
        let queued = self.ready.drain_into(&self.pool);
        let idle = self.pool.drain();
        self.transport = None;

        debug!(
            "Session for {} destroyed ({} queued and {} idle buffers freed)",
            self.url, queued, idle
        );
        self.state = SessionState::Closed;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    fn drive_transport(&mut self) -> Result<usize> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::SessionClosed);
        };
        let mut sink = SessionSink {
            header: &mut self.header,
            content_length: &mut self.content_length,
            wave: self.wave.as_mut(),
            stats: &mut self.stats,
        };

        match transport.step(&mut sink) {
            Ok(active) => Ok(active),
            Err(e) => {
                let reason = match e {
                    Error::TransportError(reason) => reason,
                    other => other.to_string(),
                };
                error!("Transport failure while fetching {}: {}", self.url, reason);
                self.fail(FailureReason::Transport(reason.clone()));
                Err(Error::TransportError(reason))
            }
        }
    }

    /// Nothing is running: publish what was fetched and schedule what is left
    fn resolve_idle(&mut self) -> Result<()> {
        match self.state {
            SessionState::HeaderInFlight => self.finish_header_phase(),
            SessionState::BodyWaveInFlight => {
                self.finish_wave();
                if self.next_start >= self.content_length {
                    info!(
                        "Fetched {} bytes of {} in {} wave(s)",
                        self.stats.body_bytes_received,
                        self.url,
                        self.stats.waves_completed
                    );
                    self.state = SessionState::Complete;
                    return Ok(());
                }
                self.start_next_wave()
            }
            _ => Ok(()),
        }
    }

    fn finish_header_phase(&mut self) -> Result<()> {
        self.teardown_header_request();

        if let Some(buffer) = self.header.buffer.take() {
            if self.config.include_headers {
                self.ready.push(buffer);
            } else {
                self.pool.release(buffer);
            }
        }

        if self.content_length == 0 {
            warn!("No Content-Length for {}, not fetching the body", self.url);
            self.fail(FailureReason::UnknownContentLength);
            return Ok(());
        }

        info!("{} is {} bytes", self.url, self.content_length);
        self.state = SessionState::BodyWaveInFlight;
        self.start_next_wave()
    }

    fn start_next_wave(&mut self) -> Result<()> {
        let plan = plan_wave(
            self.next_start,
            self.content_length,
            self.config.chunk_size,
            self.config.max_parallel,
        )?;

        let mut buffer = self.pool.obtain()?;
        buffer.reset(BufferKind::Body);
        buffer.set_filled(plan.len());

        let mut windows = Vec::with_capacity(plan.windows.len());
        for window in &plan.windows {
            match self.register_window(window) {
                Ok(id) => windows.push(WindowProgress {
                    id,
                    window: *window,
                    written: 0,
                }),
                Err(e) => {
                    for progress in &windows {
                        self.release_request(progress.id);
                    }
                    self.pool.release(buffer);
                    return Err(e);
                }
            }
        }

        debug!(
            "Started wave {} with {} request(s)",
            plan.range,
            windows.len()
        );
        self.next_start = plan.next_start;
        self.wave = Some(Wave {
            plan,
            buffer,
            windows,
        });
        Ok(())
    }

    fn register_window(&mut self, window: &SubFetchWindow) -> Result<RequestId> {
        let spec = RequestSpec::body_range(&self.url, window.range);
        self.issue(spec)
    }

    /// Create and add one request, destroying it again if the add fails
    fn issue(&mut self, spec: RequestSpec) -> Result<RequestId> {
        let transport = self.transport.as_mut().ok_or(Error::SessionClosed)?;
        let id = transport.create_request(spec)?;
        if let Err(e) = transport.add(id) {
            transport.destroy_request(id);
            return Err(e);
        }
        Ok(id)
    }

    fn finish_wave(&mut self) {
        let Some(wave) = self.wave.take() else {
            return;
        };
        for progress in &wave.windows {
            self.release_request(progress.id);
        }

        let Wave {
            plan,
            mut buffer,
            windows,
        } = wave;

        // A recycled buffer still holds an earlier owner's bytes
        for progress in windows.iter().filter(|p| p.written < p.window.len) {
            buffer.zero_range(
                progress.window.offset + progress.written,
                progress.window.len - progress.written,
            );
        }

        let received: usize = windows.iter().map(|w| w.written).sum();
        if received != plan.len() {
            warn!(
                "Wave {} expected {} bytes, received {}",
                plan.range,
                plan.len(),
                received
            );
            self.stats.short_waves += 1;
        }
        self.stats.waves_completed += 1;
        self.stats.body_bytes_received += received as u64;

        self.ready.push(buffer);
    }

    /// Drop an in-flight wave without publishing it
    fn abandon_wave(&mut self) {
        if let Some(wave) = self.wave.take() {
            for progress in &wave.windows {
                self.release_request(progress.id);
            }
            self.pool.release(wave.buffer);
        }
    }

    fn teardown_header_request(&mut self) {
        if let Some(id) = self.header.request.take() {
            self.release_request(id);
        }
    }

    fn release_request(&mut self, id: RequestId) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        if let Err(e) = transport.remove(id) {
            debug!("Removing request {}: {}", id, e);
        }
        transport.destroy_request(id);
    }

    fn fail(&mut self, reason: FailureReason) {
        self.teardown_header_request();
        self.abandon_wave();
        if let Some(buffer) = self.header.buffer.take() {
            self.pool.release(buffer);
        }
        self.state = SessionState::Failed(reason);
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}
