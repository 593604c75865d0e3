//! HTTP transport backed by reqwest
//!
//! Each added request runs as a task on a shared multi-thread runtime. Tasks
//! never touch session state: they send events over a channel and poke a wake
//! socket, and [`HttpTransport::step`] replays those events into the sink on
//! the caller's thread.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use once_cell::sync::Lazy;
use reqwest::header::RANGE;
use reqwest::{Client, ClientBuilder, StatusCode};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::{Readiness, RequestId, RequestSpec, TransferOutcome, TransferSink, Transport};
use crate::core::config::TransportConfig;
use crate::core::error::{Error, Result};

/// Shared runtime for every HTTP transport in the process
static RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().clamp(1, 8))
        .thread_name("rangefetch-io")
        .enable_all()
        .build()
        .expect("Failed to create tokio runtime for HTTP transport")
});

#[derive(Debug)]
enum Event {
    Header(RequestId, Vec<u8>),
    Body(RequestId, Bytes),
    Done(RequestId, TransferOutcome),
}

/// Write end of the wake socket, cloned into every request task
#[derive(Debug, Clone)]
struct WakeSignal {
    #[cfg(unix)]
    writer: Arc<std::os::unix::net::UnixStream>,
}

impl WakeSignal {
    fn notify(&self) {
        #[cfg(unix)]
        {
            use std::io::Write;
            // A full socket already guarantees a pending wakeup
            let _ = (&*self.writer).write(&[1]);
        }
    }
}

#[derive(Debug)]
struct HttpRequest {
    spec: RequestSpec,
    handle: Option<JoinHandle<()>>,
    added: bool,
    finished: bool,
}

impl HttpRequest {
    fn abort(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// Real HTTP transport
pub struct HttpTransport {
    client: Client,
    requests: BTreeMap<RequestId, HttpRequest>,
    next_id: u64,
    events_tx: UnboundedSender<Event>,
    events_rx: UnboundedReceiver<Event>,
    wake: WakeSignal,
    #[cfg(unix)]
    wake_reader: std::os::unix::net::UnixStream,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("requests", &self.requests.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .connect_timeout(config.connect_timeout())
            .tcp_keepalive(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            // Byte offsets must refer to the stored representation
            .no_gzip()
            .no_brotli();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        #[cfg(unix)]
        let (wake, wake_reader) = {
            let (reader, writer) = std::os::unix::net::UnixStream::pair()?;
            reader.set_nonblocking(true)?;
            writer.set_nonblocking(true)?;
            (
                WakeSignal {
                    writer: Arc::new(writer),
                },
                reader,
            )
        };
        #[cfg(not(unix))]
        let wake = WakeSignal {};

        Ok(Self {
            client,
            requests: BTreeMap::new(),
            next_id: 1,
            events_tx,
            events_rx,
            wake,
            #[cfg(unix)]
            wake_reader,
        })
    }

    fn drain_wake(&mut self) {
        #[cfg(unix)]
        {
            use std::io::Read;
            let mut scratch = [0u8; 256];
            while let Ok(n) = (&self.wake_reader).read(&mut scratch) {
                if n == 0 {
                    break;
                }
            }
        }
    }

    fn finish(&mut self, id: RequestId, outcome: TransferOutcome, sink: &mut dyn TransferSink) {
        if let Some(request) = self.requests.get_mut(&id) {
            request.finished = true;
            if outcome == TransferOutcome::Aborted {
                request.abort();
            }
            sink.on_finished(id, &outcome);
        }
    }

    fn dispatch(&mut self, event: Event, sink: &mut dyn TransferSink) {
        let id = match &event {
            Event::Header(id, _) | Event::Body(id, _) | Event::Done(id, _) => *id,
        };
        let live = self
            .requests
            .get(&id)
            .is_some_and(|request| request.added && !request.finished);
        if !live {
            return;
        }

        match event {
            Event::Header(_, line) => {
                if sink.on_header(id, &line) < line.len() {
                    self.finish(id, TransferOutcome::Aborted, sink);
                }
            }
            Event::Body(_, data) => {
                if sink.on_body(id, &data) < data.len() {
                    self.finish(id, TransferOutcome::Aborted, sink);
                }
            }
            Event::Done(_, outcome) => {
                if let TransferOutcome::Failed(reason) = &outcome {
                    log::debug!("Request {} failed: {}", id, reason);
                }
                self.finish(id, outcome, sink);
            }
        }
    }
}

impl Transport for HttpTransport {
    fn create_request(&mut self, spec: RequestSpec) -> Result<RequestId> {
        let url = reqwest::Url::parse(&spec.url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {e}", spec.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl(format!(
                "{}: unsupported scheme '{}'",
                spec.url,
                url.scheme()
            )));
        }

        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.requests.insert(
            id,
            HttpRequest {
                spec,
                handle: None,
                added: false,
                finished: false,
            },
        );
        Ok(id)
    }

    fn destroy_request(&mut self, id: RequestId) {
        if let Some(mut request) = self.requests.remove(&id) {
            request.abort();
        }
    }

    fn add(&mut self, id: RequestId) -> Result<()> {
        let request = self
            .requests
            .get_mut(&id)
            .ok_or_else(|| Error::TransportError(format!("unknown request {id}")))?;
        if request.handle.is_some() {
            return Err(Error::TransportError(format!("request {id} already started")));
        }

        let client = self.client.clone();
        let events = self.events_tx.clone();
        let wake = self.wake.clone();
        let spec = request.spec.clone();

        request.handle = Some(RUNTIME.spawn(async move {
            let outcome = match run_request(&client, id, &spec, &events, &wake).await {
                Ok(()) => TransferOutcome::Completed,
                Err(e) => TransferOutcome::Failed(e.to_string()),
            };
            let _ = events.send(Event::Done(id, outcome));
            wake.notify();
        }));
        request.added = true;
        Ok(())
    }

    fn remove(&mut self, id: RequestId) -> Result<()> {
        let request = self
            .requests
            .get_mut(&id)
            .ok_or_else(|| Error::TransportError(format!("unknown request {id}")))?;
        if request.added && !request.finished {
            request.abort();
        }
        request.added = false;
        Ok(())
    }

    fn step(&mut self, sink: &mut dyn TransferSink) -> Result<usize> {
        self.drain_wake();

        loop {
            match self.events_rx.try_recv() {
                Ok(event) => self.dispatch(event, sink),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(Error::TransportError("event channel closed".to_string()));
                }
            }
        }

        Ok(self
            .requests
            .values()
            .filter(|request| request.added && !request.finished)
            .count())
    }

    fn readiness(&self) -> Readiness {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = self.wake_reader.as_raw_fd();
            Readiness {
                read: vec![fd],
                write: Vec::new(),
                except: Vec::new(),
                max_fd: fd,
            }
        }
        #[cfg(not(unix))]
        {
            Readiness::none()
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        for request in self.requests.values_mut() {
            request.abort();
        }
    }
}

async fn run_request(
    client: &Client,
    id: RequestId,
    spec: &RequestSpec,
    events: &UnboundedSender<Event>,
    wake: &WakeSignal,
) -> Result<()> {
    let mut builder = if spec.header_only {
        client.head(&spec.url)
    } else {
        client.get(&spec.url)
    };
    if let Some(range) = spec.range {
        builder = builder.header(RANGE, range.header_value());
    }

    let response = builder.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::HttpError(format!("{status} for {}", spec.url)));
    }
    if let Some(range) = spec.range {
        if range.start > 0 && status != StatusCode::PARTIAL_CONTENT {
            return Err(Error::HttpError(format!(
                "server ignored range {range} for {} ({status})",
                spec.url
            )));
        }
    }

    let send = |event: Event| -> Result<()> {
        events
            .send(event)
            .map_err(|_| Error::TransportError("transport dropped".to_string()))?;
        wake.notify();
        Ok(())
    };

    if spec.deliver_headers {
        let status_line = format!("{:?} {}\r\n", response.version(), status);
        send(Event::Header(id, status_line.into_bytes()))?;
        for (name, value) in response.headers() {
            let mut line = canonical_name(name.as_str()).into_bytes();
            line.extend_from_slice(b": ");
            line.extend_from_slice(value.as_bytes());
            line.extend_from_slice(b"\r\n");
            send(Event::Header(id, line))?;
        }
        send(Event::Header(id, b"\r\n".to_vec()))?;
    }

    if !spec.header_only {
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if spec.deliver_body && !chunk.is_empty() {
                send(Event::Body(id, chunk))?;
            }
        }
    }

    Ok(())
}

/// `content-length` -> `Content-Length`
fn canonical_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
