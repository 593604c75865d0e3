//! Blocking stream adapter for rangefetch
//!
//! Turns a step-driven [`Session`] into a plain [`std::io::Read`], waiting on
//! the transport's readiness descriptors between steps.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::core::error::{Error, Result};
use crate::core::session::{Session, SessionState};
use crate::core::transport::{Readiness, Transport};

/// Progress callback function type
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Overwrite behavior for existing files
#[derive(Debug, Clone, PartialEq, Default)]
pub enum OverwriteBehavior {
    /// Prompt user for confirmation (default)
    #[default]
    Prompt,
    /// Force overwrite without prompting
    Force,
    /// Never overwrite, fail if file exists
    NeverOverwrite,
}

/// Options for download operations
#[derive(Clone)]
pub struct DownloadOptions {
    /// Optional progress callback, called with (bytes written, content length)
    pub progress: Option<ProgressCallback>,

    /// Copy buffer size for streaming operations
    pub buffer_size: usize,

    /// Behavior when destination file already exists
    pub overwrite: OverwriteBehavior,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            progress: None,
            buffer_size: 64 * 1024, // 64KB
            overwrite: OverwriteBehavior::default(),
        }
    }
}

/// Block until a descriptor in `readiness` is ready or `timeout` passes.
///
/// Returns whether anything became ready. Transports without descriptors
/// progress on every step, so an empty set only yields the thread.
pub fn wait_for_activity(readiness: &Readiness, timeout: Duration) -> Result<bool> {
    if readiness.is_empty() {
        std::thread::yield_now();
        return Ok(false);
    }
    poll_descriptors(readiness, timeout)
}

#[cfg(unix)]
fn poll_descriptors(readiness: &Readiness, timeout: Duration) -> Result<bool> {
    let mut fds: Vec<libc::pollfd> = Vec::new();
    let mut watch = |fd: i32, events: libc::c_short| {
        match fds.iter_mut().find(|p| p.fd == fd) {
            Some(entry) => entry.events |= events,
            None => fds.push(libc::pollfd {
                fd,
                events,
                revents: 0,
            }),
        }
    };
    for &fd in &readiness.read {
        watch(fd, libc::POLLIN);
    }
    for &fd in &readiness.write {
        watch(fd, libc::POLLOUT);
    }
    for &fd in &readiness.except {
        watch(fd, libc::POLLPRI);
    }

    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(Error::IoError(err));
    }
    Ok(rc > 0)
}

#[cfg(not(unix))]
fn poll_descriptors(_readiness: &Readiness, timeout: Duration) -> Result<bool> {
    std::thread::sleep(timeout.min(Duration::from_millis(5)));
    Ok(false)
}

/// Blocking reader over a session
///
/// `read` returns `Ok(0)` only at end of stream. A session that failed before
/// completing, or completed with waves that came back short, reports an error
/// once its published bytes are drained.
#[derive(Debug)]
pub struct SessionStream<T: Transport> {
    session: Session<T>,
    poll_timeout: Duration,
}

impl<T: Transport> SessionStream<T> {
    pub fn new(session: Session<T>) -> Self {
        let poll_timeout = session.config().poll_timeout();
        Self {
            session,
            poll_timeout,
        }
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    pub fn into_inner(self) -> Session<T> {
        self.session
    }

    /// Resource length once the header phase has finished, 0 before
    pub fn content_length(&self) -> u64 {
        self.session.content_length()
    }

    /// Step until the header phase is over, without consuming any bytes
    pub fn discover_length(&mut self) -> Result<u64> {
        while matches!(
            self.session.state(),
            SessionState::AwaitingHeader | SessionState::HeaderInFlight
        ) {
            if self.session.step()? > 0 {
                wait_for_activity(&self.session.readiness(), self.poll_timeout)?;
            }
        }
        Ok(self.session.content_length())
    }

    /// Bytes the stream will yield: the body, plus the header block when
    /// headers are published
    pub fn expected_len(&mut self) -> Result<u64> {
        let body = self.discover_length()?;
        if body > 0 && self.session.config().include_headers {
            return Ok(body + self.session.stats().header_bytes as u64);
        }
        Ok(body)
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let n = self.session.read(buf)?;
            if n > 0 {
                return Ok(n);
            }

            if self.session.is_drained() {
                return match self.session.state() {
                    SessionState::Failed(reason) => Err(Error::DownloadFailed(format!(
                        "{}: {}",
                        self.session.url(),
                        reason
                    ))),
                    _ if self.session.stats().short_waves > 0 => Err(Error::DownloadFailed(
                        format!(
                            "{}: {} wave(s) received fewer bytes than requested",
                            self.session.url(),
                            self.session.stats().short_waves
                        ),
                    )),
                    _ => Ok(0),
                };
            }

            if self.session.step()? > 0 {
                wait_for_activity(&self.session.readiness(), self.poll_timeout)?;
            }
        }
    }
}

impl<T: Transport> io::Read for SessionStream<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.fill(buf).map_err(into_io_error)
    }
}

fn into_io_error(err: Error) -> io::Error {
    match err {
        Error::IoError(err) => err,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}
