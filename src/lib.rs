//! # rangefetch
//!
//! Parallel HTTP byte-range fetching exposed as a pull-based byte stream.
//!
//! A [`Session`] discovers the length of a remote resource, then fetches it in
//! waves of up to six concurrent range requests into recycled 1 MiB buffers.
//! The caller owns the event loop: it waits on [`Session::readiness`], calls
//! [`Session::step`], and drains bytes with [`Session::read`] at its own pace.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! // Download to an auto-named file in the current directory
//! rangefetch::get("https://example.com/media/movie.mp4", None)?;
//!
//! // Stream into anything that implements Read
//! let mut stream = rangefetch::open("https://example.com/media/movie.mp4")?;
//! let mut sink = std::io::sink();
//! std::io::copy(&mut stream, &mut sink)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Driving a session yourself
//!
//! ```rust,no_run
//! use rangefetch::{FetchConfig, HttpTransport, Session};
//!
//! let config = FetchConfig::default();
//! let transport = HttpTransport::new(&config.transport)?;
//! let mut session = Session::create("https://example.com/movie.mp4", transport, config)?;
//!
//! let mut buf = [0u8; 16 * 1024];
//! while !session.is_drained() {
//!     if session.step()? > 0 {
//!         rangefetch::wait_for_activity(&session.readiness(), std::time::Duration::from_millis(100))?;
//!     }
//!     let n = session.read(&mut buf)?;
//!     // consume &buf[..n]
//! #   let _ = n;
//! }
//! # Ok::<(), rangefetch::Error>(())
//! ```

pub mod core;

#[cfg(feature = "c-bindings")]
pub mod ffi;

pub use crate::core::buffer::{BufferItem, BufferKind, BufferPool, PoolStats, ReadyQueue};
pub use crate::core::config::{FetchConfig, TransportConfig};
pub use crate::core::error::{Error, Result};
pub use crate::core::planner::{plan_wave, ByteRange, SubFetchWindow, WavePlan, Waves, MAX_PARALLEL};
pub use crate::core::reader::StreamReader;
pub use crate::core::session::{FailureReason, Session, SessionState, SessionStats};
pub use crate::core::stream::{
    wait_for_activity, DownloadOptions, OverwriteBehavior, ProgressCallback, SessionStream,
};
pub use crate::core::transport::{
    HttpTransport, MemoryOptions, MemoryTransport, Readiness, RequestId, RequestSpec,
    TransferOutcome, TransferSink, Transport,
};
pub use crate::core::{resolve_output_filename, Downloader, Source, SourceKind};

/// Download `url` to `dest`, or to a name derived from the URL when `None`.
///
/// Returns the number of bytes written.
pub fn get(url: &str, dest: Option<&str>) -> Result<u64> {
    get_with_options(url, dest, DownloadOptions::default())
}

/// Like [`get`], calling `progress(downloaded, total)` as bytes are written
pub fn get_with_progress<F>(url: &str, dest: Option<&str>, progress: F) -> Result<u64>
where
    F: Fn(u64, u64) + Send + Sync + 'static,
{
    let options = DownloadOptions {
        progress: Some(std::sync::Arc::new(progress)),
        ..Default::default()
    };
    get_with_options(url, dest, options)
}

/// Like [`get`], with full control over progress and overwrite behavior
pub fn get_with_options(url: &str, dest: Option<&str>, options: DownloadOptions) -> Result<u64> {
    let file_path = match dest {
        Some(path) => path.to_string(),
        None => resolve_output_filename(url),
    };
    Downloader::new().fetch_to_file(url, &file_path, &options)
}

/// Open `url` as a blocking [`std::io::Read`] stream of the body
pub fn open(url: &str) -> Result<SessionStream<HttpTransport>> {
    Downloader::new().open(url)
}
