//! Core download functionality for rangefetch
//!
//! Drives a session to completion and copies the stream into a file or any
//! writer, reporting progress along the way.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use crate::core::config::FetchConfig;
use crate::core::error::{Error, Result};
use crate::core::session::Session;
use crate::core::source::classify;
use crate::core::stream::{DownloadOptions, OverwriteBehavior, SessionStream};
use crate::core::transport::{HttpTransport, Transport};

/// Check if destination file exists and handle overwrite behavior
pub fn check_overwrite_permission(file_path: &str, behavior: &OverwriteBehavior) -> Result<bool> {
    if !Path::new(file_path).exists() {
        return Ok(true);
    }

    match behavior {
        OverwriteBehavior::Force => {
            eprintln!("⚠️  Overwriting existing file: {file_path}");
            Ok(true)
        }
        OverwriteBehavior::NeverOverwrite => Err(Error::IoError(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("File already exists: {file_path} (use --force to overwrite)"),
        ))),
        OverwriteBehavior::Prompt => {
            eprintln!("⚠️  File already exists: {file_path}");
            eprint!("Overwrite? [y/N]: ");
            std::io::stderr().flush()?;

            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;

            match input.trim().to_lowercase().as_str() {
                "y" | "yes" => {
                    eprintln!("✅ Overwriting file");
                    Ok(true)
                }
                _ => {
                    eprintln!("❌ Download cancelled");
                    Err(Error::IoError(std::io::Error::new(
                        std::io::ErrorKind::Interrupted,
                        "Download cancelled by user",
                    )))
                }
            }
        }
    }
}

/// Copy a session stream into `writer`. Returns the number of bytes written.
pub fn copy_stream<T: Transport, W: Write>(
    stream: &mut SessionStream<T>,
    writer: &mut W,
    options: &DownloadOptions,
) -> Result<u64> {
    let total = stream.expected_len()?;
    let mut buffer = vec![0u8; options.buffer_size.max(1)];
    let mut written = 0u64;

    loop {
        let n = match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                return Err(match e.into_inner() {
                    Some(inner) => match inner.downcast::<Error>() {
                        Ok(err) => *err,
                        Err(other) => Error::DownloadFailed(other.to_string()),
                    },
                    None => Error::DownloadFailed("stream read failed".to_string()),
                })
            }
        };

        writer.write_all(&buffer[..n])?;
        written += n as u64;

        if let Some(ref progress) = options.progress {
            progress(written, total);
        }
    }

    writer.flush()?;
    log::debug!("Copied {} bytes ({} advertised)", written, total);
    Ok(written)
}

/// High-level downloader over HTTP sessions
#[derive(Debug, Clone)]
pub struct Downloader {
    config: FetchConfig,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader {
    /// Downloader with default settings; response headers are not written out
    pub fn new() -> Self {
        Self {
            config: FetchConfig {
                include_headers: false,
                ..FetchConfig::default()
            },
        }
    }

    /// Create a new downloader with custom configuration
    pub fn with_config(config: FetchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Open a blocking stream over `url`
    pub fn open(&self, url: &str) -> Result<SessionStream<HttpTransport>> {
        classify(url)?;
        let transport = HttpTransport::new(&self.config.transport)?;
        let session = Session::create(url, transport, self.config.clone())?;
        Ok(SessionStream::new(session))
    }

    /// Download to a file destination
    pub fn fetch_to_file(&self, url: &str, file_path: &str, options: &DownloadOptions) -> Result<u64> {
        check_overwrite_permission(file_path, &options.overwrite)?;

        let mut stream = self.open(url)?;
        let file = File::create(file_path)?;
        let mut writer = BufWriter::with_capacity(options.buffer_size.max(1), file);
        let written = copy_stream(&mut stream, &mut writer, options)?;

        log::info!("Saved {} bytes from {} to {}", written, url, file_path);
        Ok(written)
    }

    /// Download into any writer
    pub fn fetch_to_writer<W: Write>(
        &self,
        url: &str,
        writer: &mut W,
        options: &DownloadOptions,
    ) -> Result<u64> {
        let mut stream = self.open(url)?;
        copy_stream(&mut stream, writer, options)
    }
}
