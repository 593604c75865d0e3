//! Core library modules for rangefetch
//!
//! This module contains the internal implementation of the rangefetch library:
//! buffer recycling, wave planning, the transports and the orchestrator.

pub mod buffer;
pub mod config;
pub mod downloader;
pub mod error;
pub mod header;
pub mod planner;
pub mod reader;
pub mod session;
pub mod source;
pub mod stream;
pub mod transport;

// Re-export main types for internal use
pub use downloader::Downloader;
pub use source::{resolve_output_filename, Source, SourceKind};
