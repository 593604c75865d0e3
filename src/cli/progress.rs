//! CLI-specific progress handling for rangefetch
//!
//! Provides progress bar implementation for the command-line interface.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use rangefetch::ProgressCallback;

/// Byte-oriented bar; `total_size` may be 0 until the length is discovered
pub fn create_progress_bar(total_size: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} ETA: {eta} {msg}")
            .expect("progress template is valid")
            .progress_chars("#>-")
    );
    pb
}

/// Progress bar whose length is learned once the header phase finishes
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager
    pub fn new(total_size: u64, message: &str) -> Self {
        let pb = create_progress_bar(total_size);

        eprintln!("{}", message);

        Self { pb }
    }

    /// Callback for [`rangefetch::DownloadOptions::progress`]
    pub fn callback(&self) -> ProgressCallback {
        let pb = self.pb.clone();
        Arc::new(move |downloaded, total| {
            if total > 0 && pb.length() != Some(total) {
                pb.set_length(total);
            }
            pb.set_position(downloaded);
        })
    }

    pub fn finish(&self, bytes: u64) {
        self.pb
            .finish_with_message(format!("✅ Fetched {bytes} bytes"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_progress_bar_template() {
        let pb = create_progress_bar(1000);
        assert_eq!(pb.length().unwrap(), 1000);

        pb.set_position(100);
        pb.finish();
    }

    #[test]
    fn test_callback_learns_length() {
        let manager = ProgressManager::new(0, "Test fetch");
        let callback = manager.callback();

        callback(10, 0);
        assert_eq!(manager.pb.position(), 10);

        callback(250, 500);
        assert_eq!(manager.pb.length().unwrap(), 500);
        assert_eq!(manager.pb.position(), 250);
        manager.finish(500);
    }
}
