//! # Rangefetch CLI
//!
//! Command-line interface for the rangefetch library.
//! Provides a curl-like interface for fetching a URL in parallel byte ranges.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use rangefetch::{
    core::source::classify, resolve_output_filename, DownloadOptions, Downloader, FetchConfig,
    OverwriteBehavior, Waves,
};

mod cli;

/// Command-line interface for rangefetch
#[derive(Parser, Debug)]
#[command(name = "rangefetch")]
#[command(about = "Parallel HTTP byte-range fetcher")]
#[command(long_about = "Fetches a URL in waves of parallel byte-range requests:
  rangefetch https://host/movie.mp4             # Save to movie.mp4
  rangefetch https://host/movie.mp4 out.mp4     # Save to out.mp4
  rangefetch https://host/movie.mp4 -           # Stream to stdout
  rangefetch -i https://host/movie.mp4 -        # Response headers first, like curl -i

File Overwrite Behavior:
  By default, you'll be prompted if destination file exists
  --force                          # Overwrite without asking
  --no-clobber                     # Never overwrite, fail if file exists")]
#[command(version = env!("RANGEFETCH_VERSION"))]
struct Cli {
    /// URL to fetch (http or https)
    url: String,

    /// Output file path, or "-" for stdout
    #[arg(default_value = "")]
    output: String,

    /// Write the response headers before the body
    #[arg(short, long)]
    include: bool,

    /// Parallel range requests per wave (1-6)
    #[arg(short, long)]
    parallel: Option<usize>,

    /// Bytes fetched per wave
    #[arg(long)]
    chunk_size: Option<usize>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable dry-run mode (show the wave plan without fetching)
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Force overwrite existing files without prompting
    #[arg(short, long)]
    force: bool,

    /// Never overwrite existing files (fail if destination exists)
    #[arg(long)]
    no_clobber: bool,
}

/// Output destination types
#[derive(Debug, PartialEq)]
enum OutputDestination {
    File(String),
    Stdout,
}

/// Resolve output destination from CLI arguments
fn resolve_output(url: &str, output: &str) -> OutputDestination {
    if output == "-" {
        OutputDestination::Stdout
    } else if output.is_empty() {
        OutputDestination::File(resolve_output_filename(url))
    } else {
        OutputDestination::File(output.to_string())
    }
}

/// File configuration first, then command-line overrides.
///
/// Without a file, response headers are omitted unless `-i` is given.
fn build_config(cli: &Cli) -> anyhow::Result<FetchConfig> {
    let mut config = match &cli.config {
        Some(path) => FetchConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        // curl-like: headers only with -i
        None => FetchConfig {
            include_headers: false,
            ..FetchConfig::default()
        },
    };

    if cli.include {
        config.include_headers = true;
    }
    if let Some(parallel) = cli.parallel {
        config.max_parallel = parallel;
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = chunk_size;
    }
    config.validate().context("Invalid settings")?;
    Ok(config)
}

fn overwrite_behavior(force: bool, no_clobber: bool) -> OverwriteBehavior {
    if force {
        OverwriteBehavior::Force
    } else if no_clobber {
        OverwriteBehavior::NeverOverwrite
    } else {
        OverwriteBehavior::Prompt
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("❌ Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let mut logger = env_logger::Builder::from_default_env();
    logger.target(env_logger::Target::Stderr);
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    if cli.verbose {
        eprintln!("🚀 Rangefetch v{} starting...", env!("RANGEFETCH_VERSION"));
    }

    if cli.force && cli.no_clobber {
        bail!("--force and --no-clobber cannot be used together");
    }

    classify(&cli.url)?;
    let config = build_config(&cli)?;
    let output = resolve_output(&cli.url, &cli.output);

    if cli.dry_run {
        let url = &cli.url;
        eprintln!("🔍 [DRY RUN] Would fetch: {url} to {output:?}");
        eprintln!(
            "🔍 [DRY RUN] Waves of {} bytes, up to {} parallel requests, headers {}",
            config.chunk_size,
            config.max_parallel,
            if config.include_headers { "included" } else { "omitted" }
        );
        return Ok(());
    }

    let downloader = Downloader::with_config(config);
    match output {
        OutputDestination::File(file_path) => {
            download_to_file(&downloader, &cli, &file_path)?;
        }
        OutputDestination::Stdout => {
            download_to_stdout(&downloader, &cli)?;
        }
    }

    Ok(())
}

/// Download to a file with progress bar
fn download_to_file(downloader: &Downloader, cli: &Cli, file_path: &str) -> anyhow::Result<()> {
    eprintln!("📁 Saving to: {file_path}");

    let progress_manager = cli::ProgressManager::new(0, &format!("🌐 Fetching {}", cli.url));
    let options = DownloadOptions {
        overwrite: overwrite_behavior(cli.force, cli.no_clobber),
        progress: Some(progress_manager.callback()),
        ..Default::default()
    };

    let written = downloader
        .fetch_to_file(&cli.url, file_path, &options)
        .with_context(|| format!("Failed to fetch {}", cli.url))?;
    progress_manager.finish(written);

    if cli.verbose {
        let waves = Waves::new(
            written,
            downloader.config().chunk_size,
            downloader.config().max_parallel,
        )
        .count();
        eprintln!("📦 {written} bytes in about {waves} wave(s)");
    }
    Ok(())
}

/// Download to stdout (no progress bar)
fn download_to_stdout(downloader: &Downloader, cli: &Cli) -> anyhow::Result<()> {
    if cli.verbose {
        eprintln!("📡 Streaming {} to stdout", cli.url);
    }

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    downloader
        .fetch_to_writer(&cli.url, &mut handle, &DownloadOptions::default())
        .with_context(|| format!("Failed to fetch {}", cli.url))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_output_auto() {
        assert_eq!(
            resolve_output("https://cdn.example.com/media/clip.mp4", ""),
            OutputDestination::File("clip.mp4".to_string())
        );
    }

    #[test]
    fn test_resolve_output_stdout() {
        assert_eq!(
            resolve_output("https://cdn.example.com/clip.mp4", "-"),
            OutputDestination::Stdout
        );
    }

    #[test]
    fn test_resolve_output_custom_file() {
        assert_eq!(
            resolve_output("https://cdn.example.com/clip.mp4", "my.mp4"),
            OutputDestination::File("my.mp4".to_string())
        );
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from(["rangefetch", "-i", "-p", "3", "--chunk-size", "4096", "http://h/x"]);
        let config = build_config(&cli).unwrap();
        assert!(config.include_headers);
        assert_eq!(config.max_parallel, 3);
        assert_eq!(config.chunk_size, 4096);
    }

    #[test]
    fn test_config_file_headers_survive_without_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rangefetch.json");
        std::fs::write(&path, r#"{ "include_headers": true, "max_parallel": 2 }"#).unwrap();

        let path_arg = path.to_str().unwrap();
        let cli = Cli::parse_from(["rangefetch", "--config", path_arg, "http://h/x"]);
        let config = build_config(&cli).unwrap();
        assert!(config.include_headers);
        assert_eq!(config.max_parallel, 2);

        let cli = Cli::parse_from(["rangefetch", "http://h/x"]);
        assert!(!build_config(&cli).unwrap().include_headers);
    }

    #[test]
    fn test_cli_rejects_bad_parallelism() {
        let cli = Cli::parse_from(["rangefetch", "-p", "9", "http://h/x"]);
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn test_overwrite_behavior_from_flags() {
        assert_eq!(overwrite_behavior(true, false), OverwriteBehavior::Force);
        assert_eq!(overwrite_behavior(false, true), OverwriteBehavior::NeverOverwrite);
        assert_eq!(overwrite_behavior(false, false), OverwriteBehavior::Prompt);
    }
}
