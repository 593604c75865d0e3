//! Integration tests for rangefetch sessions
//!
//! In-memory scenarios exercise the orchestrator deterministically; the HTTP
//! tests run real range requests against a local wiremock server, both through
//! the library and through the `rangefetch` binary.

use std::io::Read;
use std::process::Command;
use std::sync::atomic::Ordering;

use rangefetch::{
    FailureReason, FetchConfig, HttpTransport, MemoryOptions, MemoryTransport, Session,
    SessionState, SessionStream, Waves,
};
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MEMORY_URL: &str = "http://memory.test/movie.ts";
const MEDIA_PATH: &str = "/media/clip.bin";

#[ctor::ctor]
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 255) as u8).collect()
}

fn read_all<T: rangefetch::Transport>(session: &mut Session<T>) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 48 * 1024];
    loop {
        let n = session.read(&mut buf).unwrap();
        if n > 0 {
            out.extend_from_slice(&buf[..n]);
        } else if session.is_drained() {
            return out;
        } else {
            session.step().unwrap();
        }
    }
}

#[test]
fn test_2_400_000_byte_resource_round_trip() {
    let data = pattern(2_400_000);
    let transport = MemoryTransport::new(MEMORY_URL, data.clone());
    let counters = transport.counters();
    let config = FetchConfig {
        include_headers: false,
        ..Default::default()
    };
    let mut session = Session::create(MEMORY_URL, transport, config).unwrap();

    let out = read_all(&mut session);
    assert_eq!(out.len(), data.len());
    assert!(out == data, "fetched bytes differ from the resource");

    assert_eq!(session.state(), &SessionState::Complete);
    let stats = session.stats();
    assert_eq!(stats.waves_completed, 3);
    assert_eq!(stats.short_waves, 0);

    // header request, two six-way waves, one single-request tail
    assert_eq!(counters.created.load(Ordering::SeqCst), 1 + 6 + 6 + 1);
    assert_eq!(counters.outstanding(), 0);
}

#[test]
fn test_missing_content_length_publishes_only_headers() {
    let transport = MemoryTransport::with_options(
        MEMORY_URL,
        pattern(10_000),
        MemoryOptions {
            send_content_length: false,
            ..Default::default()
        },
    );
    let mut session = Session::create(MEMORY_URL, transport, FetchConfig::default()).unwrap();

    assert_eq!(session.step().unwrap(), 0);
    assert_eq!(session.step().unwrap(), 0);
    assert_eq!(
        session.state(),
        &SessionState::Failed(FailureReason::UnknownContentLength)
    );

    let out = read_all(&mut session);
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(!text.contains("Content-Length"));
    assert_eq!(session.stats().waves_completed, 0);
    assert_eq!(session.pool_stats().allocated, 1);
}

#[test]
fn test_empty_window_never_shows_recycled_header_text() {
    let data = pattern(3_000);
    let options = MemoryOptions {
        slice_size: 100,
        truncate_range: Some((1_000, 0)),
        ..Default::default()
    };
    let config = FetchConfig {
        chunk_size: 1_000,
        max_parallel: 4,
        include_headers: true,
        ..Default::default()
    };
    let transport = MemoryTransport::with_options(MEMORY_URL, data.clone(), options.clone());
    let mut session = Session::create(MEMORY_URL, transport, config.clone()).unwrap();

    let out = read_all(&mut session);
    let body = &out[out.len() - data.len()..];
    assert!(out.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert_eq!(&body[..1_000], &data[..1_000]);
    assert!(body[1_000..1_250].iter().all(|&b| b == 0));
    assert_eq!(&body[1_250..], &data[1_250..]);
    assert_eq!(session.stats().short_waves, 1);
    // wave two reuses the header buffer, wave three reuses wave one's
    assert_eq!(session.pool_stats().recycled, 2);

    // Blocking readers refuse to report success for a gapped body
    let transport = MemoryTransport::with_options(MEMORY_URL, data, options);
    let mut stream = SessionStream::new(Session::create(MEMORY_URL, transport, config).unwrap());
    let mut sink = Vec::new();
    assert_err!(stream.read_to_end(&mut sink));
}

#[test]
fn test_fast_reader_sees_zero_until_first_wave() {
    let transport = MemoryTransport::new(MEMORY_URL, pattern(2_400_000));
    let config = FetchConfig {
        include_headers: false,
        ..Default::default()
    };
    let mut session = Session::create(MEMORY_URL, transport, config).unwrap();
    let mut buf = [0u8; 4096];

    assert_eq!(session.read(&mut buf).unwrap(), 0);

    let mut empty_reads = 0;
    loop {
        assert!(session.step().unwrap() > 0);
        let n = session.read(&mut buf).unwrap();
        if n > 0 {
            assert_eq!(n, buf.len());
            break;
        }
        empty_reads += 1;
    }

    assert!(empty_reads > 0);
    assert_eq!(session.stats().waves_completed, 1);
    assert_eq!(&buf[..], &pattern(4096)[..]);
}

#[test]
fn test_double_destroy_frees_once() {
    let transport = MemoryTransport::with_options(
        MEMORY_URL,
        pattern(3_000_000),
        MemoryOptions {
            slice_size: 100_000,
            ..Default::default()
        },
    );
    let counters = transport.counters();
    let mut session = Session::create(MEMORY_URL, transport, FetchConfig::default()).unwrap();
    for _ in 0..4 {
        session.step().unwrap();
    }

    session.destroy();
    let stats = session.pool_stats();
    session.destroy();
    drop(session);

    assert_eq!(stats.live(), 0);
    assert_eq!(stats.freed, stats.allocated);
    assert_eq!(counters.outstanding(), 0);
}

#[test]
fn test_transport_failure_mid_wave() {
    let transport = MemoryTransport::with_options(
        MEMORY_URL,
        pattern(2_000_000),
        MemoryOptions {
            slice_size: 10_000,
            // the first session step drives the transport twice
            fail_on_step: Some(4),
            ..Default::default()
        },
    );
    let mut session = Session::create(MEMORY_URL, transport, FetchConfig::default()).unwrap();

    assert_ok!(session.step());
    assert_ok!(session.step());
    assert_err!(session.step());
    assert_eq!(session.step().unwrap(), 0);
    assert!(matches!(
        session.state(),
        SessionState::Failed(FailureReason::Transport(_))
    ));
    // headers published before the failure stay readable
    assert!(session.read(&mut [0u8; 16]).unwrap() > 0);
    assert_eq!(session.stats().waves_completed, 0);
}

/// Local server answering HEAD plus one GET per planned range
struct RangeServer {
    server: MockServer,
    runtime: tokio::runtime::Runtime,
}

impl RangeServer {
    fn start() -> Self {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let server = runtime.block_on(MockServer::start());
        Self { server, runtime }
    }

    fn url(&self) -> String {
        format!("{}{}", self.server.uri(), MEDIA_PATH)
    }

    fn serve(&self, data: &[u8], chunk_size: usize, parallel: usize) {
        let total = data.len().to_string();
        self.runtime.block_on(
            Mock::given(method("HEAD"))
                .and(path(MEDIA_PATH))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("content-length", total.as_str())
                        .insert_header("accept-ranges", "bytes"),
                )
                .mount(&self.server),
        );

        for wave in Waves::new(data.len() as u64, chunk_size, parallel) {
            for window in wave.windows {
                let range = window.range;
                let body = data[range.start as usize..=range.end as usize].to_vec();
                let content_range = format!("bytes {}-{}/{}", range.start, range.end, data.len());
                self.runtime.block_on(
                    Mock::given(method("GET"))
                        .and(path(MEDIA_PATH))
                        .and(header("range", range.header_value().as_str()))
                        .respond_with(
                            ResponseTemplate::new(206)
                                .insert_header("content-range", content_range.as_str())
                                .set_body_bytes(body),
                        )
                        .expect(1)
                        .mount(&self.server),
                );
            }
        }
    }

    fn serve_missing(&self) {
        self.runtime.block_on(
            Mock::given(method("HEAD"))
                .respond_with(ResponseTemplate::new(404))
                .mount(&self.server),
        );
    }
}

fn http_config(include_headers: bool) -> FetchConfig {
    FetchConfig {
        chunk_size: 1000,
        max_parallel: 4,
        include_headers,
        poll_timeout_ms: 50,
        ..Default::default()
    }
}

#[test]
fn test_http_session_fetches_every_range_once() {
    let data = pattern(2_500);
    let server = RangeServer::start();
    server.serve(&data, 1000, 4);

    let config = http_config(false);
    let transport = HttpTransport::new(&config.transport).unwrap();
    let session = Session::create(&server.url(), transport, config).unwrap();
    let mut stream = SessionStream::new(session);

    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    assert_eq!(out, data);

    let session = stream.into_inner();
    assert_eq!(session.content_length(), 2_500);
    assert_eq!(session.stats().waves_completed, 3);
    assert_eq!(session.stats().short_waves, 0);
}

#[test]
fn test_http_session_includes_headers() {
    let data = pattern(2_500);
    let server = RangeServer::start();
    server.serve(&data, 1000, 4);

    let config = http_config(true);
    let transport = HttpTransport::new(&config.transport).unwrap();
    let session = Session::create(&server.url(), transport, config).unwrap();
    let mut stream = SessionStream::new(session);

    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();

    let split = out.len() - data.len();
    let head = String::from_utf8_lossy(&out[..split]).to_string();
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");
    assert!(head.contains("Content-Length: 2500\r\n"), "{head}");
    assert!(head.ends_with("\r\n\r\n"));
    assert_eq!(&out[split..], &data[..]);
}

#[test]
fn test_http_missing_resource_fails() {
    let server = RangeServer::start();
    server.serve_missing();

    let config = http_config(false);
    let transport = HttpTransport::new(&config.transport).unwrap();
    let session = Session::create(&server.url(), transport, config).unwrap();
    let mut stream = SessionStream::new(session);

    let mut out = Vec::new();
    let err = stream.read_to_end(&mut out).unwrap_err();
    assert!(err.to_string().contains("header request failed"), "{err}");
    assert!(matches!(
        stream.session().state(),
        SessionState::Failed(FailureReason::HeaderRequestFailed(_))
    ));
}

#[test]
fn test_downloader_writes_file_with_progress() {
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    let data = pattern(2_500);
    let server = RangeServer::start();
    server.serve(&data, 1000, 4);

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("clip.bin");
    let target = target.to_str().unwrap();

    let reported = Arc::new(AtomicU64::new(0));
    let options = rangefetch::DownloadOptions {
        progress: Some(Arc::new({
            let reported = Arc::clone(&reported);
            move |downloaded, _total| reported.store(downloaded, Ordering::SeqCst)
        })),
        ..Default::default()
    };

    let downloader = rangefetch::Downloader::with_config(http_config(false));
    let written = downloader
        .fetch_to_file(&server.url(), target, &options)
        .unwrap();

    assert_eq!(written, 2_500);
    assert_eq!(reported.load(Ordering::SeqCst), 2_500);
    assert_eq!(std::fs::read(target).unwrap(), data);
}

#[test]
fn test_cli_dry_run() {
    let output = Command::new(env!("CARGO_BIN_EXE_rangefetch"))
        .arg("--dry-run")
        .arg("https://cdn.example.com/media/movie.mp4")
        .output()
        .expect("Failed to run dry-run command");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "Dry run should succeed: {stderr}");
    assert!(stderr.contains("DRY RUN"));
    assert!(stderr.contains("movie.mp4"));
}

#[test]
fn test_cli_rejects_unsupported_scheme() {
    let output = Command::new(env!("CARGO_BIN_EXE_rangefetch"))
        .arg("ftp://example.com/file")
        .output()
        .expect("Failed to run rangefetch");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success());
    assert!(stderr.contains("Invalid URL"), "{stderr}");
}

#[test]
fn test_cli_fetches_to_file() {
    let data = pattern(2_500);
    let server = RangeServer::start();
    server.serve(&data, 1000, 4);

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.bin");

    let output = Command::new(env!("CARGO_BIN_EXE_rangefetch"))
        .arg(server.url())
        .arg(&target)
        .args(["--chunk-size", "1000", "-p", "4", "--force"])
        .output()
        .expect("Failed to run rangefetch");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "rangefetch failed: {stderr}");
    assert!(stderr.contains("Saving to"));
    assert_eq!(std::fs::read(&target).unwrap(), data);
}
