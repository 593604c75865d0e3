//! Raw response header line handling
//!
//! Header lines arrive one at a time, CRLF-terminated, exactly as they would
//! appear on the wire.

/// Header name matched when discovering the resource length
pub const CONTENT_LENGTH_TOKEN: &[u8] = b"Content-Length:";

/// Extract the Content-Length value from a single header line.
///
/// Matching is case-sensitive. The value starts right after the token and
/// surrounding whitespace is ignored; only the leading run of digits counts.
pub fn parse_content_length(line: &[u8]) -> Option<u64> {
    let start = find(line, CONTENT_LENGTH_TOKEN)? + CONTENT_LENGTH_TOKEN.len();
    let value = trim_ascii(&line[start..]);

    let digits = value.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }

    std::str::from_utf8(&value[..digits]).ok()?.parse().ok()
}

/// The blank line that terminates a header block
pub fn is_header_end(line: &[u8]) -> bool {
    line == b"\r\n"
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}
