//! HTTP/1.1 request-level framing
//!
//! This is framing only: find the header terminator, split the request line and headers,
//! and enforce a maximum line length. It does not buffer request bodies: handlers see
//! only headers.

pub mod response;
pub mod status;

use std::fmt;

/// Default maximum length of a single header line (including the request line)
pub const DEFAULT_MAX_LINE_LEN: usize = 8192;

/// Failure categories for request framing "Protocol framing".
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// A line exceeded the configured maximum length before a CRLF was found.
    #[error("header line too long")]
    LineTooLong,
    /// The request method was missing or not one of GET/POST.
    #[error("unsupported or malformed method")]
    Method,
    /// The request target was missing or malformed.
    #[error("malformed request target")]
    Target,
    /// The HTTP version token was missing or malformed.
    #[error("malformed http version")]
    Version,
    /// A header line had no `:` separator.
    #[error("malformed header line")]
    Header,
}

/// The two methods this core accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
        })
    }
}

/// HTTP version token from the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// HTTP/1.0
    Http10,
    /// HTTP/1.1
    Http11,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        })
    }
}

/// A single header, preserving the case it arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header<'a> {
    /// Header name, exactly as received.
    pub name: &'a str,
    /// Header value, with leading/trailing optional whitespace (OWS) stripped.
    pub value: &'a str,
}

/// A successfully framed request, borrowing from the connection's input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    /// The request method.
    pub method: Method,
    /// The request target (path + optional query), as received.
    pub target: &'a str,
    /// The declared HTTP version.
    pub version: Version,
    /// Headers in receipt order, case-preserving.
    pub headers: Vec<Header<'a>>,
    /// Total bytes consumed from the front of the input buffer, including the
    /// terminating CRLFCRLF. The caller must remove exactly this many bytes.
    pub consumed: usize,
}

impl<'a> Request<'a> {
    /// Looks up a header by name, case-insensitively, per RFC 9110 field-name semantics.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value)
    }

    /// Whether the client asked to close the connection after this response: HTTP/1.1
    /// defaults to keep-alive unless `Connection: close` is present; HTTP/1.0 defaults to
    /// close unless `Connection: keep-alive` is present.
    pub fn wants_close(&self) -> bool {
        match self.header("Connection").map(|v| v.to_ascii_lowercase()) {
            Some(v) if v == "close" => true,
            Some(v) if v == "keep-alive" => false,
            _ => self.version == Version::Http10,
        }
    }
}

/// Outcome of attempting to frame a request out of a byte buffer.
#[derive(Debug)]
pub enum ParseOutcome<'a> {
    /// Not enough bytes buffered yet; no error, wait for more reads.
    Incomplete,
    /// A full request was framed.
    Complete(Request<'a>),
}

/// Attempts to frame one HTTP/1.1 request from the front of `buf`.
///
/// `max_line_len` bounds the request line and each header line; exceeding it before a
/// CRLF is seen is a [`FramingError::LineTooLong`].
pub fn parse_request(buf: &[u8], max_line_len: usize) -> Result<ParseOutcome<'_>, FramingError> {
    let Some(header_end) = find_header_terminator(buf) else {
        if longest_unterminated_line(buf) > max_line_len {
            return Err(FramingError::LineTooLong);
        }
        return Ok(ParseOutcome::Incomplete);
    };

    // `header_end` points at the start of the terminating CRLFCRLF.
    let consumed = header_end + 4;
    let head = &buf[..header_end];

    let mut lines = head.split(|&b| b == b'\n').map(strip_trailing_cr);

    let request_line = lines.next().unwrap_or(b"");
    if request_line.len() > max_line_len {
        return Err(FramingError::LineTooLong);
    }
    let (method, target, version) = parse_request_line(request_line)?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.len() > max_line_len {
            return Err(FramingError::LineTooLong);
        }
        headers.push(parse_header_line(line)?);
    }

    Ok(ParseOutcome::Complete(Request {
        method,
        target,
        version,
        headers,
        consumed,
    }))
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Length of the longest line seen so far that has no terminating CRLF yet, used to
/// detect an over-long line before its terminator has arrived.
fn longest_unterminated_line(buf: &[u8]) -> usize {
    buf.split(|&b| b == b'\n')
        .last()
        .map(|l| l.len())
        .unwrap_or(0)
}

fn strip_trailing_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((&b'\r', rest)) => rest,
        _ => line,
    }
}

fn parse_request_line(line: &[u8]) -> Result<(Method, &str, Version), FramingError> {
    let mut parts = line.splitn(3, |&b| b == b' ');
    let method_bytes = parts.next().ok_or(FramingError::Method)?;
    let target_bytes = parts.next().ok_or(FramingError::Target)?;
    let version_bytes = parts.next().ok_or(FramingError::Version)?;

    let method = match method_bytes {
        b"GET" => Method::Get,
        b"POST" => Method::Post,
        _ => return Err(FramingError::Method),
    };

    if target_bytes.is_empty() || !target_bytes.iter().all(|&b| b.is_ascii_graphic()) {
        return Err(FramingError::Target);
    }
    // Safety-free: validated ASCII-graphic above, so this is valid UTF-8.
    let target = std::str::from_utf8(target_bytes).map_err(|_| FramingError::Target)?;

    let version = match version_bytes {
        b"HTTP/1.0" => Version::Http10,
        b"HTTP/1.1" => Version::Http11,
        _ => return Err(FramingError::Version),
    };

    Ok((method, target, version))
}

fn parse_header_line(line: &[u8]) -> Result<Header<'_>, FramingError> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(FramingError::Header)?;
    let (name, rest) = line.split_at(colon);
    let value = &rest[1..];
    let value = trim_ows(value);

    let name = std::str::from_utf8(name).map_err(|_| FramingError::Header)?;
    let value = std::str::from_utf8(value).map_err(|_| FramingError::Header)?;

    if name.is_empty() {
        return Err(FramingError::Header);
    }

    Ok(Header { name, value })
}

fn trim_ows(value: &[u8]) -> &[u8] {
    let start = value
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .unwrap_or(value.len());
    let end = value
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map(|i| i + 1)
        .unwrap_or(start);
    &value[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        match parse_request(buf, DEFAULT_MAX_LINE_LEN).unwrap() {
            ParseOutcome::Complete(req) => {
                assert_eq!(req.method, Method::Get);
                assert_eq!(req.target, "/");
                assert_eq!(req.version, Version::Http11);
                assert_eq!(req.header("host"), Some("x"));
                assert_eq!(req.consumed, buf.len());
            }
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn incomplete_without_terminator() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\n";
        assert!(matches!(
            parse_request(buf, DEFAULT_MAX_LINE_LEN).unwrap(),
            ParseOutcome::Incomplete
        ));
    }

    #[test]
    fn rejects_unsupported_method() {
        let buf = b"DELETE / HTTP/1.1\r\n\r\n";
        assert_eq!(
            parse_request(buf, DEFAULT_MAX_LINE_LEN).unwrap_err(),
            FramingError::Method
        );
    }

    #[test]
    fn rejects_malformed_version() {
        let buf = b"GET / FOO\r\n\r\n";
        assert_eq!(
            parse_request(buf, DEFAULT_MAX_LINE_LEN).unwrap_err(),
            FramingError::Version
        );
    }

    #[test]
    fn line_at_exactly_max_len_is_accepted() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"GET /");
        buf.extend(std::iter::repeat(b'a').take(DEFAULT_MAX_LINE_LEN - b"GET / HTTP/1.1".len()));
        buf.extend_from_slice(b" HTTP/1.1\r\n\r\n");
        let request_line_len = buf.iter().position(|&b| b == b'\r').unwrap();
        assert_eq!(request_line_len, DEFAULT_MAX_LINE_LEN);
        assert!(matches!(
            parse_request(&buf, DEFAULT_MAX_LINE_LEN).unwrap(),
            ParseOutcome::Complete(_)
        ));
    }

    #[test]
    fn line_over_max_len_without_crlf_errors() {
        let buf = vec![b'a'; DEFAULT_MAX_LINE_LEN + 1];
        assert_eq!(
            parse_request(&buf, DEFAULT_MAX_LINE_LEN).unwrap_err(),
            FramingError::LineTooLong
        );
    }

    #[test]
    fn pipelined_requests_consume_only_first() {
        let buf = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        match parse_request(buf, DEFAULT_MAX_LINE_LEN).unwrap() {
            ParseOutcome::Complete(req) => {
                assert_eq!(req.target, "/a");
                let rest = &buf[req.consumed..];
                match parse_request(rest, DEFAULT_MAX_LINE_LEN).unwrap() {
                    ParseOutcome::Complete(req2) => assert_eq!(req2.target, "/b"),
                    ParseOutcome::Incomplete => panic!("expected second request"),
                }
            }
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn keep_alive_defaults_by_version() {
        let h11 = b"GET / HTTP/1.1\r\n\r\n";
        let h10 = b"GET / HTTP/1.0\r\n\r\n";
        let ParseOutcome::Complete(r11) = parse_request(h11, DEFAULT_MAX_LINE_LEN).unwrap() else {
            panic!()
        };
        let ParseOutcome::Complete(r10) = parse_request(h10, DEFAULT_MAX_LINE_LEN).unwrap() else {
            panic!()
        };
        assert!(!r11.wants_close());
        assert!(r10.wants_close());
    }
}
