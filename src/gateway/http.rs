/*!
HTTP/1.1 request reader over any `Read + Write` stream.

- Reads bounded chunks until the header terminator (CRLFCRLF, LFLF tolerated) is found.
- `Content-Length` absent means an empty body; a declared length above the ceiling fails with 413
  before any body byte is read.
- `Expect: 100-continue` gets an interim `100 Continue` when the body is not already buffered.
- The request is only returned once exactly `Content-Length` body bytes are accumulated. A peer
  closing early yields `ReadOutcome::Closed`, which is a normal end, not an error.
- Interrupted reads are retried; a read timeout ends the connection quietly.
*/
use std::collections::HashMap;
use std::io::{self, Read, Write};

use crate::errors::GatewayError;
use crate::util::find_header_end_from;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Options,
    Other(String),
}

impl Method {
    fn parse(token: &str) -> Method {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "OPTIONS" => Method::Options,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Options => "OPTIONS",
            Method::Other(s) => s,
        }
    }
}

/// Case-insensitive header map (keys lowercased).
pub type HeaderMap = HashMap<String, String>;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Path without the query string, case preserved.
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[derive(Debug)]
pub enum ReadOutcome {
    Request(HttpRequest),
    /// Peer went away (or idled out) before a full request arrived.
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct ReaderLimits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for ReaderLimits {
    fn default() -> Self {
        ReaderLimits {
            max_header_bytes: 64 * 1024,
            max_body_bytes: 5_000_000,
        }
    }
}

enum Chunk {
    Data(usize),
    Eof,
}

fn read_chunk<S: Read>(stream: &mut S, tmp: &mut [u8]) -> Chunk {
    loop {
        match stream.read(tmp) {
            Ok(0) => return Chunk::Eof,
            Ok(n) => return Chunk::Data(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                match e.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                        tracing::debug!("http: read timed out");
                    }
                    _ => tracing::debug!(error = %e, "http: read failed"),
                }
                return Chunk::Eof;
            }
        }
    }
}

fn parse_request_line(line: &str) -> Result<(Method, String, Option<String>), GatewayError> {
    let malformed = || GatewayError::BadRequest(format!("malformed request line: {line:?}"));
    let mut parts = line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v), None) => (m, t, v),
        _ => return Err(malformed()),
    };
    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(malformed());
    }
    if !version.starts_with("HTTP/1.") {
        return Err(malformed());
    }
    if !(target.starts_with('/') || target == "*") {
        return Err(malformed());
    }
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (target.to_string(), None),
    };
    Ok((Method::parse(method), path, query))
}

fn parse_headers<'a, I: Iterator<Item = &'a str>>(lines: I) -> Result<HeaderMap, GatewayError> {
    let mut map = HeaderMap::new();
    for line in lines {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (k, v) = line
            .split_once(':')
            .ok_or_else(|| GatewayError::BadRequest(format!("malformed header line: {line:?}")))?;
        let key = k.trim().to_ascii_lowercase();
        let value = v.trim().to_string();
        if key == "content-length" {
            if let Some(prev) = map.get(&key) {
                if *prev != value {
                    return Err(GatewayError::BadRequest(
                        "conflicting Content-Length headers".into(),
                    ));
                }
            }
        }
        map.insert(key, value);
    }
    Ok(map)
}

/// Read one request. `stream` is also written to for the interim `100 Continue`.
pub fn read_request<S: Read + Write>(
    stream: &mut S,
    limits: &ReaderLimits,
) -> Result<ReadOutcome, GatewayError> {
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut tmp = [0u8; READ_CHUNK];

    let mut scanned = 0usize;
    let header_end = loop {
        if let Some(end) = find_header_end_from(&buf, scanned) {
            break end;
        }
        scanned = buf.len();
        if buf.len() > limits.max_header_bytes {
            return Err(GatewayError::HeadersTooLarge);
        }
        match read_chunk(stream, &mut tmp) {
            Chunk::Data(n) => buf.extend_from_slice(&tmp[..n]),
            Chunk::Eof => return Ok(ReadOutcome::Closed),
        }
    };
    if header_end > limits.max_header_bytes {
        return Err(GatewayError::HeadersTooLarge);
    }

    let head = std::str::from_utf8(&buf[..header_end])
        .map_err(|_| GatewayError::BadRequest("request headers are not valid UTF-8".into()))?;
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default().trim();
    let (method, path, query) = parse_request_line(request_line)?;
    let headers = parse_headers(lines)?;

    if headers
        .get("transfer-encoding")
        .is_some_and(|te| !te.eq_ignore_ascii_case("identity"))
    {
        return Err(GatewayError::BadRequest(
            "Transfer-Encoding bodies are not supported; send Content-Length".into(),
        ));
    }

    let content_length = match headers.get("content-length") {
        None => 0,
        Some(v) if !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()) => v
            .parse::<usize>()
            .map_err(|_| GatewayError::BadRequest(format!("invalid Content-Length: {v:?}")))?,
        Some(v) => {
            return Err(GatewayError::BadRequest(format!(
                "invalid Content-Length: {v:?}"
            )))
        }
    };
    if content_length > limits.max_body_bytes {
        return Err(GatewayError::PayloadTooLarge {
            limit: limits.max_body_bytes,
            declared: content_length,
        });
    }

    let mut body: Vec<u8> = buf[header_end..].to_vec();
    let expects_continue = headers
        .get("expect")
        .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"));
    if expects_continue && body.len() < content_length {
        let interim = stream
            .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
            .and_then(|_| stream.flush());
        if let Err(e) = interim {
            tracing::debug!(error = %e, "http: failed to send 100 Continue");
            return Ok(ReadOutcome::Closed);
        }
    }

    body.reserve(content_length.saturating_sub(body.len()));
    while body.len() < content_length {
        let want = (content_length - body.len()).min(READ_CHUNK);
        match read_chunk(stream, &mut tmp[..want]) {
            Chunk::Data(n) => body.extend_from_slice(&tmp[..n]),
            Chunk::Eof => {
                tracing::debug!(
                    expected = content_length,
                    received = body.len(),
                    "http: peer closed mid-body"
                );
                return Ok(ReadOutcome::Closed);
            }
        }
    }
    // No pipelining: anything past the declared length is dropped.
    body.truncate(content_length);

    Ok(ReadOutcome::Request(HttpRequest {
        method,
        path,
        query,
        headers,
        body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Serves pre-split chunks, interleaving an `Interrupted` error before each one.
    struct ChunkedStream {
        chunks: VecDeque<Vec<u8>>,
        interrupt_next: bool,
        consumed: usize,
        written: Vec<u8>,
    }

    impl ChunkedStream {
        fn new(data: &[u8], chunk: usize) -> Self {
            ChunkedStream {
                chunks: data.chunks(chunk).map(|c| c.to_vec()).collect(),
                interrupt_next: true,
                consumed: 0,
                written: Vec::new(),
            }
        }
    }

    impl Read for ChunkedStream {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            if self.interrupt_next && !self.chunks.is_empty() {
                self.interrupt_next = false;
                return Err(io::Error::new(io::ErrorKind::Interrupted, "signal"));
            }
            self.interrupt_next = true;
            let Some(mut front) = self.chunks.pop_front() else {
                return Ok(0);
            };
            let n = front.len().min(out.len());
            out[..n].copy_from_slice(&front[..n]);
            if n < front.len() {
                self.chunks.push_front(front.split_off(n));
            }
            self.consumed += n;
            Ok(n)
        }
    }

    impl Write for ChunkedStream {
        fn write(&mut self, b: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(b);
            Ok(b.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn request(body: &str, extra: &str) -> Vec<u8> {
        format!(
            "POST /v1/chat/completions?x=1 HTTP/1.1\r\nHost: t\r\n{extra}Content-Length: {}\r\n\r\n{body}",
            body.len()
        )
        .into_bytes()
    }

    #[test]
    fn test_body_accumulates_across_any_chunk_size() {
        let body = r#"{"messages":[{"role":"user","content":"ping"}]}"#;
        let raw = request(body, "");
        for size in 1..=raw.len() {
            let mut s = ChunkedStream::new(&raw, size);
            match read_request(&mut s, &ReaderLimits::default()).unwrap() {
                ReadOutcome::Request(req) => {
                    assert_eq!(req.method, Method::Post);
                    assert_eq!(req.path, "/v1/chat/completions");
                    assert_eq!(req.query.as_deref(), Some("x=1"));
                    assert_eq!(req.body, body.as_bytes(), "chunk size {size}");
                }
                ReadOutcome::Closed => panic!("closed at chunk size {size}"),
            }
            assert_eq!(s.consumed, raw.len());
        }
    }

    #[test]
    fn test_early_close_is_not_dispatched() {
        let raw = request("0123456789", "");
        let cut = &raw[..raw.len() - 3];
        let mut s = ChunkedStream::new(cut, 7);
        assert!(matches!(
            read_request(&mut s, &ReaderLimits::default()).unwrap(),
            ReadOutcome::Closed
        ));
        let mut empty = ChunkedStream::new(b"", 1);
        assert!(matches!(
            read_request(&mut empty, &ReaderLimits::default()).unwrap(),
            ReadOutcome::Closed
        ));
    }

    #[test]
    fn test_oversized_body_rejected_before_reading_it() {
        let head = b"POST /x HTTP/1.1\r\nContent-Length: 5000001\r\n\r\n".to_vec();
        let mut raw = head.clone();
        raw.extend(std::iter::repeat(b'a').take(8192));
        let mut s = ChunkedStream::new(&raw, head.len());
        let err = read_request(&mut s, &ReaderLimits::default()).unwrap_err();
        assert_eq!(err.status_code(), 413);
        assert_eq!(s.consumed, head.len());
    }

    #[test]
    fn test_body_at_ceiling_is_accepted() {
        let limits = ReaderLimits {
            max_header_bytes: 1024,
            max_body_bytes: 16,
        };
        let raw = request("0123456789abcdef", "");
        let mut s = ChunkedStream::new(&raw, 5);
        assert!(matches!(
            read_request(&mut s, &limits).unwrap(),
            ReadOutcome::Request(_)
        ));
        let raw = request("0123456789abcdefg", "");
        let mut s = ChunkedStream::new(&raw, 5);
        assert_eq!(read_request(&mut s, &limits).unwrap_err().status_code(), 413);
    }

    #[test]
    fn test_expect_continue_only_when_body_pending() {
        let body = "hello";
        let raw = request(body, "Expect: 100-continue\r\n");
        let header_len = raw.len() - body.len();

        let mut split = ChunkedStream::new(&raw, header_len);
        assert!(matches!(
            read_request(&mut split, &ReaderLimits::default()).unwrap(),
            ReadOutcome::Request(_)
        ));
        assert_eq!(split.written, b"HTTP/1.1 100 Continue\r\n\r\n");

        let mut whole = ChunkedStream::new(&raw, raw.len());
        read_request(&mut whole, &ReaderLimits::default()).unwrap();
        assert!(whole.written.is_empty());
    }

    #[test]
    fn test_malformed_inputs_are_400() {
        let cases: [&[u8]; 8] = [
            b"garbage\r\n\r\n",
            b"GET /x\r\n\r\n",
            b"GET x HTTP/1.1\r\n\r\n",
            b"GET /x HTTP/1.1\r\nno-colon-here\r\n\r\n",
            b"POST /x HTTP/1.1\r\nContent-Length: ten\r\n\r\n",
            b"POST /x HTTP/1.1\r\nContent-Length: +3\r\n\r\nabc",
            b"POST /x HTTP/1.1\r\nContent-Length: -1\r\n\r\n",
            b"POST /x HTTP/1.1\r\nContent-Length:\r\n\r\n",
        ];
        for raw in cases {
            let mut s = ChunkedStream::new(raw, 64);
            let err = read_request(&mut s, &ReaderLimits::default()).unwrap_err();
            assert_eq!(err.status_code(), 400, "{:?}", String::from_utf8_lossy(raw));
        }
        let mut s = ChunkedStream::new(b"GET /\xff HTTP/1.1\r\n\r\n", 64);
        assert_eq!(
            read_request(&mut s, &ReaderLimits::default())
                .unwrap_err()
                .status_code(),
            400
        );
    }

    #[test]
    fn test_header_cap_is_431() {
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..3000 {
            raw.extend_from_slice(format!("X-Pad-{i}: aaaaaaaaaaaaaaaaaaaa\r\n").as_bytes());
        }
        raw.extend_from_slice(b"\r\n");
        let mut s = ChunkedStream::new(&raw, 4096);
        let err = read_request(&mut s, &ReaderLimits::default()).unwrap_err();
        assert_eq!(err.status_code(), 431);
    }

    #[test]
    fn test_header_flood_one_byte_at_a_time_stays_linear() {
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        let mut i = 0;
        while raw.len() <= 64 * 1024 + 64 {
            raw.extend_from_slice(format!("X-Pad-{i}: aaaaaaaaaaaaaaaaaaaa\r\n").as_bytes());
            i += 1;
        }
        let mut s = ChunkedStream::new(&raw, 1);
        let started = std::time::Instant::now();
        let err = read_request(&mut s, &ReaderLimits::default()).unwrap_err();
        assert_eq!(err.status_code(), 431);
        assert!(
            started.elapsed() < std::time::Duration::from_secs(2),
            "header scan took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn test_lf_only_headers_with_crlf_in_body() {
        let raw = b"POST /x HTTP/1.1\nContent-Length: 6\n\nab\r\n\r\n";
        let mut s = ChunkedStream::new(raw, 4);
        match read_request(&mut s, &ReaderLimits::default()).unwrap() {
            ReadOutcome::Request(req) => assert_eq!(req.body, b"ab\r\n\r\n"),
            ReadOutcome::Closed => panic!("expected request"),
        }
    }

    #[test]
    fn test_lf_only_and_absent_length() {
        let mut s = ChunkedStream::new(b"OPTIONS /anything HTTP/1.1\nOrigin: x\n\n", 3);
        match read_request(&mut s, &ReaderLimits::default()).unwrap() {
            ReadOutcome::Request(req) => {
                assert_eq!(req.method, Method::Options);
                assert!(req.body.is_empty());
                assert_eq!(req.header("ORIGIN"), Some("x"));
            }
            ReadOutcome::Closed => panic!("expected request"),
        }
    }
}
