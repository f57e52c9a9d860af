/*!
Response encoder: fixed-length JSON responses and chunked SSE streams.

Every response carries the CORS headers. Fixed-length responses close the connection; SSE
streams are sent with chunked transfer encoding, one SSE frame per chunk, and end with the
zero-length chunk after `data: [DONE]`.
*/
use std::io::{self, Write};

use serde_json::Value;

use crate::errors::GatewayError;

pub const CORS_HEADERS: &[(&str, &str)] = &[
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
    (
        "Access-Control-Allow-Headers",
        "Content-Type, Authorization, X-Requested-With",
    ),
    ("Access-Control-Max-Age", "86400"),
];

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json(status: u16, value: &Value) -> Self {
        Response {
            status,
            content_type: Some("application/json"),
            headers: Vec::new(),
            body: value.to_string().into_bytes(),
        }
    }

    pub fn error(err: &GatewayError) -> Self {
        Response::json(err.status_code(), &err.envelope())
    }

    /// Empty 204 for `OPTIONS`.
    pub fn preflight() -> Self {
        Response {
            status: 204,
            content_type: None,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status,
            reason_phrase(self.status)
        );
        if let Some(ct) = self.content_type {
            head.push_str(&format!("Content-Type: {ct}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str("Connection: close\r\n");
        for (k, v) in CORS_HEADERS {
            head.push_str(&format!("{k}: {v}\r\n"));
        }
        for (k, v) in &self.headers {
            head.push_str(&format!("{k}: {v}\r\n"));
        }
        head.push_str("\r\n");
        w.write_all(head.as_bytes())?;
        w.write_all(&self.body)?;
        w.flush()
    }
}

/// SSE stream over chunked transfer encoding.
pub struct SseWriter<'a, W: Write> {
    w: &'a mut W,
}

impl<'a, W: Write> SseWriter<'a, W> {
    /// Write the status line and SSE headers.
    pub fn start(w: &'a mut W) -> io::Result<Self> {
        let mut head = String::from(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\nX-Accel-Buffering: no\r\nTransfer-Encoding: chunked\r\n",
        );
        for (k, v) in CORS_HEADERS {
            head.push_str(&format!("{k}: {v}\r\n"));
        }
        head.push_str("\r\n");
        w.write_all(head.as_bytes())?;
        w.flush()?;
        Ok(SseWriter { w })
    }

    fn chunk(&mut self, frame: &[u8]) -> io::Result<()> {
        write!(self.w, "{:X}\r\n", frame.len())?;
        self.w.write_all(frame)?;
        self.w.write_all(b"\r\n")?;
        self.w.flush()
    }

    /// `data: <json>\n\n`
    pub fn event(&mut self, payload: &Value) -> io::Result<()> {
        self.chunk(format!("data: {payload}\n\n").as_bytes())
    }

    /// `: <text>\n\n`, ignored by SSE clients; keeps idle intermediaries from timing out.
    pub fn comment(&mut self, text: &str) -> io::Result<()> {
        self.chunk(format!(": {text}\n\n").as_bytes())
    }

    pub fn error(&mut self, err: &GatewayError) -> io::Result<()> {
        self.event(&err.envelope())
    }

    /// `data: [DONE]` followed by the terminating chunk.
    pub fn done(mut self) -> io::Result<()> {
        self.chunk(b"data: [DONE]\n\n")?;
        self.w.write_all(b"0\r\n\r\n")?;
        self.w.flush()
    }
}
