/*!
Test support helpers shared across integration tests.

- start_gateway(brain, tweak): bind on an ephemeral port with a temp workspace
- FixedBrain / SlowBrain / FailingBrain: deterministic backends
- http_request(port, method, path, headers, body): raw HTTP/1.1 over TCP returning (status, headers, body)
- dechunk(body) / sse_data(body): decode a chunked SSE reply into its `data:` payloads
- have_git(): check git availability on PATH

Helpers do not print skip messages themselves so tests keep their own "skipping: ..." lines.
*/

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use aifo_gateway::{gateway_start, Brain, GatewayConfig, GatewayHandle};

/// Replies with the same text every time.
#[allow(dead_code)]
pub struct FixedBrain(pub String);

impl Brain for FixedBrain {
    fn health_check(&self) -> bool {
        true
    }

    fn process(&self, _text: &str) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

/// Sleeps before answering; used to trip the deadline supervisor.
#[allow(dead_code)]
pub struct SlowBrain(pub Duration);

impl Brain for SlowBrain {
    fn health_check(&self) -> bool {
        thread::sleep(self.0);
        true
    }

    fn process(&self, text: &str) -> anyhow::Result<String> {
        thread::sleep(self.0);
        Ok(text.to_string())
    }
}

#[allow(dead_code)]
pub struct FailingBrain;

impl Brain for FailingBrain {
    fn health_check(&self) -> bool {
        false
    }

    fn process(&self, _text: &str) -> anyhow::Result<String> {
        anyhow::bail!("backend exploded")
    }
}

/// Start a gateway on 127.0.0.1:0 with a fresh temp workspace. `tweak` adjusts the config
/// before binding.
#[allow(dead_code)]
pub fn start_gateway<F>(brain: Arc<dyn Brain>, tweak: F) -> (GatewayHandle, tempfile::TempDir)
where
    F: FnOnce(&mut GatewayConfig),
{
    let td = tempfile::tempdir().expect("tmpdir");
    let mut cfg = GatewayConfig {
        port: 0,
        workspace: td.path().to_path_buf(),
        stream_delay: Duration::from_millis(0),
        read_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    tweak(&mut cfg);
    let handle = gateway_start(cfg, brain).expect("gateway start");
    (handle, td)
}

/// Minimal raw HTTP helper over TCP returning (status, headers, body). Reads to EOF.
#[allow(dead_code)]
pub fn http_request(
    port: u16,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> (u16, String, Vec<u8>) {
    let mut req = format!(
        "{method} {path} HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n"
    );
    if !body.is_empty() || method == "POST" {
        req.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    for (k, v) in headers {
        req.push_str(&format!("{k}: {v}\r\n"));
    }
    req.push_str("\r\n");
    let mut raw = req.into_bytes();
    raw.extend_from_slice(body);
    send_raw(port, &raw)
}

/// Write `raw` as-is and parse whatever comes back.
#[allow(dead_code)]
pub fn send_raw(port: u16, raw: &[u8]) -> (u16, String, Vec<u8>) {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect failed");
    stream
        .set_read_timeout(Some(Duration::from_secs(20)))
        .expect("set timeout");
    stream.write_all(raw).expect("write failed");
    read_response(&mut stream)
}

#[allow(dead_code)]
pub fn read_response(stream: &mut TcpStream) -> (u16, String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        match stream.read(&mut tmp) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
            Err(_) => break,
        }
    }
    let pos = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or(buf.len());
    let head = String::from_utf8_lossy(&buf[..pos]).to_string();
    let body = buf.get(pos + 4..).map(|b| b.to_vec()).unwrap_or_default();
    let status = head
        .lines()
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);
    (status, head, body)
}

/// Case-insensitive header lookup in a raw header block.
#[allow(dead_code)]
pub fn header_value(head: &str, name: &str) -> Option<String> {
    head.lines().skip(1).find_map(|l| {
        let (k, v) = l.split_once(':')?;
        k.trim()
            .eq_ignore_ascii_case(name)
            .then(|| v.trim().to_string())
    })
}

/// Decode a chunked transfer-encoded body.
#[allow(dead_code)]
pub fn dechunk(mut body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let Some(eol) = body.windows(2).position(|w| w == b"\r\n") else {
            break;
        };
        let size_line = String::from_utf8_lossy(&body[..eol]).to_string();
        let size = usize::from_str_radix(size_line.trim(), 16).unwrap_or(0);
        body = &body[eol + 2..];
        if size == 0 || body.len() < size {
            break;
        }
        out.extend_from_slice(&body[..size]);
        body = body.get(size + 2..).unwrap_or(&[]);
    }
    out
}

/// `data:` payloads of an SSE stream, in order.
#[allow(dead_code)]
pub fn sse_data(chunked_body: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(&dechunk(chunked_body)).to_string();
    text.split("\n\n")
        .filter_map(|event| event.strip_prefix("data: "))
        .map(|s| s.to_string())
        .collect()
}

/// Return true if `git` is available on PATH.
#[allow(dead_code)]
pub fn have_git() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
