//! Stub HTTP server for integration testing
//!
//! Answers just enough HTTP/1.1 to satisfy the built-in contracts, so the
//! harness can be exercised end to end without the real server.
//!
//! Usage: `webserv-stub [PORT]` (default 8080)

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::time::Duration;

/// Longest accepted request target
const MAX_URI_LEN: usize = 1024;

/// Largest accepted request body
const MAX_BODY_LEN: usize = 100_000;

/// Largest accepted request head
const MAX_HEAD_LEN: usize = 16 * 1024;

const IMPLEMENTED: &[&str] = &["GET", "POST", "DELETE"];
const KNOWN: &[&str] = &["GET", "POST", "DELETE", "HEAD", "PUT", "PATCH", "OPTIONS", "CONNECT", "TRACE"];

fn main() {
    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("webserv-stub: cannot bind port {}: {}", port, e);
            std::process::exit(1);
        }
    };

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                std::thread::spawn(move || handle(stream));
            }
            Err(e) => eprintln!("webserv-stub: accept failed: {}", e),
        }
    }
}

struct Request {
    method: String,
    target: String,
    content_length: usize,
    /// Body bytes that arrived together with the head
    body_start: Vec<u8>,
}

fn handle(mut stream: TcpStream) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

    let Some(request) = read_head(&mut stream) else {
        let _ = respond(&mut stream, 400, "Bad Request", "");
        return;
    };

    if !KNOWN.contains(&request.method.as_str()) {
        let _ = respond(&mut stream, 405, "Method Not Allowed", "");
        return;
    }
    if !IMPLEMENTED.contains(&request.method.as_str()) {
        let _ = respond(&mut stream, 501, "Not Implemented", "");
        return;
    }
    if request.target.len() > MAX_URI_LEN {
        let _ = respond(&mut stream, 414, "URI Too Long", "");
        return;
    }
    if request.content_length > MAX_BODY_LEN {
        // Answer before the body, then drain it so the close is not a reset
        let _ = respond(&mut stream, 413, "Payload Too Large", "");
        let _ = stream.shutdown(Shutdown::Write);
        drain(&mut stream);
        return;
    }

    let mut remaining = request.content_length.saturating_sub(request.body_start.len());
    let mut buf = [0u8; 8192];
    while remaining > 0 {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => remaining = remaining.saturating_sub(n),
        }
    }

    let _ = match (request.method.as_str(), request.target.as_str()) {
        ("GET", "/hello.py") => respond(&mut stream, 200, "OK", "Hello, world!\n"),
        ("POST", "/upload") => respond(&mut stream, 201, "Created", "Created\n"),
        _ => respond(&mut stream, 200, "OK", "OK\n"),
    };
}

fn read_head(stream: &mut TcpStream) -> Option<Request> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if data.len() > MAX_HEAD_LEN {
            return None;
        }
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return None,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    };

    let head = String::from_utf8_lossy(&data[..head_end]).into_owned();
    let mut lines = head.lines();
    let mut parts = lines.next()?.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0);

    Some(Request {
        method,
        target,
        content_length,
        body_start: data[head_end..].to_vec(),
    })
}

fn respond(stream: &mut TcpStream, code: u16, reason: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        code,
        reason,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()
}

fn drain(stream: &mut TcpStream) {
    let mut buf = [0u8; 8192];
    while let Ok(n) = stream.read(&mut buf) {
        if n == 0 {
            break;
        }
    }
}
