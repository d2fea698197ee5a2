//! Built-in contracts
//!
//! Each contract is a fixed request with a literal expectation. The
//! expectations are matched exactly, so a server answering
//! `HTTP/1.1 405 Method not allowed` fails the unknown-method contract.

use std::time::Duration;

use super::config::ProbeExpectation;
use super::{Assertion, Check};
use crate::probe::{ProbeRequest, Segment};

/// Filler length for the URI contract
pub const LONG_URI_LEN: usize = 1100;

/// Body length for the payload contract
pub const LARGE_BODY_LEN: usize = 1_000_000;

/// Load window for the sustained load contract
pub const LOAD_WINDOW: Duration = Duration::from_secs(10);

const HOST_LINE: &str = "Host: localhost\r\n";

/// A named built-in check
#[derive(Debug)]
pub struct Contract {
    /// Identifier used in scenario files
    pub id: &'static str,
    /// Name printed in the report
    pub title: &'static str,
    pub summary: &'static str,
    check: fn() -> Check,
}

pub const CONTRACTS: &[Contract] = &[
    Contract {
        id: "unknown_method",
        title: "Unknown Method(405) test",
        summary: "NOTKNOWN / -> HTTP/1.1 405 Method Not Allowed",
        check: unknown_method,
    },
    Contract {
        id: "unimplemented_method",
        title: "Unimplemented method(501) test",
        summary: "PATCH / -> HTTP/1.1 501 Not Implemented",
        check: unimplemented_method,
    },
    Contract {
        id: "uri_too_long",
        title: "URI too long(414) test",
        summary: "GET with a 1100 byte path -> HTTP/1.1 414 URI Too Long",
        check: uri_too_long,
    },
    Contract {
        id: "payload_too_large",
        title: "Payload too large(413) test",
        summary: "POST with a 1000000 byte body -> HTTP/1.1 413 Payload Too Large",
        check: payload_too_large,
    },
    Contract {
        id: "hello_script",
        title: "hello.py test",
        summary: "GET /hello.py -> last line 'Hello, world!'",
        check: hello_script,
    },
    Contract {
        id: "sustained_load",
        title: "siege_10_sec test",
        summary: "10 s of benchmark load -> availability 100.00 %",
        check: sustained_load,
    },
    Contract {
        id: "upload",
        title: "upload_file test",
        summary: "multipart POST /upload -> status 200 or 201",
        check: upload,
    },
];

/// Look up a contract by identifier
pub fn find(id: &str) -> Option<&'static Contract> {
    CONTRACTS.iter().find(|c| c.id == id)
}

impl Contract {
    /// The check this contract performs, named by its title
    pub fn assertion(&self) -> Assertion {
        Assertion {
            name: self.title.to_string(),
            check: (self.check)(),
        }
    }
}

fn unknown_method() -> Check {
    status_probe(
        ProbeRequest::text(&format!("NOTKNOWN / HTTP/1.1\r\n{HOST_LINE}\r\n")),
        "HTTP/1.1 405 Method Not Allowed",
    )
}

fn unimplemented_method() -> Check {
    status_probe(
        ProbeRequest::text(&format!("PATCH / HTTP/1.1\r\n{HOST_LINE}\r\n")),
        "HTTP/1.1 501 Not Implemented",
    )
}

fn uri_too_long() -> Check {
    let request = ProbeRequest::from_segments(&[
        Segment::Text("GET /".to_string()),
        Segment::Repeat {
            repeat: 'a',
            count: LONG_URI_LEN,
        },
        Segment::Text(format!(" HTTP/1.1\r\n{HOST_LINE}\r\n")),
    ]);
    status_probe(request, "HTTP/1.1 414 URI Too Long")
}

fn payload_too_large() -> Check {
    let request = ProbeRequest::from_segments(&[
        Segment::Text(format!(
            "POST / HTTP/1.1\r\n{HOST_LINE}Content-Length: {LARGE_BODY_LEN}\r\n\r\n"
        )),
        Segment::Repeat {
            repeat: 'a',
            count: LARGE_BODY_LEN,
        },
    ]);
    status_probe(request, "HTTP/1.1 413 Payload Too Large")
}

fn hello_script() -> Check {
    Check::Probe {
        request: ProbeRequest::text(&format!("GET /hello.py HTTP/1.1\r\n{HOST_LINE}\r\n")),
        expect: ProbeExpectation {
            last_line: Some("Hello, world!".to_string()),
            ..Default::default()
        },
    }
}

fn sustained_load() -> Check {
    Check::Load {
        duration: Some(LOAD_WINDOW),
        min_availability: 100.0,
    }
}

fn upload() -> Check {
    Check::Upload {
        path: "/upload".to_string(),
        file: None,
        accept: vec![200, 201],
    }
}

fn status_probe(request: ProbeRequest, status_line: &str) -> Check {
    Check::Probe {
        request,
        expect: ProbeExpectation {
            status_line: Some(status_line.to_string()),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_of(id: &str) -> (ProbeRequest, ProbeExpectation) {
        match find(id).unwrap().assertion().check {
            Check::Probe { request, expect } => (request, expect),
            other => panic!("{} is not a probe: {:?}", id, other),
        }
    }

    #[test]
    fn test_every_contract_resolves() {
        assert_eq!(CONTRACTS.len(), 7);
        for contract in CONTRACTS {
            let assertion = contract.assertion();
            assert_eq!(assertion.name, contract.title);
        }
        assert!(find("teleport").is_none());
    }

    #[test]
    fn test_literal_requests() {
        let (request, expect) = probe_of("unknown_method");
        assert_eq!(
            request.as_bytes(),
            b"NOTKNOWN / HTTP/1.1\r\nHost: localhost\r\n\r\n"
        );
        assert_eq!(
            expect.status_line.as_deref(),
            Some("HTTP/1.1 405 Method Not Allowed")
        );

        let (request, _) = probe_of("unimplemented_method");
        assert_eq!(request.as_bytes(), b"PATCH / HTTP/1.1\r\nHost: localhost\r\n\r\n");
    }

    #[test]
    fn test_filler_sizes() {
        let (request, expect) = probe_of("uri_too_long");
        let text = String::from_utf8(request.as_bytes().to_vec()).unwrap();
        let uri = text.split_whitespace().nth(1).unwrap();
        assert_eq!(uri.len(), 1 + LONG_URI_LEN);
        assert_eq!(expect.status_line.as_deref(), Some("HTTP/1.1 414 URI Too Long"));

        let (request, _) = probe_of("payload_too_large");
        let head = "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 1000000\r\n\r\n";
        assert!(request.as_bytes().starts_with(head.as_bytes()));
        assert_eq!(request.len(), head.len() + LARGE_BODY_LEN);
    }

    #[test]
    fn test_non_probe_contracts() {
        assert!(matches!(
            find("sustained_load").unwrap().assertion().check,
            Check::Load { duration: Some(d), min_availability } if d == LOAD_WINDOW && min_availability == 100.0
        ));
        assert!(matches!(
            find("upload").unwrap().assertion().check,
            Check::Upload { ref accept, .. } if accept == &vec![200, 201]
        ));

        let (_, expect) = probe_of("hello_script");
        assert_eq!(expect.last_line.as_deref(), Some("Hello, world!"));
    }
}
