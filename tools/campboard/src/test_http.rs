//! Loopback HTTP endpoints for client tests.

use std::io::Read;
use std::thread::JoinHandle;
use std::time::Duration;
use tiny_http::{Header, Response, Server};

#[derive(Debug, Clone, Default)]
pub(crate) struct CapturedRequest {
    pub method: String,
    /// Path and query, as sent on the request line.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }
}

fn start() -> (Server, String) {
    let server = Server::http("127.0.0.1:0").expect("http server");
    let base = format!("http://{}", server.server_addr());
    (server, base)
}

/// Answers exactly one request with `status` and a JSON `body`.
pub(crate) fn serve_once(status: u16, body: &str) -> (String, JoinHandle<CapturedRequest>) {
    let (server, base) = start();
    let payload = body.to_string();
    let handle = std::thread::spawn(move || {
        let mut request = server.recv().expect("request");
        let mut body = String::new();
        request
            .as_reader()
            .read_to_string(&mut body)
            .expect("request body");
        let captured = CapturedRequest {
            method: request.method().to_string(),
            url: request.url().to_string(),
            headers: request
                .headers()
                .iter()
                .map(|header| (header.field.to_string(), header.value.to_string()))
                .collect(),
            body,
        };
        let content_type =
            Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).expect("header");
        request
            .respond(
                Response::from_string(payload)
                    .with_status_code(status)
                    .with_header(content_type),
            )
            .expect("respond");
        captured
    });
    (base, handle)
}

/// Takes one request and leaves it unanswered for `hold`.
pub(crate) fn serve_silently(hold: Duration) -> (String, JoinHandle<()>) {
    let (server, base) = start();
    let handle = std::thread::spawn(move || {
        if let Ok(request) = server.recv() {
            std::thread::sleep(hold);
            drop(request);
        }
    });
    (base, handle)
}

/// A loopback address with nothing listening on it.
pub(crate) fn closed_port() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}")
}
