#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Canned reply written by [`FakeUpstream`].
pub struct CannedReply {
    pub status_line: &'static str,
    pub content_type: &'static str,
    pub body: String,
    /// When set, the upstream holds the connection this long and closes it unanswered.
    pub hang: Option<Duration>,
}

impl CannedReply {
    pub fn completion(content: &str) -> Self {
        Self {
            status_line: "200 OK",
            content_type: "application/json",
            body: serde_json::json!({"choices": [{"message": {"content": content}}]}).to_string(),
            hang: None,
        }
    }

    pub fn stream(deltas: &[&str]) -> Self {
        let mut body = String::new();
        for delta in deltas {
            let chunk = serde_json::json!({"choices": [{"delta": {"content": delta}}]});
            body.push_str(&format!("data: {chunk}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        Self {
            status_line: "200 OK",
            content_type: "text/event-stream",
            body,
            hang: None,
        }
    }

    pub fn status(status_line: &'static str, body: &str) -> Self {
        Self {
            status_line,
            content_type: "text/plain",
            body: body.to_string(),
            hang: None,
        }
    }

    pub fn hang(duration: Duration) -> Self {
        Self {
            hang: Some(duration),
            ..Self::status("200 OK", "")
        }
    }
}

/// Blocking HTTP server answering one connection per canned reply, in order.
pub struct FakeUpstream {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl FakeUpstream {
    pub fn start(replies: Vec<CannedReply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
        let addr = listener.local_addr().expect("address should be available");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        let handle = thread::spawn(move || {
            for reply in replies {
                let (mut stream, _) = listener.accept().expect("accept should succeed");
                let body = read_request_body(&mut stream);
                recorded.lock().expect("requests lock").push(body);
                if let Some(duration) = reply.hang {
                    thread::sleep(duration);
                    continue;
                }
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    reply.status_line,
                    reply.content_type,
                    reply.body.len(),
                    reply.body
                );
                stream
                    .write_all(response.as_bytes())
                    .expect("write response");
            }
        });

        Self {
            addr,
            requests,
            handle: Some(handle),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    pub fn requests(&self) -> Vec<serde_json::Value> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(|body| serde_json::from_str(body).expect("request body should be JSON"))
            .collect()
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("fake upstream should join");
        }
    }
}

fn read_request_body(stream: &mut TcpStream) -> String {
    let mut reader = BufReader::new(stream);
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read request line");
        if line == "\r\n" || line.is_empty() {
            break;
        }
        let lower = line.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("content-length:") {
            content_length = value.trim().parse().expect("content-length is numeric");
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).expect("read request body");
    String::from_utf8(body).expect("request body should be UTF-8")
}

pub fn free_local_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let addr = listener.local_addr().expect("address should be available");
    drop(listener);
    addr
}
