//! Scripted fakes for the bridge and the local application endpoint, built
//! on raw TCP listeners so the tests exercise the real HTTP path.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use prost::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct Delivery {
    pub request_id: String,
    pub body: Vec<u8>,
}

#[derive(Default)]
pub struct BridgeState {
    pub deliveries: Mutex<VecDeque<Delivery>>,
    pub posts: Mutex<Vec<(String, Vec<u8>)>>,
    pub deletes: Mutex<Vec<String>>,
    pub polls: AtomicU64,
    /// When set, every poll is answered with 401.
    pub reject_auth: std::sync::atomic::AtomicBool,
}

pub struct FakeBridge {
    pub url: String,
    pub state: Arc<BridgeState>,
}

impl FakeBridge {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let state = Arc::new(BridgeState::default());
        let server_state = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let state = server_state.clone();
                tokio::spawn(async move {
                    serve_bridge_connection(stream, state).await;
                });
            }
        });
        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    pub fn push_delivery(&self, request_id: &str, body: Vec<u8>) {
        self.state.deliveries.lock().unwrap().push_back(Delivery {
            request_id: request_id.to_string(),
            body,
        });
    }

    pub fn post_count(&self) -> usize {
        self.state.posts.lock().unwrap().len()
    }

    pub fn delete_count(&self) -> usize {
        self.state.deletes.lock().unwrap().len()
    }
}

async fn serve_bridge_connection(mut stream: TcpStream, state: Arc<BridgeState>) {
    while let Some(request) = read_request(&mut stream).await {
        let response = match request.method.as_str() {
            "GET" => {
                state.polls.fetch_add(1, Ordering::SeqCst);
                if state.reject_auth.load(Ordering::SeqCst) {
                    plain_response(401, &[], b"")
                } else {
                    let next = state.deliveries.lock().unwrap().pop_front();
                    match next {
                        Some(delivery) => plain_response(
                            200,
                            &[("X-Request-Id", delivery.request_id.as_str())],
                            &delivery.body,
                        ),
                        None => {
                            // Pace the long-poll a little so an idle session
                            // does not spin the accept loop.
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            plain_response(504, &[], b"")
                        }
                    }
                }
            }
            "POST" => {
                let request_id = request.header("x-request-id").unwrap_or_default();
                state
                    .posts
                    .lock()
                    .unwrap()
                    .push((request_id, request.body.clone()));
                plain_response(202, &[], b"")
            }
            "DELETE" => {
                let request_id = request.header("x-request-id").unwrap_or_default();
                state.deletes.lock().unwrap().push(request_id);
                plain_response(200, &[], b"")
            }
            _ => plain_response(405, &[], b""),
        };
        if stream.write_all(&response).await.is_err() {
            return;
        }
    }
}

pub struct EndpointState {
    pub responses: Mutex<VecDeque<(u16, Option<&'static str>, Vec<u8>)>>,
    pub requests: Mutex<Vec<Vec<u8>>>,
}

pub struct FakeEndpoint {
    pub addr: String,
}

impl FakeEndpoint {
    /// Starts an endpoint that answers scripted responses in order, then
    /// 404s.
    pub async fn start(responses: Vec<(u16, Option<&'static str>, Vec<u8>)>) -> (Self, Arc<EndpointState>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let state = Arc::new(EndpointState {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        });
        let server_state = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let state = server_state.clone();
                tokio::spawn(async move {
                    while let Some(request) = read_request(&mut stream).await {
                        state.requests.lock().unwrap().push(request.body.clone());
                        let scripted = state.responses.lock().unwrap().pop_front();
                        let response = match scripted {
                            Some((status, content_type, body)) => {
                                let headers = content_type
                                    .map(|ct| vec![("Content-Type", ct)])
                                    .unwrap_or_default();
                                plain_response(status, &headers, &body)
                            }
                            None => plain_response(404, &[], b""),
                        };
                        if stream.write_all(&response).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        (
            Self {
                addr: addr.to_string(),
            },
            state,
        )
    }
}

/// Reserves an address nothing is listening on.
pub async fn unused_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("addr").to_string()
}

/// Serialises a run request the way the bridge embeds it in poll bodies.
pub fn embedded_request(request: &dispatch_proto::RunRequest) -> Vec<u8> {
    let body = request.encode_to_vec();
    let mut out = format!(
        "POST /dispatch.sdk.v1.FunctionService/Run HTTP/1.1\r\n\
         Host: application\r\n\
         Content-Type: application/proto\r\n\
         Content-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(&body);
    out
}

struct ParsedRequest {
    method: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl ParsedRequest {
    fn header(&self, name: &str) -> Option<String> {
        self.headers.get(name).cloned()
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<ParsedRequest> {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let method = request_line.split_whitespace().next()?.to_string();
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Some(ParsedRequest {
        method,
        headers,
        body,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn plain_response(status: u16, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let reason = match status {
        200 => "OK",
        202 => "Accepted",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        504 => "Gateway Timeout",
        _ => "",
    };
    let mut out = format!("HTTP/1.1 {status} {reason}\r\n").into_bytes();
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(body);
    out
}

/// Polls a condition until it holds or the deadline passes.
pub async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
