//! In-process HTTP fixture for transport tests.
//!
//! A bare `tokio::net::TcpListener` that parses one request per connection,
//! records it, and answers from a script. Responses close the connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// A request the fixture received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// JSON-RPC id of the request body (`null` for notifications).
    pub fn id(&self) -> serde_json::Value {
        self.body.get("id").cloned().unwrap_or(serde_json::Value::Null)
    }
}

/// Scripted reply.
#[derive(Debug, Clone)]
pub struct FixtureResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl FixtureResponse {
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.to_string(),
        }
    }

    pub fn event_stream(events: &[serde_json::Value]) -> Self {
        let body: String = events.iter().map(|e| format!("data: {e}\n\n")).collect();
        Self {
            status: 200,
            headers: vec![("Content-Type".into(), "text/event-stream".into())],
            body,
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "text/plain".into())],
            body: body.to_string(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

type Script = Arc<dyn Fn(&RecordedRequest) -> FixtureResponse + Send + Sync>;

pub struct FixtureServer {
    pub url: String,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl FixtureServer {
    pub async fn start<F>(script: F) -> Self
    where
        F: Fn(&RecordedRequest) -> FixtureResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let script: Script = Arc::new(script);

        let log = Arc::clone(&recorded);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let log = Arc::clone(&log);
                let script = Arc::clone(&script);
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut reader = BufReader::new(read_half);
                    let Some(request) = read_request(&mut reader).await else {
                        return;
                    };
                    let reply = if request.method == "DELETE" {
                        FixtureResponse::status(200, "")
                    } else if request.body.get("id").is_none() {
                        FixtureResponse::status(202, "")
                    } else {
                        script(&request)
                    };
                    log.lock().unwrap().push(request);
                    let _ = write_half.write_all(render(&reply).as_bytes()).await;
                    let _ = write_half.shutdown().await;
                });
            }
        });

        Self {
            url: format!("http://{addr}/mcp"),
            recorded,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.recorded.lock().unwrap().clone()
    }
}

async fn read_request<R>(reader: &mut BufReader<R>) -> Option<RecordedRequest>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.ok()?;
    let method = request_line.split_whitespace().next()?.to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.ok()?;
    let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);

    Some(RecordedRequest {
        method,
        headers,
        body,
    })
}

fn render(reply: &FixtureResponse) -> String {
    let mut out = format!("HTTP/1.1 {} Fixture\r\n", reply.status);
    for (name, value) in &reply.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!("Content-Length: {}\r\n", reply.body.len()));
    out.push_str("Connection: close\r\n\r\n");
    out.push_str(&reply.body);
    out
}
