//! Shared integration-test plumbing: a scripted HTTP/1.1 server for
//! provider wire tests, a node-availability gate for sandbox tests, and
//! suite fixture writers.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// One request as captured by the scripted server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request line + headers, verbatim.
    pub head: String,
    pub body: serde_json::Value,
}

impl RecordedRequest {
    pub fn header_contains(&self, needle: &str) -> bool {
        self.head
            .to_ascii_lowercase()
            .contains(&needle.to_ascii_lowercase())
    }
}

pub struct ScriptedServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedServer {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Serve the given `(status, body)` responses to sequential connections,
/// recording each request. Connections are closed after every response so
/// the client reconnects per round-trip.
pub async fn spawn_scripted_server(responses: Vec<(u16, String)>) -> ScriptedServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let requests = Arc::new(Mutex::new(Vec::new()));

    let recorded = Arc::clone(&requests);
    tokio::spawn(async move {
        for (status, body) in responses {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let Some(request) = read_request(&mut stream).await else {
                return;
            };
            recorded.lock().unwrap().push(request);

            let response = format!(
                "HTTP/1.1 {status} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    ScriptedServer {
        base_url: format!("http://{addr}"),
        requests,
    }
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body_bytes = &buf[header_end..(header_end + content_length).min(buf.len())];
    let body = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(body_bytes).unwrap_or(serde_json::Value::Null)
    };

    Some(RecordedRequest { head, body })
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Sandbox tests need a real JS runtime; skip (with a note) when absent.
pub fn node_available() -> bool {
    std::process::Command::new("node")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// A tools module exercising the happy path, failures, the network shim,
/// and the manifest mode.
pub const TOOLS_MODULE_SOURCE: &str = r#"export const definitions = [
  {
    name: "lookup_booking",
    description: "Look up a booking by id",
    inputSchema: {
      type: "object",
      properties: { id: { type: "string" } },
      required: ["id"]
    }
  },
  { name: "echo" }
];

export const handlers = {
  lookup_booking: async (args, context) => ({
    id: args.id,
    status: "confirmed",
    suite: context.suiteId
  }),
  echo: async (args) => args,
  fetch_url: async () => {
    const res = await fetch("https://example.com");
    return res.status;
  },
  boom: async () => {
    throw new Error("handler exploded");
  },
  never: () => new Promise(() => {})
};
"#;

pub fn write_tools_module(dir: &Path) -> PathBuf {
    let path = dir.join("tools.mjs");
    std::fs::write(&path, TOOLS_MODULE_SOURCE).expect("write tools module");
    path
}

/// A tools module without a `handlers` export.
pub fn write_handlerless_module(dir: &Path) -> PathBuf {
    let path = dir.join("no_handlers.mjs");
    std::fs::write(&path, "export const unrelated = 1;\n").expect("write module");
    path
}
