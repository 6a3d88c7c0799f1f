//! Stub collection endpoint for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pagewatch_core::{Monitor, MonitorConfig, Transmitter};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// One request as the collector saw it
#[derive(Debug)]
pub struct Received {
    pub method: String,
    pub path: String,
    pub body: serde_json::Value,
}

/// Local HTTP server answering with scripted statuses (200 once exhausted).
pub struct Collector {
    pub url: String,
    statuses: Arc<Mutex<VecDeque<u16>>>,
    received: mpsc::UnboundedReceiver<Received>,
}

impl Collector {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/collect", listener.local_addr().unwrap());
        let statuses = Arc::new(Mutex::new(VecDeque::new()));
        let (tx, received) = mpsc::unbounded_channel();

        let script = Arc::clone(&statuses);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let (head, body) = read_request(&mut socket).await;
                let status = script.lock().unwrap().pop_front().unwrap_or(200);
                let response = format!(
                    "HTTP/1.1 {} {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    status,
                    if status < 400 { "OK" } else { "Error" }
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;

                let mut request_line = head.lines().next().unwrap_or_default().split(' ');
                let method = request_line.next().unwrap_or_default().to_string();
                let path = request_line.next().unwrap_or_default().to_string();
                let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
                let _ = tx.send(Received { method, path, body });
            }
        });

        Self {
            url,
            statuses,
            received,
        }
    }

    /// Answer the next requests with these statuses, in order
    pub fn respond_with(&self, statuses: &[u16]) {
        self.statuses.lock().unwrap().extend(statuses);
    }

    /// Wait for the next request
    pub async fn next(&mut self) -> Received {
        tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .expect("collector saw no request")
            .expect("collector stopped")
    }

    /// Monitor delivering to this collector, with manual flushing only
    pub fn monitor(&self) -> Monitor {
        let config = MonitorConfig {
            enable_auto_flush: false,
            enable_auto_track: false,
            capture_panics: false,
            page_url: Some("https://shop.example.com/".to_string()),
            ..MonitorConfig::new("shop", self.url.clone())
        };
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let transmitter = Transmitter::with_client(client, self.url.clone(), config.timeout());
        Monitor::with_transport(config, Arc::new(transmitter)).unwrap()
    }
}

async fn read_request(socket: &mut TcpStream) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let body_len = head
                .to_lowercase()
                .lines()
                .find_map(|line| line.strip_prefix("content-length:").map(str::to_string))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                return (head, buf[end + 4..end + 4 + body_len].to_vec());
            }
        }
    }
    (String::from_utf8_lossy(&buf).to_string(), Vec::new())
}
