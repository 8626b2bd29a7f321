//! Common test utilities and fixtures.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tallyd_lib::core::{Config, ConfigBuilder};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// Fake line-protocol backend that records every line it receives.
pub struct FakeBackend {
    addr: SocketAddr,
    lines: Arc<Mutex<Vec<String>>>,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let lines = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&lines);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    let mut reader = BufReader::new(socket).lines();
                    while let Ok(Some(line)) = reader.next_line().await {
                        sink.lock().await.push(line);
                    }
                });
            }
        });

        Self { addr, lines }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn lines(&self) -> Vec<String> {
        self.lines.lock().await.clone()
    }

    /// Wait until at least `count` lines arrived
    pub async fn wait_for_lines(&self, count: usize) -> Vec<String> {
        for _ in 0..200 {
            let lines = self.lines().await;
            if lines.len() >= count {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("backend received {} lines, expected {}", self.lines().await.len(), count);
    }
}

/// Config listening on an ephemeral local port and exporting to `backend`.
pub fn daemon_config(backend: SocketAddr, interval: Duration) -> Config {
    ConfigBuilder::new()
        .host("127.0.0.1")
        .port(0)
        .backend_host(backend.ip().to_string())
        .backend_port(backend.port())
        .flush_interval(interval)
        .build()
        .unwrap()
}

/// Split a backend line into key, value and timestamp.
pub fn parse_point(line: &str) -> (String, f64, i64) {
    let mut parts = line.split(' ');
    let key = parts.next().unwrap().to_string();
    let value = parts.next().unwrap().parse().unwrap();
    let timestamp = parts.next().unwrap().parse().unwrap();
    assert!(parts.next().is_none(), "unexpected extra field in {line:?}");
    (key, value, timestamp)
}

/// Value of the first point with `key`
pub fn value_of(lines: &[String], key: &str) -> Option<f64> {
    lines
        .iter()
        .map(|line| parse_point(line))
        .find(|(k, _, _)| k == key)
        .map(|(_, value, _)| value)
}
