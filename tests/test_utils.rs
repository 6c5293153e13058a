//! Test Utilities - Isolated Server Environments and a Wire-Level Client
//!
//! Integration tests drive a real server over loopback TCP. The client here
//! speaks the raw wire protocol, command frames out, reply frames and bulk
//! payloads in, exactly as an end-user client application would.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use filehub::{ConfigBuilder, FileHubServer, MemoryLog, ServerConfig};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const REPLY_DEADLINE: Duration = Duration::from_secs(5);

/// Isolated test environment with its own storage root
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub config: ServerConfig,
}

impl TestEnvironment {
    /// Create a new isolated test environment with short deadlines
    pub fn new() -> anyhow::Result<Self> {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let temp_dir = TempDir::new()?;
        let config = ConfigBuilder::new()
            .bind_address("127.0.0.1")
            .handshake_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(10))
            .transfer_timeout(Duration::from_secs(5))
            .build()?;
        Ok(TestEnvironment { temp_dir, config })
    }

    /// The storage root of this environment
    pub fn root(&self) -> &std::path::Path {
        self.temp_dir.path()
    }
}

/// Reserve a currently free loopback port
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Start a server over the environment's root on a free port
pub async fn start_server(
    env: &TestEnvironment,
) -> (Arc<FileHubServer>, Arc<MemoryLog>, SocketAddr) {
    let log = Arc::new(MemoryLog::new());
    let server = Arc::new(FileHubServer::with_logger(env.config.clone(), log.clone()));
    server.set_root(env.root()).await.unwrap();

    // The reserved port can be raced away between probing and binding, so
    // retry with a fresh one on failure.
    for _ in 0..10 {
        let port = free_port().await;
        if let Ok(addr) = server.start(port).await {
            return (server, log, addr);
        }
    }
    panic!("could not bind a test port");
}

/// Wire-level protocol client
pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    /// Connect and perform the username handshake; returns the client and
    /// the server's handshake reply.
    pub async fn connect(addr: SocketAddr, username: &str) -> (Self, String) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = TestClient { stream };
        client.send(username).await;
        let reply = client.recv().await;
        (client, reply)
    }

    /// Send one control frame
    pub async fn send(&mut self, frame: &str) {
        self.stream
            .write_all(format!("{frame}\n").as_bytes())
            .await
            .unwrap();
    }

    /// Send raw bulk payload bytes
    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Receive one reply frame, trimmed
    pub async fn recv(&mut self) -> String {
        let mut buf = [0u8; 8192];
        let n = timeout(REPLY_DEADLINE, self.stream.read(&mut buf))
            .await
            .expect("deadline waiting for a reply frame")
            .expect("reading a reply frame");
        String::from_utf8_lossy(&buf[..n]).trim().to_string()
    }

    /// Receive exactly `len` bulk payload bytes
    pub async fn recv_exact(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        timeout(REPLY_DEADLINE, self.stream.read_exact(&mut buf))
            .await
            .expect("deadline waiting for a bulk payload")
            .expect("reading a bulk payload");
        buf
    }

    /// Assert the server closes the stream
    pub async fn expect_close(&mut self) {
        let mut buf = [0u8; 16];
        let n = timeout(REPLY_DEADLINE, self.stream.read(&mut buf))
            .await
            .expect("deadline waiting for the stream to close")
            .unwrap_or(0);
        assert_eq!(n, 0, "expected the server to close the stream");
    }

    /// Full upload exchange; returns the server's response frame
    pub async fn upload(&mut self, filename: &str, bytes: &[u8]) -> String {
        self.send(&format!("UPLOAD {filename} {}", bytes.len())).await;
        self.send_bytes(bytes).await;
        self.recv().await
    }

    /// Full download exchange; returns the payload bytes
    pub async fn download(&mut self, filename: &str, owner: &str) -> Vec<u8> {
        self.send(&format!("DOWNLOAD {filename} {owner}")).await;
        let announce = self.recv().await;
        let size: usize = announce
            .strip_prefix("FILESIZE ")
            .unwrap_or_else(|| panic!("expected a FILESIZE announce, got {announce:?}"))
            .parse()
            .unwrap();
        self.send("READY").await;
        self.recv_exact(size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_environment_creation() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.root().exists());
        assert_eq!(env.config.bind_address, "127.0.0.1");
    }
}
