//! RPC client - Unix socket client for communicating with cachesnapd.

use anyhow::{Context, Result};
use cachesnap_shared::ipc::{Method, Request, Response, ResponseData};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::sleep;

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

const DEFAULT_SOCKET: &str = "/run/cachesnap/cachesnapd.sock";
const FALLBACK_SOCKET: &str = "/run/cachesnapd.sock";

pub struct RpcClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl RpcClient {
    /// Discover the socket path.
    ///
    /// Priority:
    /// 1. Explicit --socket flag
    /// 2. $CACHESNAP_SOCKET environment variable
    /// 3. /run/cachesnap/cachesnapd.sock (default)
    /// 4. /run/cachesnapd.sock (fallback)
    pub fn discover_socket_path(explicit_path: Option<&str>) -> String {
        if let Some(path) = explicit_path {
            return path.to_string();
        }

        if let Ok(path) = std::env::var("CACHESNAP_SOCKET") {
            return path;
        }

        if std::path::Path::new(DEFAULT_SOCKET).exists() {
            return DEFAULT_SOCKET.to_string();
        }

        FALLBACK_SOCKET.to_string()
    }

    /// Connect to the daemon, retrying briefly with backoff.
    pub async fn connect(socket_path: Option<&str>) -> Result<Self> {
        let path = Self::discover_socket_path(socket_path);
        let max_retries = 5;
        let mut retry_delay = Duration::from_millis(50);
        let mut last_error: Option<std::io::Error> = None;

        for attempt in 0..max_retries {
            match tokio::time::timeout(Duration::from_millis(500), UnixStream::connect(&path)).await
            {
                Ok(Ok(stream)) => {
                    let (reader, writer) = stream.into_split();
                    return Ok(Self {
                        reader: BufReader::new(reader),
                        writer,
                    });
                }
                Ok(Err(e)) => {
                    last_error = Some(e);
                }
                Err(_) => {}
            }
            if attempt < max_retries - 1 {
                sleep(retry_delay).await;
                retry_delay = (retry_delay * 2).min(Duration::from_millis(400));
            }
        }

        match last_error {
            Some(e) => Err(anyhow::Error::new(e).context(format!(
                "Failed to connect to cachesnapd at {}. Is the daemon running?",
                path
            ))),
            None => anyhow::bail!(
                "Timed out connecting to cachesnapd at {}. Is the daemon running?",
                path
            ),
        }
    }

    /// Send a request and return its response data.
    pub async fn call(&mut self, method: Method) -> Result<ResponseData> {
        tokio::time::timeout(Duration::from_secs(10), self.call_inner(method))
            .await
            .context("RPC call timed out")?
    }

    async fn call_inner(&mut self, method: Method) -> Result<ResponseData> {
        let id = REQUEST_ID.fetch_add(1, Ordering::SeqCst);
        let request = Request { id, method };

        let request_json = serde_json::to_string(&request)? + "\n";
        self.writer
            .write_all(request_json.as_bytes())
            .await
            .context("Failed to send request")?;

        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .await
            .context("Failed to read response")?;

        let response: Response = serde_json::from_str(&line).context("Failed to parse response")?;

        if response.id != id {
            anyhow::bail!("Response ID mismatch");
        }

        response.result.map_err(|e| anyhow::anyhow!(e))
    }
}
