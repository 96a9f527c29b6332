//! Command socket: one request and one response per connection.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::UnixListener,
    time::{Instant, timeout_at},
};
use tokio_util::{
    codec::{Framed, LinesCodec},
    sync::CancellationToken,
};

use crate::{
    app_context::AppState, config::Config, providers::traits::ServiceProvider,
    router::CommandRouter, task_manager::TaskManager,
};

/// Per-connection limits taken from the configuration.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub read_timeout: Duration,
    pub max_request_bytes: usize,
}

impl From<&Config> for ConnectionLimits {
    fn from(config: &Config) -> Self {
        Self {
            read_timeout: config.client_timeout(),
            max_request_bytes: config.max_request_bytes,
        }
    }
}

/// Unix socket server. Critical: the daemon is useless without it.
///
/// The socket is bound in [`IpcServiceProvider::bind`], before any service
/// starts, so a bind failure aborts startup early.
pub struct IpcServiceProvider {
    router: CommandRouter,
    limits: ConnectionLimits,
    path: PathBuf,
    listener: Mutex<Option<UnixListener>>,
}

impl IpcServiceProvider {
    /// Replaces any stale socket file at the configured path and binds it.
    /// Must be called inside the tokio runtime.
    pub fn bind(state: Arc<AppState>) -> Result<Self> {
        let path = state.config.socket_path.clone();
        let limits = ConnectionLimits::from(state.config.as_ref());
        let listener = bind_socket(&path)?;
        info!("Listening on {}", path.display());

        Ok(Self {
            router: CommandRouter::new(state),
            limits,
            path,
            listener: Mutex::new(Some(listener)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn bind_socket(path: &Path) -> Result<UnixListener> {
    match fs::remove_file(path) {
        Ok(()) => info!("Removed stale socket {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("failed to remove {}", path.display()));
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    UnixListener::bind(path).with_context(|| format!("failed to bind {}", path.display()))
}

#[async_trait]
impl ServiceProvider for IpcServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .map_err(|_| anyhow!("listener lock poisoned"))?
            .take()
            .ok_or_else(|| anyhow!("IPC server already started"))?;
        let router = self.router.clone();
        let limits = self.limits;

        task_manager.spawn_task(self.name(), move |cancel_token| {
            run_ipc_server(listener, router, limits, cancel_token)
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "IpcService"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        true
    }
}

async fn run_ipc_server(
    listener: UnixListener,
    router: CommandRouter,
    limits: ConnectionLimits,
    cancel_token: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("IPC server cancelled");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let router = router.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, &router, limits).await {
                            debug!("Connection dropped: {e:#}");
                        }
                    });
                }
                Err(e) => {
                    warn!("Failed to accept connection: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
    Ok(())
}

/// Reads one request (a line, or everything up to EOF), answers it and
/// closes. Blank lines before the request are skipped. Framing errors and
/// timeouts drop the connection without a response.
pub async fn serve_connection<S>(
    stream: S,
    router: &CommandRouter,
    limits: ConnectionLimits,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(
        stream,
        LinesCodec::new_with_max_length(limits.max_request_bytes),
    );
    let deadline = Instant::now() + limits.read_timeout;

    let request = loop {
        match timeout_at(deadline, framed.next()).await {
            Err(_) => bail!("no request within {:?}", limits.read_timeout),
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => return Err(e).context("failed to read request"),
            Ok(Some(Ok(line))) if line.trim().is_empty() => continue,
            Ok(Some(Ok(line))) => break line,
        }
    };

    let response = router.handle_raw(&request).await;
    let encoded = serde_json::to_string(&response).context("failed to encode response")?;
    framed
        .send(encoded)
        .await
        .context("failed to send response")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{module::HardwareModule, testing};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt, duplex},
        net::UnixStream,
    };

    fn state_at(dir: &TempDir) -> Arc<AppState> {
        let config = Config {
            socket_path: dir.path().join("run/totem.sock"),
            ..Config::default()
        };
        let modules: Vec<Arc<dyn HardwareModule>> = vec![
            testing::StubModule::new("face") as Arc<dyn HardwareModule>,
            testing::StubModule::new("lcd") as Arc<dyn HardwareModule>,
        ];
        testing::app_state(config, modules)
    }

    async fn request(path: &Path, payload: &str) -> Value {
        let mut stream = UnixStream::connect(path).await.unwrap();
        stream.write_all(payload.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert!(reply.ends_with('\n'));
        serde_json::from_str(reply.trim_end()).unwrap()
    }

    #[tokio::test]
    async fn socket_round_trip() {
        let dir = TempDir::new().unwrap();
        let provider = IpcServiceProvider::bind(state_at(&dir)).unwrap();
        let path = provider.path().to_path_buf();
        let mut tasks = TaskManager::new();
        provider.start(&mut tasks).await.unwrap();

        let pong = request(&path, "{\"action\":\"ping\"}\n").await;
        assert_eq!(pong, json!({"ok": true, "data": {"pong": true}}));

        let bogus = request(&path, "{\"module\":\"bogus\",\"action\":\"x\"}\n").await;
        assert_eq!(bogus["ok"], false);
        assert!(bogus["error"].as_str().unwrap().starts_with("Unknown module 'bogus'"));

        let batch = request(
            &path,
            "{\"batch\":[{\"action\":\"ping\"},{\"module\":\"face\",\"action\":\"echo\"},{\"module\":\"nope\",\"action\":\"x\"}]}\n",
        )
        .await;
        assert_eq!(batch["ok"], false);
        let results = batch["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["ok"], true);
        assert_eq!(results[1]["ok"], true);
        assert_eq!(results[2]["ok"], false);

        let no_newline = request(&path, "{\"action\":\"ping\"}").await;
        assert_eq!(no_newline["ok"], true);

        tasks.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket_file() {
        let dir = TempDir::new().unwrap();
        let state = state_at(&dir);
        let path = state.config.socket_path.clone();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"leftover").unwrap();

        let provider = IpcServiceProvider::bind(state).unwrap();
        let mut tasks = TaskManager::new();
        provider.start(&mut tasks).await.unwrap();
        assert!(provider.start(&mut tasks).await.is_err());

        assert_eq!(request(&path, "{\"action\":\"ping\"}\n").await["ok"], true);
        tasks.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn silent_client_times_out_without_response() {
        let dir = TempDir::new().unwrap();
        let router = CommandRouter::new(state_at(&dir));
        let limits = ConnectionLimits {
            read_timeout: Duration::from_millis(50),
            max_request_bytes: 1024,
        };
        let (mut client, server) = duplex(1024);

        let err = serve_connection(server, &router, limits).await.unwrap_err();
        assert!(err.to_string().contains("no request"));

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn oversized_request_is_dropped() {
        let dir = TempDir::new().unwrap();
        let router = CommandRouter::new(state_at(&dir));
        let limits = ConnectionLimits {
            read_timeout: Duration::from_secs(5),
            max_request_bytes: 64,
        };
        let (mut client, server) = duplex(4096);
        let payload = format!("{{\"action\":\"{}\"}}\n", "p".repeat(200));
        client.write_all(payload.as_bytes()).await.unwrap();

        assert!(serve_connection(server, &router, limits).await.is_err());
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn blank_lines_before_request_are_skipped() {
        let dir = TempDir::new().unwrap();
        let router = CommandRouter::new(state_at(&dir));
        let (mut client, server) = duplex(4096);
        client.write_all(b"\n\r\n{\"action\":\"ping\"}\n").await.unwrap();

        serve_connection(server, &router, ConnectionLimits::from(&Config::default()))
            .await
            .unwrap();
        let mut reply = String::new();
        client.read_to_string(&mut reply).await.unwrap();
        assert_eq!(reply, "{\"ok\":true,\"data\":{\"pong\":true}}\n");
    }
}
