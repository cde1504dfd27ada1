//! BridgeClient — `SessionClient` backed by an automation bridge process
//!
//! The bridge owns the browser and the messaging session. We talk to it over
//! its stdin/stdout; one reader task routes responses to waiting requests and
//! turns events into client signals.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;

use wacheck_core::{ClientSignal, Contact, Identifier, SessionClient};

use super::protocol::{decode, encode, BridgeMessage, BridgeRequest, ChatParams, Method};
use crate::config::{SessionSettings, ENV_BROWSER_EXECUTABLE};

/// How long the bridge gets to exit on its own after `destroy`
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Pending requests keyed by request id
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Removes a request's pending entry when its caller stops waiting
struct PendingGuard {
    id: u64,
    pending: PendingMap,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.pending.lock().remove(&self.id).is_some() {
            tracing::debug!(id = self.id, "Dropped unanswered bridge request");
        }
    }
}

/// Session client driving an external bridge process
pub struct BridgeClient {
    command: String,
    args: Vec<String>,
    browser_executable: Option<PathBuf>,
    request_timeout: Duration,
    last_id: AtomicU64,
    pending: PendingMap,
    stdin: TokioMutex<Option<ChildStdin>>,
    child: TokioMutex<Option<Child>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    /// Set by `destroy` so the bridge exiting is not reported as a disconnect
    closing: Arc<AtomicBool>,
}

impl BridgeClient {
    pub fn new(settings: &SessionSettings) -> Self {
        Self {
            command: settings.bridge_command.clone(),
            args: settings.bridge_args.clone(),
            browser_executable: settings.browser_executable.clone(),
            request_timeout: settings.request_timeout(),
            last_id: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
            stdin: TokioMutex::new(None),
            child: TokioMutex::new(None),
            reader: Mutex::new(None),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    fn spawn_child(&self) -> Result<Child> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(path) = &self.browser_executable {
            cmd.env(ENV_BROWSER_EXECUTABLE, path);
        }
        cmd.spawn()
            .with_context(|| format!("Failed to launch bridge {:?}", self.command))
    }

    /// Send one request and wait for its response
    async fn request(&self, method: Method, params: Option<ChatParams>) -> Result<Value> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _guard = PendingGuard {
            id,
            pending: Arc::clone(&self.pending),
        };

        let line = encode(&BridgeRequest { id, method, params })?;
        {
            let mut stdin = self.stdin.lock().await;
            let stdin = stdin.as_mut().context("Bridge is not running")?;
            stdin
                .write_all(&line)
                .await
                .context("Failed to write to bridge")?;
            stdin.flush().await.context("Failed to write to bridge")?;
        }
        tracing::debug!(id, ?method, "Bridge request sent");

        let reply = tokio::time::timeout(self.request_timeout, rx)
            .await
            .map_err(|_| {
                anyhow!(
                    "Bridge request {:?} timed out after {:?}",
                    method,
                    self.request_timeout
                )
            })?;
        reply.map_err(|_| anyhow!("Bridge closed before answering {:?}", method))?
    }

    async fn call<T: DeserializeOwned>(&self, method: Method, id: &Identifier) -> Result<T> {
        let value = self
            .request(method, Some(ChatParams::for_identifier(id)))
            .await?;
        serde_json::from_value(value)
            .with_context(|| format!("Unexpected {:?} result for {}", method, id))
    }
}

/// Route bridge output until it closes
async fn read_loop(
    stdout: ChildStdout,
    pending: PendingMap,
    signals: mpsc::UnboundedSender<ClientSignal>,
    closing: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !line.trim().is_empty() {
                    dispatch(line.as_bytes(), &pending, &signals);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to read from bridge: {}", e);
                break;
            }
        }
    }

    // Waiting requests see the sender drop and fail immediately
    pending.lock().clear();

    if closing.load(Ordering::SeqCst) {
        tracing::debug!("Bridge output closed");
    } else {
        let _ = signals.send(ClientSignal::Disconnected {
            reason: "bridge exited".to_string(),
        });
    }
}

fn dispatch(line: &[u8], pending: &PendingMap, signals: &mpsc::UnboundedSender<ClientSignal>) {
    let message = match decode::<BridgeMessage>(line) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Ignoring malformed bridge line: {}", e);
            return;
        }
    };

    match message {
        BridgeMessage::Response { id, result, error } => {
            let Some(tx) = pending.lock().remove(&id) else {
                tracing::debug!(id, "Response for unknown or abandoned request");
                return;
            };
            let reply = match error {
                Some(message) => Err(anyhow!("Bridge error: {}", message)),
                None => Ok(result.unwrap_or(Value::Null)),
            };
            let _ = tx.send(reply);
        }
        BridgeMessage::Event(event) => {
            tracing::debug!(?event, "Bridge event");
            let _ = signals.send(event.into());
        }
        BridgeMessage::Unknown(value) => {
            tracing::debug!(%value, "Ignoring unknown bridge message");
        }
    }
}

impl SessionClient for BridgeClient {
    async fn initialize(&self, signals: mpsc::UnboundedSender<ClientSignal>) -> Result<()> {
        let mut child = self.spawn_child()?;
        let stdin = child.stdin.take().context("Bridge stdin not captured")?;
        let stdout = child.stdout.take().context("Bridge stdout not captured")?;
        tracing::info!(command = %self.command, pid = ?child.id(), "Bridge started");

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);

        let task = tokio::spawn(read_loop(
            stdout,
            Arc::clone(&self.pending),
            signals,
            Arc::clone(&self.closing),
        ));
        *self.reader.lock() = Some(task);
        Ok(())
    }

    async fn is_registered_user(&self, id: &Identifier) -> Result<bool> {
        self.call(Method::IsRegisteredUser, id).await
    }

    async fn get_contact_by_id(&self, id: &Identifier) -> Result<Contact> {
        self.call(Method::GetContactById, id).await
    }

    async fn get_profile_pic_url(&self, id: &Identifier) -> Result<Option<String>> {
        self.call(Method::GetProfilePicUrl, id).await
    }

    async fn destroy(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        if let Err(e) = self.request(Method::Destroy, None).await {
            tracing::warn!("Bridge destroy request failed: {:#}", e);
        }

        // Closing stdin is the bridge's cue to exit
        *self.stdin.lock().await = None;

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => tracing::info!(%status, "Bridge exited"),
                Ok(Err(e)) => tracing::warn!("Failed to wait for bridge: {}", e),
                Err(_) => {
                    tracing::warn!("Bridge did not exit within {:?}; killing", EXIT_GRACE);
                    child.kill().await.context("Failed to kill bridge")?;
                }
            }
        }

        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            reader.abort();
        }
        Ok(())
    }
}
