//! Host connection manager.
//!
//! Owns the registry of authenticated SSH sessions, keyed by host id.
//! Sessions are cached and reused across calls; commands issued
//! against the same host are serialized in issue order by the per-host
//! slot lock, while different hosts proceed fully independently. Idle
//! sessions are closed and evicted by the scheduler, and deleting a
//! host invalidates its cached session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::config::CONFIG;
use crate::models::host::{self, AuthType};

#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("host unreachable: {0}")]
    Unreachable(String),

    #[error("authentication failed for user '{0}'")]
    AuthFailed(String),

    #[error("connection timed out after {0}s")]
    Timeout(u64),

    #[error("unsupported auth type: {0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The remote command was forcibly terminated; whatever output was
    /// captured up to that point is preserved.
    #[error("command timed out after {timeout_secs}s")]
    Timeout {
        timeout_secs: u64,
        stdout: String,
        stderr: String,
    },
}

/// Completed remote command
#[derive(Debug, Clone, Serialize)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
}

/// Result of a lightweight connectivity probe. Failure is a value,
/// not an error; `latency_ms` is only present on success.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub success: bool,
    pub message: String,
    pub latency_ms: Option<u64>,
}

/// Per-file outcome of a directory upload
#[derive(Debug, Clone, Serialize)]
pub struct FailedUpload {
    pub path: String,
    pub error: String,
}

/// Directory uploads are not transactional: files already transferred
/// stay on the host and the failed subset is reported back.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryUploadResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<FailedUpload>,
}

impl DirectoryUploadResult {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

struct ClientHandler;

#[async_trait::async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    // Target hosts are operator-managed; host keys are not pinned
    // (same policy as the admin tools this replaces).
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

struct SessionEntry {
    handle: Handle<ClientHandler>,
    last_used: Instant,
}

type SessionSlot = Arc<Mutex<Option<SessionEntry>>>;

/// Registry of live sessions. Clone-cheap; all clones share the map.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<i64, SessionSlot>>>,
    connect_timeout: Duration,
    idle_window: Duration,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(CONFIG.connect_timeout_secs),
            Duration::from_secs(CONFIG.session_idle_secs),
        )
    }
}

impl SessionManager {
    pub fn new(connect_timeout: Duration, idle_window: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            connect_timeout,
            idle_window,
        }
    }

    /// Get or create the slot for a host. The slot mutex is what
    /// serializes commands against one session.
    async fn slot(&self, host_id: i64) -> SessionSlot {
        {
            let sessions = self.sessions.read().await;
            if let Some(slot) = sessions.get(&host_id) {
                return slot.clone();
            }
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(host_id)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Dial and authenticate a fresh session for a host.
    async fn open_session(&self, host: &host::Model) -> Result<Handle<ClientHandler>, ConnectionError> {
        match host.auth_type {
            AuthType::Password => {}
            AuthType::Key => {
                // Recognized in the data model, not wired up yet.
                return Err(ConnectionError::Unsupported(
                    "key authentication is not supported yet".to_string(),
                ));
            }
        }

        let config = Arc::new(client::Config::default());
        let address = (host.host.as_str(), host.port as u16);

        let mut handle = tokio::time::timeout(
            self.connect_timeout,
            client::connect(config, address, ClientHandler),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(self.connect_timeout.as_secs()))?
        .map_err(|e| ConnectionError::Unreachable(format!("{}: {}", host.address(), e)))?;

        let authenticated = tokio::time::timeout(
            self.connect_timeout,
            handle.authenticate_password(host.username.as_str(), host.password.as_str()),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(self.connect_timeout.as_secs()))?
        .map_err(|e| ConnectionError::Unreachable(format!("{}: {}", host.address(), e)))?;

        if !authenticated {
            return Err(ConnectionError::AuthFailed(host.username.clone()));
        }

        tracing::debug!(host = %host.address(), "SSH session established");
        Ok(handle)
    }

    /// Make sure the slot holds a live session, dialing if needed.
    async fn ensure_session<'a>(
        &self,
        guard: &'a mut Option<SessionEntry>,
        host: &host::Model,
    ) -> Result<&'a mut SessionEntry, ConnectionError> {
        let alive = guard
            .as_ref()
            .map(|entry| !entry.handle.is_closed())
            .unwrap_or(false);

        if !alive {
            let handle = self.open_session(host).await?;
            *guard = Some(SessionEntry {
                handle,
                last_used: Instant::now(),
            });
        }

        let entry = guard.as_mut().unwrap();
        entry.last_used = Instant::now();
        Ok(entry)
    }

    /// Run a command on the host's cached session, forcibly terminated
    /// at `timeout`. Issue order is preserved per host.
    pub async fn execute(
        &self,
        host: &host::Model,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, CommandError> {
        let slot = self.slot(host.id).await;
        let mut guard = slot.lock().await;
        let entry = self.ensure_session(&mut guard, host).await?;
        exec_on_handle(&entry.handle, command, timeout).await
    }

    /// Run a command over a one-shot, uncached session (ad-hoc
    /// credentials from the execute endpoint).
    pub async fn execute_transient(
        &self,
        host: &host::Model,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, CommandError> {
        let handle = self.open_session(host).await?;
        let result = exec_on_handle(&handle, command, timeout).await;
        let _ = handle
            .disconnect(Disconnect::ByApplication, "", "english")
            .await;
        result
    }

    /// Lightweight round trip: session + trivial remote probe.
    /// Expected failures come back as a result value.
    pub async fn test_connection(&self, host: &host::Model) -> ProbeResult {
        let start = Instant::now();
        let probe_timeout = Duration::from_secs(CONFIG.connect_timeout_secs);

        match self.execute(host, "echo connection_test", probe_timeout).await {
            Ok(output) if output.exit_code == 0 => ProbeResult {
                success: true,
                message: "connection ok".to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
            Ok(output) => ProbeResult {
                success: false,
                message: format!("probe exited with code {}", output.exit_code),
                latency_ms: None,
            },
            Err(e) => ProbeResult {
                success: false,
                message: e.to_string(),
                latency_ms: None,
            },
        }
    }

    /// Upload a single file over SFTP, creating parent directories.
    pub async fn upload_file(
        &self,
        host: &host::Model,
        content: &[u8],
        remote_path: &str,
    ) -> Result<(), CommandError> {
        if let Some(parent) = parent_dir(remote_path) {
            self.execute(
                host,
                &format!("mkdir -p {}", shell_quote(&parent)),
                Duration::from_secs(CONFIG.command_timeout_secs),
            )
            .await?;
        }

        let slot = self.slot(host.id).await;
        let mut guard = slot.lock().await;
        let entry = self.ensure_session(&mut guard, host).await?;
        let sftp = open_sftp(&entry.handle).await?;

        write_remote_file(&sftp, remote_path, content)
            .await
            .map_err(|e| CommandError::Connection(ConnectionError::Unreachable(e)))?;

        let _ = sftp.close().await;
        Ok(())
    }

    /// Upload a set of files under a remote base path. Files are
    /// transferred independently: one failure does not abort the rest,
    /// and nothing already transferred is rolled back.
    pub async fn upload_directory(
        &self,
        host: &host::Model,
        files: &[(String, Vec<u8>)],
        remote_base: &str,
    ) -> Result<DirectoryUploadResult, ConnectionError> {
        self.execute(
            host,
            &format!("mkdir -p {}", shell_quote(remote_base)),
            Duration::from_secs(CONFIG.command_timeout_secs),
        )
        .await
        .map_err(|e| match e {
            CommandError::Connection(c) => c,
            CommandError::Timeout { timeout_secs, .. } => ConnectionError::Timeout(timeout_secs),
        })?;

        let slot = self.slot(host.id).await;
        let mut guard = slot.lock().await;
        let entry = self.ensure_session(&mut guard, host).await?;
        let sftp = open_sftp(&entry.handle)
            .await
            .map_err(|e| match e {
                CommandError::Connection(c) => c,
                CommandError::Timeout { timeout_secs, .. } => {
                    ConnectionError::Timeout(timeout_secs)
                }
            })?;

        let mut failed = Vec::new();
        let mut succeeded = 0usize;

        for (rel_path, content) in files {
            let full_path = join_remote(remote_base, rel_path);

            if let Some(parent) = parent_dir(&full_path) {
                // create_dir fails when the directory exists; ignore
                // and let the file write surface real problems
                let _ = create_remote_dirs(&sftp, &parent).await;
            }

            match write_remote_file(&sftp, &full_path, content).await {
                Ok(()) => succeeded += 1,
                Err(e) => failed.push(FailedUpload {
                    path: rel_path.clone(),
                    error: e,
                }),
            }
        }

        let _ = sftp.close().await;

        Ok(DirectoryUploadResult {
            total: files.len(),
            succeeded,
            failed,
        })
    }

    /// Close and drop the cached session for a host (host deleted, or
    /// credentials changed).
    pub async fn invalidate(&self, host_id: i64) {
        let slot = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(&host_id)
        };
        if let Some(slot) = slot {
            let mut guard = slot.lock().await;
            if let Some(entry) = guard.take() {
                let _ = entry
                    .handle
                    .disconnect(Disconnect::ByApplication, "", "english")
                    .await;
                tracing::debug!(host_id, "SSH session invalidated");
            }
        }
    }

    /// Close sessions unused beyond the idle window. Returns how many
    /// were evicted.
    pub async fn evict_idle(&self) -> usize {
        let slots: Vec<(i64, SessionSlot)> = {
            let sessions = self.sessions.read().await;
            sessions.iter().map(|(k, v)| (*k, v.clone())).collect()
        };

        let mut evicted = 0;
        for (host_id, slot) in slots {
            let mut guard = slot.lock().await;
            let idle = guard
                .as_ref()
                .map(|entry| entry.last_used.elapsed() > self.idle_window)
                .unwrap_or(false);
            if idle {
                if let Some(entry) = guard.take() {
                    let _ = entry
                        .handle
                        .disconnect(Disconnect::ByApplication, "", "english")
                        .await;
                    tracing::debug!(host_id, "idle SSH session evicted");
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Number of hosts with a live cached session
    pub async fn cached_sessions(&self) -> usize {
        let slots: Vec<SessionSlot> = {
            let sessions = self.sessions.read().await;
            sessions.values().cloned().collect()
        };
        let mut live = 0;
        for slot in slots {
            let guard = slot.lock().await;
            if guard.is_some() {
                live += 1;
            }
        }
        live
    }
}

/// Run one command over an established session and collect output
/// until close or timeout. Partial output survives a timeout.
async fn exec_on_handle(
    handle: &Handle<ClientHandler>,
    command: &str,
    timeout: Duration,
) -> Result<ExecOutput, CommandError> {
    let start = Instant::now();

    let mut channel = handle
        .channel_open_session()
        .await
        .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;
    channel
        .exec(true, command)
        .await
        .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;

    let mut stdout: Vec<u8> = Vec::new();
    let mut stderr: Vec<u8> = Vec::new();
    let mut exit_code: Option<u32> = None;

    let collect = async {
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                _ => {}
            }
        }
    };

    if tokio::time::timeout(timeout, collect).await.is_err() {
        return Err(CommandError::Timeout {
            timeout_secs: timeout.as_secs(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        });
    }

    Ok(ExecOutput {
        exit_code: exit_code.map(|c| c as i32).unwrap_or(-1),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        duration_ms: start.elapsed().as_millis() as i64,
    })
}

async fn open_sftp(handle: &Handle<ClientHandler>) -> Result<SftpSession, CommandError> {
    let mut channel = handle
        .channel_open_session()
        .await
        .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;
    SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| ConnectionError::Unreachable(e.to_string()).into())
}

async fn write_remote_file(
    sftp: &SftpSession,
    remote_path: &str,
    content: &[u8],
) -> Result<(), String> {
    let mut file = sftp
        .create(remote_path)
        .await
        .map_err(|e| format!("create {}: {}", remote_path, e))?;
    file.write_all(content)
        .await
        .map_err(|e| format!("write {}: {}", remote_path, e))?;
    file.shutdown()
        .await
        .map_err(|e| format!("flush {}: {}", remote_path, e))?;
    Ok(())
}

/// mkdir -p equivalent over SFTP; existing directories are fine.
async fn create_remote_dirs(sftp: &SftpSession, path: &str) -> Result<(), String> {
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if path.starts_with('/') || !current.is_empty() {
            current.push('/');
        }
        current.push_str(segment);
        match sftp.create_dir(&current).await {
            Ok(()) => {}
            // Already exists (or no permission; the file write reports that)
            Err(_) => {}
        }
    }
    Ok(())
}

/// POSIX single-quote escaping, same scheme as the tooling this
/// replaces: close quote, escaped quote, reopen.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

fn parent_dir(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        return None;
    }
    Some(trimmed[..idx].to_string())
}

fn join_remote(base: &str, rel: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        rel.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::make_host;

    #[test]
    fn test_shell_quote_plain() {
        assert_eq!(shell_quote("/opt/app"), "'/opt/app'");
    }

    #[test]
    fn test_shell_quote_embedded_quote() {
        assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/opt/app/file.txt"), Some("/opt/app".to_string()));
        assert_eq!(parent_dir("/file.txt"), None);
        assert_eq!(parent_dir("file.txt"), None);
        assert_eq!(parent_dir("/opt/app/"), Some("/opt".to_string()));
    }

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/base/", "/sub/f"), "/base/sub/f");
        assert_eq!(join_remote("/base", "sub/f"), "/base/sub/f");
    }

    #[tokio::test]
    async fn test_connect_refused_is_unreachable() {
        let manager = SessionManager::new(Duration::from_secs(2), Duration::from_secs(60));
        // Port 1 on loopback refuses immediately
        let host = make_host(1, "127.0.0.1", 1);

        match manager.open_session(&host).await {
            Err(ConnectionError::Unreachable(_)) => {}
            Err(other) => panic!("expected Unreachable, got {}", other),
            Ok(_) => panic!("connect to a refusing port succeeded"),
        }
    }

    #[tokio::test]
    async fn test_probe_failure_has_no_latency() {
        let manager = SessionManager::new(Duration::from_secs(2), Duration::from_secs(60));
        let host = make_host(1, "127.0.0.1", 1);

        let probe = manager.test_connection(&host).await;
        assert!(!probe.success);
        assert!(probe.latency_ms.is_none());
        assert!(!probe.message.is_empty());
    }

    #[tokio::test]
    async fn test_key_auth_rejected() {
        let manager = SessionManager::new(Duration::from_secs(2), Duration::from_secs(60));
        let mut host = make_host(1, "127.0.0.1", 22);
        host.auth_type = AuthType::Key;

        match manager.open_session(&host).await {
            Err(ConnectionError::Unsupported(_)) => {}
            Err(other) => panic!("expected Unsupported, got {}", other),
            Ok(_) => panic!("key auth should not open a session"),
        }
    }

    #[tokio::test]
    async fn test_invalidate_unknown_host_is_noop() {
        let manager = SessionManager::new(Duration::from_secs(2), Duration::from_secs(60));
        manager.invalidate(42).await;
        assert_eq!(manager.cached_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_evict_idle_empty_registry() {
        let manager = SessionManager::new(Duration::from_secs(2), Duration::from_secs(0));
        assert_eq!(manager.evict_idle().await, 0);
    }
}
