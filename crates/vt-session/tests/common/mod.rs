//! In-process SSH server shared by the session tests
//!
//! Exec requests run with the local `sh`, fed with whatever the client sent
//! on stdin. The `sftp` subsystem serves the local filesystem, so uploads can
//! be checked with plain `std::fs`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use russh_keys::key::KeyPair;
use russh_sftp::protocol::{Attrs, FileAttributes, Handle, OpenFlags, Status, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::process::Command;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use vt_core::TunnelConfig;

pub const USER: &str = "admin";
pub const PASSWORD: &str = "s3cret";

/// Attributes received by SETSTAT requests, in arrival order
pub type SetstatLog = Arc<Mutex<Vec<FileAttributes>>>;

#[derive(Default)]
struct PendingExec {
    command: Option<String>,
    stdin: Vec<u8>,
}

#[derive(Default)]
pub struct ShellServer {
    channels: HashMap<ChannelId, PendingExec>,
    /// Held until the client picks exec or a subsystem
    open: HashMap<ChannelId, Channel<Msg>>,
    setstat_log: SetstatLog,
}

impl ShellServer {
    pub fn with_setstat_log(setstat_log: SetstatLog) -> Self {
        Self {
            setstat_log,
            ..Default::default()
        }
    }
}

async fn run_locally(command: &str, stdin: &[u8]) -> io::Result<std::process::Output> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()?;

    if let Some(mut child_stdin) = child.stdin.take() {
        child_stdin.write_all(stdin).await?;
    }
    child.wait_with_output().await
}

#[async_trait]
impl server::Handler for ShellServer {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == USER && password == PASSWORD {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), PendingExec::default());
        self.open.insert(channel.id(), channel);
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Stdin arrives through `data`, the channel handle is not needed
        self.open.remove(&channel);
        self.channels.entry(channel).or_default().command =
            Some(String::from_utf8_lossy(data).into_owned());
        session.channel_success(channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match self.open.remove(&channel_id) {
            Some(channel) if name == "sftp" => {
                self.channels.remove(&channel_id);
                session.channel_success(channel_id);
                let sftp = LocalSftp::new(self.setstat_log.clone());
                russh_sftp::server::run(channel.into_stream(), sftp).await;
            }
            _ => session.channel_failure(channel_id),
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(pending) = self.channels.get_mut(&channel) {
            pending.stdin.extend_from_slice(data);
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = self
            .channels
            .remove(&channel)
            .and_then(|pending| pending.command.map(|command| (command, pending.stdin)));
        let Some((command, stdin)) = command else {
            session.close(channel);
            return Ok(());
        };

        let output = run_locally(&command, &stdin).await?;
        if !output.stdout.is_empty() {
            session.data(channel, CryptoVec::from_slice(&output.stdout));
        }
        if !output.stderr.is_empty() {
            session.extended_data(channel, 1, CryptoVec::from_slice(&output.stderr));
        }
        let code = output.status.code().unwrap_or(255);
        session.exit_status_request(channel, code as u32);
        session.eof(channel);
        session.close(channel);
        Ok(())
    }
}

/// SFTP over the local filesystem, paths taken verbatim
struct LocalSftp {
    files: HashMap<String, fs::File>,
    next_handle: u64,
    setstat_log: SetstatLog,
}

impl LocalSftp {
    fn new(setstat_log: SetstatLog) -> Self {
        Self {
            files: HashMap::new(),
            next_handle: 0,
            setstat_log,
        }
    }
}

fn status_code(e: &io::Error) -> StatusCode {
    match e.kind() {
        io::ErrorKind::NotFound => StatusCode::NoSuchFile,
        io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        _ => StatusCode::Failure,
    }
}

fn ok(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en-US".to_string(),
    }
}

impl russh_sftp::server::Handler for LocalSftp {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let file = OpenOptions::from(pflags)
            .open(&filename)
            .map_err(|e| status_code(&e))?;
        self.next_handle += 1;
        let handle = self.next_handle.to_string();
        self.files.insert(handle.clone(), file);
        Ok(Handle { id, handle })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        let file = self.files.get(&handle).ok_or(StatusCode::Failure)?;
        file.write_all_at(&data, offset)
            .map_err(|e| status_code(&e))?;
        Ok(ok(id))
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        self.files.remove(&handle);
        Ok(ok(id))
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let metadata = fs::metadata(&path).map_err(|e| status_code(&e))?;
        Ok(Attrs {
            id,
            attrs: FileAttributes::from(&metadata),
        })
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        fs::create_dir(&path).map_err(|e| status_code(&e))?;
        Ok(ok(id))
    }

    async fn setstat(
        &mut self,
        id: u32,
        path: String,
        attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        if let Ok(mut log) = self.setstat_log.lock() {
            log.push(attrs.clone());
        }
        if let Some(mode) = attrs.permissions {
            fs::set_permissions(&path, fs::Permissions::from_mode(mode & 0o7777))
                .map_err(|e| status_code(&e))?;
        }
        Ok(ok(id))
    }
}

pub fn server_config() -> Arc<server::Config> {
    let mut config = server::Config::default();
    config
        .keys
        .push(KeyPair::generate_ed25519().expect("ed25519 key generation"));
    config.auth_rejection_time = Duration::from_millis(10);
    config.auth_rejection_time_initial = Some(Duration::from_millis(0));
    Arc::new(config)
}

/// Run `server` on `io` in the background
pub fn serve<S>(io: S, server: ShellServer)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let _ = server::run_stream(server_config(), io, server).await;
    });
}

/// Client end of a pipe with an SSH server on the other end
pub fn start_server() -> DuplexStream {
    start_server_with(ShellServer::default())
}

pub fn start_server_with(server: ShellServer) -> DuplexStream {
    let (client, server_io) = tokio::io::duplex(1 << 20);
    serve(server_io, server);
    client
}

/// Forward a server-role WebSocket into an SSH server, the way the
/// controller's port-forward does.
///
/// Bytes from the SSH server go out as binary messages of at most `chunk`
/// bytes, so the client has to reassemble messages into a stream.
pub async fn bridge_to_ssh<S>(ws: WebSocketStream<S>, server: ShellServer, chunk: usize)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut to_ssh, ssh_io) = tokio::io::duplex(1 << 20);
    serve(ssh_io, server);

    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        tokio::select! {
            message = ws_rx.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    if to_ssh.write_all(&data).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            read = to_ssh.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    for piece in buf[..n].chunks(chunk) {
                        if ws_tx.send(Message::Binary(piece.to_vec().into())).await.is_err() {
                            return;
                        }
                    }
                }
            },
        }
    }
    // Answer the client's close frame, if any
    let _ = ws_tx.close().await;
}

pub fn config(password: &str) -> TunnelConfig {
    TunnelConfig::new("http://controller.invalid/v1", "test-vm").with_credentials(USER, password)
}
