use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use docket_core::{ContentStore, CoreError, Repository, Upload};
use docket_sync::{Engine, FsEngine};

use crate::error::{io_err, DaemonError};
use crate::paths::{docket_root, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse, FetchReply, ReleaseReply, VersionReply};

/// State shared by every connection.
struct Shared {
    engine: Arc<FsEngine>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
    socket: PathBuf,
    served: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: u32,
    pub started_at_unix: u64,
    pub socket: String,
    pub documents: usize,
    pub requests_served: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime: socket server plus ctrl-c handler.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let engine = Arc::new(FsEngine::open_at(&home)?);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let shared = Arc::new(Shared {
        engine,
        shutdown_tx: shutdown_tx.clone(),
        started_at_unix: unix_seconds_now(),
        socket: socket_path(&home),
        served: AtomicU64::new(0),
    });
    tracing::info!(home = %home.display(), "docket daemon starting");

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            let result = socket_server_task(shared, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!(
        requests = shared.served.load(Ordering::Relaxed),
        "docket daemon stopped"
    );
    Ok(())
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = docket_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        set_dir_permissions(&root)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    shared: Arc<Shared>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = shared.socket.clone();
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, shared).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, shared: Arc<Shared>) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let cmd = request.name();
        shared.served.fetch_add(1, Ordering::Relaxed);
        let stopping = matches!(request, DaemonRequest::Stop);

        let response = match request {
            DaemonRequest::Status => match build_status(&shared).await {
                Ok(status) => DaemonResponse::ok(json!(status)),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            DaemonRequest::Stop => {
                tracing::info!("stop requested over socket");
                let _ = shared.shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            request => {
                // Engine calls block on file locks; keep them off the reactor.
                let engine = shared.engine.clone();
                tokio::task::spawn_blocking(move || dispatch(&engine, request))
                    .await
                    .unwrap_or_else(|err| {
                        DaemonResponse::error(format!("{cmd} worker failed: {err}"))
                    })
            }
        };

        if response.ok {
            tracing::debug!(cmd, "request served");
        } else {
            tracing::warn!(
                cmd,
                kind = response.kind.as_deref().unwrap_or("protocol"),
                error = response.error.as_deref().unwrap_or_default(),
                "request refused"
            );
        }

        write_response(&mut writer, &response).await?;
        if stopping {
            break;
        }
    }

    Ok(())
}

async fn build_status(shared: &Shared) -> Result<DaemonStatus, DaemonError> {
    let engine = shared.engine.clone();
    let documents = tokio::task::spawn_blocking(move || engine.list_documents())
        .await
        .map_err(|err| DaemonError::Protocol(format!("status worker failed: {err}")))?
        .map_err(|err| DaemonError::Protocol(err.to_string()))?
        .len();
    Ok(DaemonStatus {
        running: true,
        pid: std::process::id(),
        started_at_unix: shared.started_at_unix,
        socket: shared.socket.display().to_string(),
        documents,
        requests_served: shared.served.load(Ordering::Relaxed),
    })
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Run one engine request to completion. Status and stop never get here.
pub(crate) fn dispatch<R: Repository, S: ContentStore>(
    engine: &Engine<R, S>,
    request: DaemonRequest,
) -> DaemonResponse {
    match execute(engine, request) {
        Ok(data) => DaemonResponse::ok(data),
        Err(Dispatch::Core(err)) => DaemonResponse::refused(&err),
        Err(Dispatch::Other(message)) => DaemonResponse::error(message),
    }
}

enum Dispatch {
    Core(CoreError),
    Other(String),
}

impl From<CoreError> for Dispatch {
    fn from(err: CoreError) -> Self {
        Dispatch::Core(err)
    }
}

impl From<serde_json::Error> for Dispatch {
    fn from(err: serde_json::Error) -> Self {
        Dispatch::Other(format!("failed to encode reply: {err}"))
    }
}

fn execute<R: Repository, S: ContentStore>(
    engine: &Engine<R, S>,
    request: DaemonRequest,
) -> Result<Value, Dispatch> {
    let data = match request {
        DaemonRequest::Create {
            user,
            name,
            file_name,
            content,
        } => {
            let (document, version) =
                engine.create_document(&name, &Upload::new(file_name, content), &user)?;
            serde_json::to_value(VersionReply { document, version })?
        }
        DaemonRequest::AddCollaborator {
            user,
            document,
            collaborator,
        } => serde_json::to_value(engine.add_collaborator(document, &user, &collaborator)?)?,
        DaemonRequest::RemoveCollaborator {
            user,
            document,
            collaborator,
        } => serde_json::to_value(engine.remove_collaborator(document, &user, &collaborator)?)?,
        DaemonRequest::Fetch { user, document } => {
            let handle = engine.fetch_and_lock(document, &user)?;
            serde_json::to_value(FetchReply {
                document: handle.document,
                file_name: handle.file_name,
                media_type: handle.media_type.to_string(),
                content: handle.bytes,
            })?
        }
        DaemonRequest::Upload {
            user,
            document,
            file_name,
            content,
        } => {
            let (document, version) =
                engine.upload_new_content(document, &Upload::new(file_name, content), &user)?;
            serde_json::to_value(VersionReply { document, version })?
        }
        DaemonRequest::Release { user, document } => {
            let released = engine.release_lock(document, &user)?;
            serde_json::to_value(ReleaseReply { released })?
        }
        DaemonRequest::Rename {
            user,
            document,
            name,
        } => serde_json::to_value(engine.rename_document(document, &user, &name)?)?,
        DaemonRequest::Versions { document } => {
            serde_json::to_value(engine.list_versions(document)?)?
        }
        DaemonRequest::List => serde_json::to_value(engine.list_documents()?)?,
        DaemonRequest::Status | DaemonRequest::Stop => {
            return Err(Dispatch::Other(
                "status and stop are handled by the socket loop".to_string(),
            ))
        }
    };
    Ok(data)
}

// ---------------------------------------------------------------------------
// Plumbing
// ---------------------------------------------------------------------------

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
