//! Newline-delimited JSON protocol spoken over `<home>/.docket/daemon.sock`.
//!
//! One request object per line, tagged by `cmd`; one response line per
//! request. File contents travel base64-encoded.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use docket_core::{CoreError, Document, DocumentId, DocumentVersion, UserId};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum DaemonRequest {
    Create {
        user: UserId,
        name: String,
        file_name: String,
        #[serde(with = "b64")]
        content: Vec<u8>,
    },
    AddCollaborator {
        user: UserId,
        document: DocumentId,
        collaborator: UserId,
    },
    RemoveCollaborator {
        user: UserId,
        document: DocumentId,
        collaborator: UserId,
    },
    Fetch {
        user: UserId,
        document: DocumentId,
    },
    Upload {
        user: UserId,
        document: DocumentId,
        file_name: String,
        #[serde(with = "b64")]
        content: Vec<u8>,
    },
    Release {
        user: UserId,
        document: DocumentId,
    },
    Rename {
        user: UserId,
        document: DocumentId,
        name: String,
    },
    Versions {
        document: DocumentId,
    },
    List,
    Status,
    Stop,
}

impl DaemonRequest {
    /// The `cmd` tag, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            DaemonRequest::Create { .. } => "create",
            DaemonRequest::AddCollaborator { .. } => "add_collaborator",
            DaemonRequest::RemoveCollaborator { .. } => "remove_collaborator",
            DaemonRequest::Fetch { .. } => "fetch",
            DaemonRequest::Upload { .. } => "upload",
            DaemonRequest::Release { .. } => "release",
            DaemonRequest::Rename { .. } => "rename",
            DaemonRequest::Versions { .. } => "versions",
            DaemonRequest::List => "list",
            DaemonRequest::Status => "status",
            DaemonRequest::Stop => "stop",
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Snake_case error tag, see [`CoreError::kind`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            kind: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
            kind: None,
        }
    }

    pub fn refused(err: &CoreError) -> Self {
        Self {
            kind: Some(err.kind().to_string()),
            ..Self::error(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Reply payloads
// ---------------------------------------------------------------------------

/// `data` of a `fetch` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchReply {
    pub document: Document,
    pub file_name: String,
    pub media_type: String,
    #[serde(with = "b64")]
    pub content: Vec<u8>,
}

/// `data` of `create` and `upload` responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    pub document: Document,
    pub version: DocumentVersion,
}

/// `data` of a `release` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReply {
    pub released: Option<UserId>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Send `request` and decode the `data` of a successful response as `T`.
pub fn call<T: DeserializeOwned>(home: &Path, request: &DaemonRequest) -> Result<T, DaemonError> {
    let data = response_into_data(send_request(home, request)?)?;
    Ok(serde_json::from_value(data)?)
}

pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &DaemonRequest::Status) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::Stop)?;
    response_into_data(response).map(|_| ())
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        return Ok(response.data.unwrap_or(Value::Null));
    }
    let message = response
        .error
        .unwrap_or_else(|| "unknown daemon error".to_string());
    match response.kind {
        Some(kind) => Err(DaemonError::Rejected { kind, message }),
        None => Err(DaemonError::Protocol(message)),
    }
}

/// Base64 (standard alphabet) for byte payloads.
mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
