//! JSON envelopes and typed request/response views over them.
//!
//! On the wire every message is a JSON object. Requests carry a `type`
//! discriminator, responses a `status`. Raw file bytes travel in the
//! `content` field as standard base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, RequestError};
use crate::protocol::ops;

pub type Envelope = Map<String, Value>;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(value).map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<Envelope, ProtocolError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProtocolError::MalformedEnvelope(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ProtocolError::MalformedEnvelope(e.to_string())),
    }
}

pub fn encode_content(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_content(text: &str) -> Result<Vec<u8>, RequestError> {
    Ok(STANDARD.decode(text)?)
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ListFiles,
    DownloadFile { filename: String },
    UploadFile { filename: String, content: String },
    ServerInfo,
}

fn string_field(env: &Envelope, op: &'static str, field: &'static str) -> Result<String, RequestError> {
    match env.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        _ => Err(RequestError::MissingField { op, field }),
    }
}

impl Request {
    pub fn type_name(&self) -> &'static str {
        match self {
            Request::ListFiles => ops::LIST_FILES,
            Request::DownloadFile { .. } => ops::DOWNLOAD_FILE,
            Request::UploadFile { .. } => ops::UPLOAD_FILE,
            Request::ServerInfo => ops::SERVER_INFO,
        }
    }

    pub fn upload(filename: &str, bytes: &[u8]) -> Self {
        Request::UploadFile {
            filename: filename.to_string(),
            content: encode_content(bytes),
        }
    }

    /// Validate an envelope once, up front. Empty strings count as missing.
    pub fn from_envelope(env: &Envelope) -> Result<Self, RequestError> {
        let kind = match env.get("type") {
            Some(Value::String(s)) => s.as_str(),
            Some(other) => return Err(RequestError::UnknownRequestType(other.to_string())),
            None => return Err(RequestError::UnknownRequestType(String::new())),
        };
        match kind {
            ops::LIST_FILES => Ok(Request::ListFiles),
            ops::SERVER_INFO => Ok(Request::ServerInfo),
            ops::DOWNLOAD_FILE => Ok(Request::DownloadFile {
                filename: string_field(env, ops::DOWNLOAD_FILE, "filename")?,
            }),
            ops::UPLOAD_FILE => Ok(Request::UploadFile {
                filename: string_field(env, ops::UPLOAD_FILE, "filename")?,
                content: string_field(env, ops::UPLOAD_FILE, "content")?,
            }),
            other => Err(RequestError::UnknownRequestType(other.to_string())),
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let mut env = Envelope::new();
        env.insert("type".into(), Value::from(self.type_name()));
        match self {
            Request::DownloadFile { filename } => {
                env.insert("filename".into(), Value::from(filename.as_str()));
            }
            Request::UploadFile { filename, content } => {
                env.insert("filename".into(), Value::from(filename.as_str()));
                env.insert("content".into(), Value::from(content.as_str()));
            }
            Request::ListFiles | Request::ServerInfo => {}
        }
        env
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

/// A response envelope: the status plus whatever fields the operation
/// returns, kept flat as on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Response {
    pub status: Status,
    #[serde(flatten)]
    pub body: Envelope,
}

impl Response {
    pub fn success<T: Serialize>(payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(Value::Object(body)) => Response {
                status: Status::Success,
                body,
            },
            Ok(_) => Response::error("internal error: payload is not an object"),
            Err(e) => Response::error(format!("internal error: {}", e)),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let mut body = Envelope::new();
        body.insert("message".into(), Value::String(message.into()));
        Response {
            status: Status::Error,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn message(&self) -> Option<&str> {
        self.body.get("message").and_then(Value::as_str)
    }

    /// Interpret a success body as `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(Value::Object(self.body.clone()))
    }

    pub fn from_envelope(env: Envelope) -> Result<Self, ProtocolError> {
        serde_json::from_value(Value::Object(env))
            .map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))
    }
}

/// One file as reported by a listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub modified: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileListing {
    pub files: Vec<FileEntry>,
    pub count: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FilePayload {
    pub filename: String,
    pub content: String,
    pub size: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub message: String,
    pub filename: String,
    pub size: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub directory: String,
    /// Seconds since the server started.
    pub uptime: u64,
    pub started: String,
    pub max_frame_size: usize,
    pub supported_operations: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerInfoReply {
    pub server_info: ServerInfo,
}
