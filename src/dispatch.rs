//! Request dispatch: decoded request in, response envelope out.
//!
//! Nothing here knows about sockets or tasks. Every input, including bytes
//! that do not decode, yields a response.

use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Instant;

use crate::codec::{
    self, FileListing, FilePayload, Request, Response, ServerInfo, ServerInfoReply, UploadReceipt,
};
use crate::error::{RequestError, StoreError};
use crate::protocol::{encoded_len, ops};
use crate::store::FileStore;

// Room for the JSON around `content` in a download response
const RESPONSE_OVERHEAD: usize = 512;

/// Static facts about the running server reported by `server_info`.
#[derive(Debug, Clone)]
pub struct ServerMeta {
    pub host: String,
    pub port: u16,
    pub started: DateTime<Local>,
    started_at: Instant,
}

impl ServerMeta {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            started: Local::now(),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub struct Dispatcher {
    store: Arc<FileStore>,
    meta: ServerMeta,
    max_frame_size: usize,
}

fn store_error_response(e: &StoreError) -> Response {
    match e {
        StoreError::NotFound(_) | StoreError::InvalidName(_) => Response::error(e.to_string()),
        StoreError::Io { name, source } => {
            Response::error(format!("Error accessing file {}: {}", name, source))
        }
    }
}

fn request_error_response(e: &RequestError) -> Response {
    match e {
        RequestError::UnknownRequestType(_) => Response::error(e.to_string()),
        RequestError::MissingField {
            op: ops::DOWNLOAD_FILE,
            ..
        } => Response::error("Filename not provided"),
        RequestError::MissingField { .. } => Response::error("Filename and content are required"),
        RequestError::InvalidContent(err) => {
            Response::error(format!("Error uploading file: invalid base64 content: {}", err))
        }
    }
}

impl Dispatcher {
    pub fn new(store: Arc<FileStore>, meta: ServerMeta, max_frame_size: usize) -> Self {
        Self {
            store,
            meta,
            max_frame_size,
        }
    }

    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    /// Decode and validate one request payload.
    pub fn parse(payload: &[u8]) -> Result<Request, Response> {
        let env = codec::decode(payload)
            .map_err(|e| Response::error(format!("Invalid JSON format: {}", e)))?;
        Request::from_envelope(&env).map_err(|e| request_error_response(&e))
    }

    pub fn handle_payload(&self, payload: &[u8]) -> Response {
        match Self::parse(payload) {
            Ok(request) => self.dispatch(&request),
            Err(response) => response,
        }
    }

    pub fn dispatch(&self, request: &Request) -> Response {
        match request {
            Request::ListFiles => self.list_files(),
            Request::DownloadFile { filename } => self.download_file(filename),
            Request::UploadFile { filename, content } => self.upload_file(filename, content),
            Request::ServerInfo => self.server_info(),
        }
    }

    fn list_files(&self) -> Response {
        match self.store.list() {
            Ok(files) => Response::success(&FileListing {
                count: files.len(),
                files,
            }),
            Err(e) => Response::error(format!("Error listing files: {}", e)),
        }
    }

    fn check_fits(&self, filename: &str, size: u64) -> Result<(), Response> {
        let needed = encoded_len(size as usize)
            // JSON escapes a control character as \u00XX
            .saturating_add(filename.len() * 6)
            .saturating_add(RESPONSE_OVERHEAD);
        if needed > self.max_frame_size {
            return Err(Response::error(format!(
                "File too large for transfer: {} ({} bytes, frame limit {} bytes)",
                filename, size, self.max_frame_size
            )));
        }
        Ok(())
    }

    fn download_file(&self, filename: &str) -> Response {
        let entry = match self.store.stat(filename) {
            Ok(entry) => entry,
            Err(e) => return store_error_response(&e),
        };
        if let Err(resp) = self.check_fits(filename, entry.size) {
            return resp;
        }
        let bytes = match self.store.read(filename) {
            Ok(b) => b,
            Err(e) => return store_error_response(&e),
        };
        // The file may have been replaced between stat and read
        if let Err(resp) = self.check_fits(filename, bytes.len() as u64) {
            return resp;
        }
        Response::success(&FilePayload {
            filename: filename.to_string(),
            content: codec::encode_content(&bytes),
            size: bytes.len() as u64,
        })
    }

    fn upload_file(&self, filename: &str, content: &str) -> Response {
        let bytes = match codec::decode_content(content) {
            Ok(b) => b,
            Err(e) => return request_error_response(&e),
        };
        match self.store.write(filename, &bytes) {
            Ok(entry) => Response::success(&UploadReceipt {
                message: format!("File uploaded successfully: {}", filename),
                filename: filename.to_string(),
                size: entry.size,
            }),
            Err(e) => store_error_response(&e),
        }
    }

    fn server_info(&self) -> Response {
        Response::success(&ServerInfoReply {
            server_info: ServerInfo {
                host: self.meta.host.clone(),
                port: self.meta.port,
                directory: self.store.root().display().to_string(),
                uptime: self.meta.uptime_secs(),
                started: self.meta.started.format("%Y-%m-%d %H:%M:%S").to_string(),
                max_frame_size: self.max_frame_size,
                supported_operations: ops::SUPPORTED.iter().map(|s| s.to_string()).collect(),
            },
        })
    }
}
