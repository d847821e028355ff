//! Client session: one connection, one request in flight at a time.

use std::path::{Path, PathBuf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::debug;

use crate::codec::{
    self, FileEntry, FileListing, FilePayload, Request, Response, ServerInfo, ServerInfoReply,
    UploadReceipt,
};
use crate::error::{ClientError, ProtocolError};
use crate::protocol::{frame, timeouts, MAX_FRAME_SIZE};
use crate::protocol_core::Decoded;
use crate::transport::FramedStream;

/// Result of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub filename: String,
    pub size: u64,
    pub path: PathBuf,
}

pub struct Session {
    addr: String,
    max_frame_size: usize,
    stream: Option<FramedStream<TcpStream>>,
}

impl Session {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            max_frame_size: MAX_FRAME_SIZE,
            stream: None,
        }
    }

    /// Accept response frames up to `max` bytes.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Create and connect in one step.
    pub async fn open(host: &str, port: u16) -> Result<Self, ClientError> {
        let mut session = Self::new(host, port);
        session.connect().await?;
        Ok(session)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn connect(&mut self) -> Result<(), ClientError> {
        let connect = TcpStream::connect(&self.addr);
        let stream = match timeout(Duration::from_millis(timeouts::CONNECT_MS), connect).await {
            Ok(Ok(s)) => s,
            Ok(Err(source)) => {
                return Err(ClientError::Connect {
                    addr: self.addr.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(ClientError::Connect {
                    addr: self.addr.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connection timeout"),
                })
            }
        };
        let _ = stream.set_nodelay(true);
        debug!("connected to {}", self.addr);
        self.stream = Some(FramedStream::new(stream, self.max_frame_size));
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!("disconnected from {}", self.addr);
        }
    }

    /// Send one request frame and wait for exactly one response frame.
    ///
    /// Transport failures drop the connection; a later call needs
    /// `connect()` again.
    pub async fn request(&mut self, request: &Request) -> Result<Response, ClientError> {
        let result = self.round_trip(request).await;
        if matches!(
            result,
            Err(ClientError::Protocol(_)) | Err(ClientError::Disconnected)
        ) {
            self.stream = None;
        }
        result
    }

    async fn round_trip(&mut self, request: &Request) -> Result<Response, ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        stream.send(frame::REQUEST, &request.to_envelope()).await?;
        match stream.read_frame().await? {
            None => Err(ClientError::Disconnected),
            Some(Decoded::Oversized { len, .. }) => Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_frame_size,
            }
            .into()),
            Some(Decoded::Frame(f)) if f.kind != frame::RESPONSE => {
                Err(ProtocolError::UnexpectedFrameKind(f.kind).into())
            }
            Some(Decoded::Frame(f)) => {
                let env = codec::decode(&f.payload)?;
                Ok(Response::from_envelope(env)?)
            }
        }
    }

    /// Request and require a success status, parsing the body as `T`.
    async fn call<T: serde::de::DeserializeOwned>(
        &mut self,
        request: &Request,
    ) -> Result<T, ClientError> {
        let response = self.request(request).await?;
        if !response.is_success() {
            let msg = response.message().unwrap_or("Unknown error").to_string();
            return Err(ClientError::Server(msg));
        }
        response
            .payload()
            .map_err(|e| ClientError::UnexpectedResponse(e.to_string()))
    }

    pub async fn list_files(&mut self) -> Result<Vec<FileEntry>, ClientError> {
        let listing: FileListing = self.call(&Request::ListFiles).await?;
        Ok(listing.files)
    }

    pub async fn server_info(&mut self) -> Result<ServerInfo, ClientError> {
        let reply: ServerInfoReply = self.call(&Request::ServerInfo).await?;
        Ok(reply.server_info)
    }

    /// Fetch `filename` into memory.
    pub async fn fetch(&mut self, filename: &str) -> Result<Vec<u8>, ClientError> {
        let request = Request::DownloadFile {
            filename: filename.to_string(),
        };
        let payload: FilePayload = self.call(&request).await?;
        codec::decode_content(&payload.content)
            .map_err(|e| ClientError::UnexpectedResponse(e.to_string()))
    }

    /// Download `filename` to `local_path` (default: the remote name in the
    /// current directory), replacing any existing file.
    pub async fn download_file(
        &mut self,
        filename: &str,
        local_path: Option<&Path>,
    ) -> Result<Downloaded, ClientError> {
        let bytes = self.fetch(filename).await?;
        let path = local_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(filename));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| ClientError::LocalFile {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Downloaded {
            filename: filename.to_string(),
            size: bytes.len() as u64,
            path,
        })
    }

    /// Upload in-memory bytes under `remote_name`.
    pub async fn put(&mut self, remote_name: &str, bytes: &[u8]) -> Result<UploadReceipt, ClientError> {
        self.call(&Request::upload(remote_name, bytes)).await
    }

    /// Read `local_path` fully and upload it as `remote_name` (default: the
    /// local file name).
    pub async fn upload_file(
        &mut self,
        local_path: &Path,
        remote_name: Option<&str>,
    ) -> Result<UploadReceipt, ClientError> {
        let local_err = |source| ClientError::LocalFile {
            path: local_path.display().to_string(),
            source,
        };
        let bytes = tokio::fs::read(local_path).await.map_err(local_err)?;
        let name = match remote_name {
            Some(n) => n.to_string(),
            None => local_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    local_err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "path has no file name",
                    ))
                })?,
        };
        self.put(&name, &bytes).await
    }
}
