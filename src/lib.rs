//! filexfer library
//!
//! List, upload and download files held by a server over one persistent TCP
//! connection. Requests and responses are JSON envelopes carried in
//! length-prefixed frames; file content travels as base64.

pub mod bootstrap;
pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logger;
pub mod protocol;
pub mod protocol_core;
pub mod server;
pub mod shell;
pub mod store;
pub mod transport;

pub use client::{Downloaded, Session};
pub use codec::{Envelope, FileEntry, Request, Response, ServerInfo, Status};
pub use config::ServerConfig;
pub use dispatch::Dispatcher;
pub use error::{ClientError, ProtocolError, RequestError, StoreError};
pub use server::Server;
pub use store::FileStore;
