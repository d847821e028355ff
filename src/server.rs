//! Listener and per-connection handler.
//!
//! One tokio task per accepted connection. Each task owns its socket and
//! frame buffer; the only state shared between tasks is the file store
//! behind the dispatcher.

use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::codec::{Request, Response};
use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, ServerMeta};
use crate::error::ProtocolError;
use crate::logger::{Logger, NoopLogger, TextLogger};
use crate::protocol::{frame, timeouts};
use crate::protocol_core::Decoded;
use crate::store::FileStore;
use crate::transport::FramedStream;

/// What a handler needs besides its socket.
struct ConnContext {
    dispatcher: Arc<Dispatcher>,
    logger: Arc<dyn Logger>,
    max_frame_size: usize,
    idle_timeout: Option<Duration>,
}

enum Next {
    Frame(Decoded),
    Closed,
    IdleTimeout,
    Shutdown,
    DrainTimeout,
}

/// Request kind and target name, kept for the audit log after the request
/// itself (possibly a large upload) has been consumed.
struct Summary {
    kind: &'static str,
    filename: Option<String>,
}

impl Summary {
    fn of(request: &Request) -> Self {
        let filename = match request {
            Request::DownloadFile { filename } | Request::UploadFile { filename, .. } => {
                Some(filename.clone())
            }
            Request::ListFiles | Request::ServerInfo => None,
        };
        Self {
            kind: request.type_name(),
            filename,
        }
    }
}

pub struct Server {
    listener: TcpListener,
    ctx: Arc<ConnContext>,
}

impl Server {
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let logger: Arc<dyn Logger> = match &config.log_file {
            Some(path) => Arc::new(
                TextLogger::new(path)
                    .with_context(|| format!("open transfer log {}", path.display()))?,
            ),
            None => Arc::new(NoopLogger),
        };
        Self::bind_with_logger(config, logger).await
    }

    pub async fn bind_with_logger(config: &ServerConfig, logger: Arc<dyn Logger>) -> Result<Self> {
        let store = FileStore::open(&config.root)
            .with_context(|| format!("open file store {}", config.root.display()))?;
        let listener = TcpListener::bind(&config.bind)
            .await
            .with_context(|| format!("bind {}", config.bind))?;
        let local = listener.local_addr()?;
        let meta = ServerMeta::new(local.ip().to_string(), local.port());
        let dispatcher = Dispatcher::new(Arc::new(store), meta, config.max_frame_size);
        Ok(Self {
            listener,
            ctx: Arc::new(ConnContext {
                dispatcher: Arc::new(dispatcher),
                logger,
                max_frame_size: config.max_frame_size,
                idle_timeout: config.idle_timeout(),
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn store(&self) -> &Arc<FileStore> {
        self.ctx.dispatcher.store()
    }

    /// Serve until `signal` resolves, then stop accepting and wait for open
    /// connections to finish their current request.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (tx, rx) = watch::channel(false);
        let accept = self.run(rx);
        tokio::pin!(accept);
        tokio::select! {
            res = &mut accept => return res,
            _ = signal => {
                info!("shutdown requested");
                let _ = tx.send(true);
            }
        }
        accept.await
    }

    /// Accept loop. Exits when `shutdown` flips to true or its sender is
    /// dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "filexfer daemon listening on {} root={}",
            self.local_addr()?,
            self.store().root().display()
        );
        let mut handlers: JoinSet<()> = JoinSet::new();
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                res = self.listener.accept() => match res {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        let ctx = self.ctx.clone();
                        let rx = shutdown.clone();
                        handlers.spawn(handle_connection(stream, peer, ctx, rx));
                    }
                    Err(e) => {
                        // Per-connection accept failures (e.g. EMFILE) must not end the loop
                        warn!("accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(res) = handlers.join_next(), if !handlers.is_empty() => {
                    log_handler_exit(res);
                }
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }

        drop(self.listener);
        info!("listener closed; waiting for {} connection(s)", handlers.len());
        while let Some(res) = handlers.join_next().await {
            log_handler_exit(res);
        }
        Ok(())
    }
}

fn log_handler_exit(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            error!("connection handler panicked: {}", e);
        }
    }
}

/// Resolve when `signal` fires. A signal source that fails to install never
/// resolves, so the server keeps running instead of stopping at startup.
async fn until_signal<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Bind per `config` and serve until Ctrl-C.
pub async fn serve(config: &ServerConfig) -> Result<()> {
    let server = Server::bind(config).await?;
    server.run_until(until_signal(tokio::signal::ctrl_c())).await
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ConnContext>,
    shutdown: watch::Receiver<bool>,
) {
    info!("connection from {}", peer);
    ctx.logger.connected(peer);
    let mut served = 0u64;
    let result = connection_loop(stream, peer, &ctx, shutdown, &mut served).await;
    match &result {
        Ok(()) => info!("connection closed for {} ({} requests)", peer, served),
        Err(e) => {
            warn!("connection {} ended with error after {} requests: {}", peer, served, e);
            ctx.logger.error(peer, "connection", &e.to_string());
        }
    }
    ctx.logger.disconnected(peer, served);
}

/// Wait for the next frame. Once shutdown is requested (or its sender is
/// gone) an idle connection stops at once, while a partially received
/// request is read to completion within `SHUTDOWN_DRAIN_MS`.
async fn next_frame(
    framed: &mut FramedStream<TcpStream>,
    idle: Option<Duration>,
    shutdown: &mut watch::Receiver<bool>,
    draining: &mut bool,
) -> Result<Next, ProtocolError> {
    loop {
        if *shutdown.borrow() {
            *draining = true;
        }
        if *draining {
            if framed.is_idle() {
                return Ok(Next::Shutdown);
            }
            let limit = Duration::from_millis(timeouts::SHUTDOWN_DRAIN_MS);
            return match timeout(limit, framed.read_frame()).await {
                Ok(r) => r.map(|f| f.map_or(Next::Closed, Next::Frame)),
                Err(_) => Ok(Next::DrainTimeout),
            };
        }

        let read = async {
            match idle {
                Some(d) => match timeout(d, framed.read_frame()).await {
                    Ok(r) => r.map(|f| f.map_or(Next::Closed, Next::Frame)),
                    Err(_) => Ok(Next::IdleTimeout),
                },
                None => framed
                    .read_frame()
                    .await
                    .map(|f| f.map_or(Next::Closed, Next::Frame)),
            }
        };
        tokio::select! {
            r = read => return r,
            res = shutdown.changed() => {
                if res.is_err() {
                    *draining = true;
                }
            }
        }
    }
}

async fn connection_loop(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &Arc<ConnContext>,
    mut shutdown: watch::Receiver<bool>,
    served: &mut u64,
) -> Result<(), ProtocolError> {
    let mut framed = FramedStream::new(stream, ctx.max_frame_size);
    let mut draining = false;
    loop {
        let next =
            next_frame(&mut framed, ctx.idle_timeout, &mut shutdown, &mut draining).await?;
        let decoded = match next {
            Next::Frame(d) => d,
            Next::Closed => return Ok(()),
            Next::IdleTimeout => {
                debug!("{} idle for {:?}, closing", peer, ctx.idle_timeout);
                return Ok(());
            }
            Next::Shutdown => {
                let _ = framed.shutdown().await;
                return Ok(());
            }
            Next::DrainTimeout => {
                warn!(
                    "{} did not finish its request within {}ms of shutdown, closing",
                    peer,
                    timeouts::SHUTDOWN_DRAIN_MS
                );
                return Ok(());
            }
        };

        let response = match decoded {
            Decoded::Oversized { len, .. } => {
                warn!("{} sent an oversized frame ({} bytes)", peer, len);
                Response::error(format!(
                    "Request too large: {} bytes (max: {})",
                    len, ctx.max_frame_size
                ))
            }
            Decoded::Frame(f) if f.kind != frame::REQUEST => {
                Response::error(ProtocolError::UnexpectedFrameKind(f.kind).to_string())
            }
            Decoded::Frame(f) => {
                let dispatcher = ctx.dispatcher.clone();
                let payload = f.payload;
                let joined = tokio::task::spawn_blocking(move || {
                    match Dispatcher::parse(&payload) {
                        Ok(request) => {
                            let response = dispatcher.dispatch(&request);
                            (Some(Summary::of(&request)), response)
                        }
                        Err(response) => (None, response),
                    }
                })
                .await;
                let (summary, response) = match joined {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("dispatch for {} failed: {}", peer, e);
                        (None, Response::error("Internal server error"))
                    }
                };
                audit(ctx.logger.as_ref(), peer, summary.as_ref(), &response);
                response
            }
        };

        framed.send(frame::RESPONSE, &response).await?;
        *served += 1;
    }
}

fn audit(logger: &dyn Logger, peer: SocketAddr, summary: Option<&Summary>, response: &Response) {
    let kind = summary.map_or("request", |s| s.kind);
    if !response.is_success() {
        let msg = response.message().unwrap_or("");
        debug!("{} {} -> error: {}", peer, kind, msg);
        logger.error(peer, kind, msg);
        return;
    }
    let Some(summary) = summary else {
        return;
    };
    let size = response.body.get("size").and_then(|v| v.as_u64()).unwrap_or(0);
    let name = summary.filename.as_deref().unwrap_or("");
    debug!("{} {} {} ok", peer, kind, name);
    match summary.kind {
        crate::protocol::ops::LIST_FILES => {
            let count = response.body.get("count").and_then(|v| v.as_u64()).unwrap_or(0);
            logger.listed(peer, count as usize);
        }
        crate::protocol::ops::UPLOAD_FILE => logger.uploaded(peer, name, size),
        crate::protocol::ops::DOWNLOAD_FILE => logger.downloaded(peer, name, size),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_until_signal_resolves_on_signal() {
        let fired = timeout(Duration::from_secs(1), until_signal(async { Ok(()) })).await;
        assert!(fired.is_ok());
    }

    #[tokio::test]
    async fn test_until_signal_waits_forever_on_install_failure() {
        let failed = async { Err(std::io::Error::other("no signal support")) };
        let fired = timeout(Duration::from_millis(100), until_signal(failed)).await;
        assert!(fired.is_err());
    }
}
