use anyhow::Result;
use filexfer::codec::{self, FilePayload, Request, UploadReceipt};
use filexfer::protocol::{frame, MAX_FRAME_SIZE};
use filexfer::protocol_core::{encode_frame, Decoded};
use filexfer::transport::FramedStream;
use filexfer::{ClientError, Response, Server, ServerConfig, Session};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl TestServer {
    async fn start(root: &Path) -> Result<Self> {
        Self::start_with(ServerConfig {
            bind: "127.0.0.1:0".into(),
            root: root.to_path_buf(),
            ..Default::default()
        })
        .await
    }

    async fn start_with(config: ServerConfig) -> Result<Self> {
        let server = Server::bind(&config).await?;
        let addr = server.local_addr()?;
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async move {
            let _ = rx.await;
        }));
        Ok(Self {
            addr,
            stop: Some(tx),
            task,
        })
    }

    async fn session(&self) -> Result<Session> {
        Ok(Session::open("127.0.0.1", self.addr.port()).await?)
    }

    fn signal_stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }

    async fn stop(mut self) -> Result<()> {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        self.task.await??;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_store_lists_nothing() -> Result<()> {
    let root = tempfile::tempdir()?;
    let server = TestServer::start(root.path()).await?;
    let mut session = server.session().await?;

    let resp = session.request(&Request::ListFiles).await?;
    assert_eq!(
        serde_json::to_value(&resp)?,
        serde_json::json!({"status": "success", "files": [], "count": 0})
    );
    assert!(session.list_files().await?.is_empty());

    session.disconnect().await;
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upload_then_download_same_connection() -> Result<()> {
    let root = tempfile::tempdir()?;
    let server = TestServer::start(root.path()).await?;
    let mut session = server.session().await?;

    let resp = session
        .request(&Request::UploadFile {
            filename: "a.txt".into(),
            content: codec::encode_content(b"hi"),
        })
        .await?;
    assert!(resp.is_success());
    let receipt: UploadReceipt = resp.payload()?;
    assert_eq!(receipt.size, 2);

    let resp = session
        .request(&Request::DownloadFile {
            filename: "a.txt".into(),
        })
        .await?;
    let payload: FilePayload = resp.payload()?;
    assert_eq!(payload.content, codec::encode_content(b"hi"));
    assert_eq!(payload.size, 2);

    assert_eq!(std::fs::read(root.path().join("a.txt"))?, b"hi");
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_file_is_a_server_error() -> Result<()> {
    let root = tempfile::tempdir()?;
    let server = TestServer::start(root.path()).await?;
    let mut session = server.session().await?;

    let resp = session
        .request(&Request::DownloadFile {
            filename: "missing.txt".into(),
        })
        .await?;
    assert!(!resp.is_success());
    assert!(resp.message().unwrap_or("").contains("missing.txt"));

    let dest = tempfile::tempdir()?;
    match session
        .download_file("missing.txt", Some(&dest.path().join("out")))
        .await
    {
        Err(e) => assert!(e.is_server_error(), "got {:?}", e),
        Ok(d) => panic!("unexpected download {:?}", d),
    }
    assert!(!dest.path().join("out").exists());

    // Connection is still usable
    assert!(session.list_files().await?.is_empty());
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_uploads_from_two_connections() -> Result<()> {
    let root = tempfile::tempdir()?;
    let server = TestServer::start(root.path()).await?;
    let mut s1 = server.session().await?;
    let mut s2 = server.session().await?;

    let a = vec![b'a'; 300_000];
    let b = vec![b'b'; 123_456];
    let (r1, r2) = tokio::join!(s1.put("one.bin", &a), s2.put("two.bin", &b));
    assert_eq!(r1?.size, 300_000);
    assert_eq!(r2?.size, 123_456);

    let files = s1.list_files().await?;
    let summary: Vec<(&str, u64)> = files.iter().map(|f| (f.name.as_str(), f.size)).collect();
    assert_eq!(summary, vec![("one.bin", 300_000), ("two.bin", 123_456)]);
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn large_binary_round_trip() -> Result<()> {
    let root = tempfile::tempdir()?;
    let server = TestServer::start(root.path()).await?;
    let mut session = server.session().await?;

    // Well past a single socket read, with every byte value present
    let data: Vec<u8> = (0..3 * 1024 * 1024).map(|i| (i % 256) as u8).collect();
    let local = tempfile::tempdir()?;
    let src = local.path().join("blob.bin");
    std::fs::write(&src, &data)?;

    let receipt = session.upload_file(&src, None).await?;
    assert_eq!(receipt.filename, "blob.bin");
    assert_eq!(receipt.size, data.len() as u64);

    // Destination already exists and is overwritten
    let dst = local.path().join("copy.bin");
    std::fs::write(&dst, b"stale contents")?;
    let downloaded = session.download_file("blob.bin", Some(&dst)).await?;
    assert_eq!(downloaded.size, data.len() as u64);
    assert_eq!(std::fs::read(&dst)?, data);
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn downloads_never_see_partial_overwrites() -> Result<()> {
    let root = tempfile::tempdir()?;
    let server = TestServer::start(root.path()).await?;
    let mut writer = server.session().await?;
    let mut reader = server.session().await?;
    writer.put("flip.bin", &vec![b'a'; 200_000]).await?;

    let write_task = tokio::spawn(async move {
        for round in 0..20 {
            let (byte, len) = if round % 2 == 0 { (b'b', 50_000) } else { (b'a', 200_000) };
            writer.put("flip.bin", &vec![byte; len]).await?;
        }
        Ok::<_, ClientError>(())
    });
    for _ in 0..20 {
        let data = reader.fetch("flip.bin").await?;
        let expected_len = if data[0] == b'a' { 200_000 } else { 50_000 };
        assert_eq!(data.len(), expected_len);
        assert!(data.iter().all(|b| *b == data[0]));
    }
    write_task.await??;
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_info_reports_operations() -> Result<()> {
    let root = tempfile::tempdir()?;
    let server = TestServer::start(root.path()).await?;
    let mut session = server.session().await?;

    let info = session.server_info().await?;
    assert_eq!(info.port, server.addr.port());
    assert_eq!(
        info.supported_operations,
        vec!["list_files", "download_file", "upload_file", "server_info"]
    );
    assert_eq!(
        Path::new(&info.directory),
        root.path().canonicalize()?.as_path()
    );
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn traversal_names_are_rejected() -> Result<()> {
    let base = tempfile::tempdir()?;
    let root = base.path().join("root");
    let server = TestServer::start(&root).await?;
    let mut session = server.session().await?;

    for name in ["../escape.txt", "sub/inner.txt", ".."] {
        match session.put(name, b"x").await {
            Err(ClientError::Server(msg)) => assert!(msg.contains("invalid filename"), "{}", msg),
            other => panic!("{} was accepted: {:?}", name, other),
        }
    }
    assert!(!base.path().join("escape.txt").exists());
    assert!(session.list_files().await?.is_empty());
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_stops_accepting() -> Result<()> {
    let root = tempfile::tempdir()?;
    let server = TestServer::start(root.path()).await?;
    let port = server.addr.port();
    let mut session = server.session().await?;
    session.put("keep.txt", b"kept").await?;

    server.stop().await?;

    // The open session notices on its next request
    assert!(session.list_files().await.is_err());
    assert!(!session.is_connected());
    assert!(matches!(
        Session::open("127.0.0.1", port).await,
        Err(ClientError::Connect { .. })
    ));
    assert_eq!(std::fs::read(root.path().join("keep.txt"))?, b"kept");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_finishes_request_already_arriving() -> Result<()> {
    let root = tempfile::tempdir()?;
    let mut server = TestServer::start(root.path()).await?;

    let body = vec![9u8; 4096];
    let payload = serde_json::to_vec(&Request::upload("late.bin", &body).to_envelope())?;
    let bytes = encode_frame(frame::REQUEST, &payload)?;
    let (head, tail) = bytes.split_at(200);

    let mut stream = TcpStream::connect(server.addr).await?;
    stream.write_all(head).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.signal_stop();
    tokio::time::sleep(Duration::from_millis(100)).await;
    stream.write_all(tail).await?;

    let mut conn = FramedStream::new(stream, MAX_FRAME_SIZE);
    let resp = match conn.read_frame().await? {
        Some(Decoded::Frame(f)) => Response::from_envelope(codec::decode(&f.payload)?)?,
        other => anyhow::bail!("expected a response frame, got {:?}", other),
    };
    assert!(resp.is_success(), "upload failed: {:?}", resp.message());
    assert_eq!(std::fs::read(root.path().join("late.bin"))?, body);

    // Answered, then closed without waiting for another request
    assert!(conn.read_frame().await?.is_none());
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transfer_log_records_each_operation() -> Result<()> {
    let root = tempfile::tempdir()?;
    let logs = tempfile::tempdir()?;
    let log_path = logs.path().join("transfer.log");
    let server = TestServer::start_with(ServerConfig {
        bind: "127.0.0.1:0".into(),
        root: root.path().to_path_buf(),
        log_file: Some(log_path.clone()),
        ..Default::default()
    })
    .await?;
    let mut session = server.session().await?;

    assert!(session.list_files().await?.is_empty());
    session.put("notes.txt", b"hello").await?;
    assert_eq!(session.list_files().await?.len(), 1);
    assert_eq!(session.fetch("notes.txt").await?, b"hello");
    assert!(session.fetch("missing.txt").await.is_err());
    session.disconnect().await;
    server.stop().await?;

    let text = std::fs::read_to_string(&log_path)?;
    let has = |needle: &str| text.lines().any(|l| l.contains(needle));
    assert!(has("CONNECT peer=127.0.0.1:"), "{}", text);
    assert!(has(" count=0"), "{}", text);
    assert!(has(" count=1"), "{}", text);
    assert!(
        text.lines()
            .any(|l| l.contains("UPLOAD peer=") && l.contains("name=notes.txt bytes=5")),
        "{}",
        text
    );
    assert!(
        text.lines()
            .any(|l| l.contains("DOWNLOAD peer=") && l.contains("name=notes.txt bytes=5")),
        "{}",
        text
    );
    assert!(
        text.lines().any(|l| l.contains("ERROR peer=")
            && l.contains("ctx=download_file")
            && l.contains("File not found: missing.txt")),
        "{}",
        text
    );
    assert!(has("DISCONNECT peer=") && has("requests=5"), "{}", text);
    assert_eq!(text.lines().filter(|l| l.contains("] LIST ")).count(), 2);
    assert!(!text.lines().any(|l| l.contains("UPLOAD") && l.contains("missing.txt")));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_connections_are_closed() -> Result<()> {
    let root = tempfile::tempdir()?;
    let server = TestServer::start_with(ServerConfig {
        bind: "127.0.0.1:0".into(),
        root: root.path().to_path_buf(),
        idle_timeout_secs: Some(1),
        ..Default::default()
    })
    .await?;
    let mut session = server.session().await?;
    assert!(session.list_files().await?.is_empty());

    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    assert!(session.list_files().await.is_err());

    // A fresh connection still works
    let mut fresh = server.session().await?;
    assert!(fresh.list_files().await?.is_empty());
    server.stop().await
}

#[tokio::test]
async fn request_without_connection() {
    let mut session = Session::new("127.0.0.1", 9);
    assert!(matches!(
        session.list_files().await,
        Err(ClientError::NotConnected)
    ));
}
