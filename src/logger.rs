use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;

/// Transfer audit trail. Diagnostics go through `tracing`; this records
/// what each peer did with the store.
pub trait Logger: Send + Sync {
    fn connected(&self, _peer: SocketAddr) {}
    fn disconnected(&self, _peer: SocketAddr, _requests: u64) {}
    fn listed(&self, _peer: SocketAddr, _count: usize) {}
    fn uploaded(&self, _peer: SocketAddr, _name: &str, _bytes: u64) {}
    fn downloaded(&self, _peer: SocketAddr, _name: &str, _bytes: u64) {}
    fn error(&self, _peer: SocketAddr, _context: &str, _msg: &str) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn connected(&self, peer: SocketAddr) {
        self.line(&format!("CONNECT peer={}", peer));
    }
    fn disconnected(&self, peer: SocketAddr, requests: u64) {
        self.line(&format!("DISCONNECT peer={} requests={}", peer, requests));
    }
    fn listed(&self, peer: SocketAddr, count: usize) {
        self.line(&format!("LIST peer={} count={}", peer, count));
    }
    fn uploaded(&self, peer: SocketAddr, name: &str, bytes: u64) {
        self.line(&format!("UPLOAD peer={} name={} bytes={}", peer, name, bytes));
    }
    fn downloaded(&self, peer: SocketAddr, name: &str, bytes: u64) {
        self.line(&format!("DOWNLOAD peer={} name={} bytes={}", peer, name, bytes));
    }
    fn error(&self, peer: SocketAddr, context: &str, msg: &str) {
        self.line(&format!("ERROR peer={} ctx={} msg={}", peer, context, msg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_logger_appends_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs").join("transfer.log");
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        {
            let log = TextLogger::new(&path).unwrap();
            log.connected(peer);
            log.uploaded(peer, "a.txt", 2);
        }
        {
            let log = TextLogger::new(&path).unwrap();
            log.disconnected(peer, 1);
        }
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("CONNECT peer=127.0.0.1:4000"));
        assert!(lines[1].contains("UPLOAD peer=127.0.0.1:4000 name=a.txt bytes=2"));
        assert!(lines[2].contains("DISCONNECT"));
    }
}
