//! Shared protocol constants for the filexfer framed transport

// Protocol header constants
pub const MAGIC: &[u8; 4] = b"FXFR";
pub const VERSION: u16 = 1;

// Header layout: MAGIC (4) | VERSION (2) | KIND (1) | LENGTH (4)
pub const HEADER_LEN: usize = 11;

// Default maximum frame payload size (64MB). Servers advertise the value they
// enforce in `server_info.max_frame_size`.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

pub const DEFAULT_PORT: u16 = 5000;

// Frame kinds
pub mod frame {
    pub const REQUEST: u8 = 1;
    pub const RESPONSE: u8 = 2;
}

// Request type discriminators as they appear in the `type` field
pub mod ops {
    pub const LIST_FILES: &str = "list_files";
    pub const DOWNLOAD_FILE: &str = "download_file";
    pub const UPLOAD_FILE: &str = "upload_file";
    pub const SERVER_INFO: &str = "server_info";

    pub const SUPPORTED: [&str; 4] = [LIST_FILES, DOWNLOAD_FILE, UPLOAD_FILE, SERVER_INFO];
}

// Centralized timeout constants
pub mod timeouts {
    // Client connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5000;
    // How long a handler keeps reading a partial request after shutdown (ms)
    pub const SHUTDOWN_DRAIN_MS: u64 = 10_000;
}

/// Upper bound on the base64 length of `len` raw bytes.
pub fn encoded_len(len: usize) -> usize {
    len.div_ceil(3).saturating_mul(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_len() {
        assert_eq!(encoded_len(0), 0);
        assert_eq!(encoded_len(1), 4);
        assert_eq!(encoded_len(3), 4);
        assert_eq!(encoded_len(4), 8);
    }

    #[test]
    fn test_supported_ops_are_distinct() {
        let mut ops = ops::SUPPORTED.to_vec();
        ops.sort();
        ops.dedup();
        assert_eq!(ops.len(), 4);
    }
}
