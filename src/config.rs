//! Server configuration.
//!
//! All tunables live here as named constants with CLI/env overrides, mirroring
//! the teacher's `Args` + `RelayConfig` split: `clap` parses the process
//! environment once at startup, then hands a plain `RelayConfig` value to the
//! rest of the system so the core never touches `std::env` directly.

use clap::Parser;

/// Default session TTL in milliseconds (5 hours).
pub const DEFAULT_SESSION_TTL_MS: i64 = 5 * 3600 * 1000;

/// Default per-file size cap (100 MiB).
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// Default global byte budget (2 GiB).
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Default per-session file count cap.
pub const DEFAULT_MAX_FILES_PER_SESSION: usize = 100;

/// Default per-session message count cap.
pub const DEFAULT_MAX_MESSAGES_PER_SESSION: usize = 500;

/// Default cleanup sweep interval (5 minutes).
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 5 * 60 * 1000;

/// Default client-side RPC ack deadline (30 s).
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 30_000;

/// Default cap on concurrently open chunked uploads per session.
pub const DEFAULT_MAX_CONCURRENT_UPLOADS_PER_SESSION: usize = 5;

/// Default stale-upload GC threshold (30 minutes).
pub const DEFAULT_STALE_UPLOAD_THRESHOLD_MS: i64 = 30 * 60 * 1000;

/// Default nominal chunk size clients are told to use (2 MiB). Informational
/// only — the server doesn't enforce per-chunk size, only chunk count/index.
pub const DEFAULT_UPLOAD_CHUNK_SIZE_BYTES: u64 = 2 * 1024 * 1024;

/// Fraction of `MAX_TOTAL_BYTES` at which the cleanup scheduler starts
/// evicting the oldest sessions.
pub const DEFAULT_CRITICAL_MEMORY_THRESHOLD: f64 = 0.95;

/// Fraction of `MAX_TOTAL_BYTES` at which the cleanup scheduler only warns.
pub const DEFAULT_WARNING_MEMORY_THRESHOLD: f64 = 0.80;

/// Number of sessions evicted per emergency pass.
pub const DEFAULT_EMERGENCY_EVICTION_BATCH: usize = 5;

/// How long a completed upload stays reachable to absorb duplicate
/// `file:upload-complete` retries before the assembler discards it.
pub const COMPLETED_UPLOAD_RETENTION_MS: i64 = 60_000;

// ── CLI Arguments ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "dropbag", version, about = "Ephemeral file and message exchange relay")]
pub struct Args {
    /// TCP port to listen on
    #[arg(long, default_value_t = 3000, env = "PORT")]
    pub port: u16,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// Session TTL in milliseconds
    #[arg(long, default_value_t = DEFAULT_SESSION_TTL_MS, env = "SESSION_TTL_MS")]
    pub session_ttl_ms: i64,

    /// Per-file size cap in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FILE_SIZE_BYTES, env = "MAX_FILE_SIZE_BYTES")]
    pub max_file_size_bytes: u64,

    /// Global byte budget across all sessions
    #[arg(long, default_value_t = DEFAULT_MAX_TOTAL_BYTES, env = "MAX_TOTAL_BYTES")]
    pub max_total_bytes: u64,

    /// Per-session file count cap
    #[arg(long, default_value_t = DEFAULT_MAX_FILES_PER_SESSION, env = "MAX_FILES_PER_SESSION")]
    pub max_files_per_session: usize,

    /// Per-session message count cap
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGES_PER_SESSION, env = "MAX_MESSAGES_PER_SESSION")]
    pub max_messages_per_session: usize,

    /// Cleanup sweep period in milliseconds
    #[arg(long, default_value_t = DEFAULT_CLEANUP_INTERVAL_MS, env = "CLEANUP_INTERVAL_MS")]
    pub cleanup_interval_ms: u64,

    /// Client-side RPC ack deadline in milliseconds
    #[arg(long, default_value_t = DEFAULT_RPC_TIMEOUT_MS, env = "RPC_TIMEOUT_MS")]
    pub rpc_timeout_ms: u64,

    /// Max concurrently open chunked uploads per session
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_UPLOADS_PER_SESSION, env = "MAX_CONCURRENT_UPLOADS_PER_SESSION")]
    pub max_concurrent_uploads_per_session: usize,

    /// Stale-upload GC threshold in milliseconds
    #[arg(long, default_value_t = DEFAULT_STALE_UPLOAD_THRESHOLD_MS, env = "STALE_UPLOAD_THRESHOLD_MS")]
    pub stale_upload_threshold_ms: i64,

    /// Nominal chunk size clients are told to use, in bytes
    #[arg(long, default_value_t = DEFAULT_UPLOAD_CHUNK_SIZE_BYTES, env = "UPLOAD_CHUNK_SIZE_BYTES")]
    pub upload_chunk_size_bytes: u64,

    /// Fraction of the global byte budget that triggers emergency eviction
    #[arg(long, default_value_t = DEFAULT_CRITICAL_MEMORY_THRESHOLD, env = "CRITICAL_MEMORY_THRESHOLD")]
    pub critical_memory_threshold: f64,

    /// Fraction of the global byte budget that triggers a warning log
    #[arg(long, default_value_t = DEFAULT_WARNING_MEMORY_THRESHOLD, env = "WARNING_MEMORY_THRESHOLD")]
    pub warning_memory_threshold: f64,

    /// Number of sessions evicted per emergency eviction pass
    #[arg(long, default_value_t = DEFAULT_EMERGENCY_EVICTION_BATCH, env = "EMERGENCY_EVICTION_BATCH")]
    pub emergency_eviction_batch: usize,
}

/// Server configuration, derived once from `Args` at startup and shared by
/// reference (via `RelayState`) for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub host: String,
    pub session_ttl_ms: i64,
    pub max_file_size_bytes: u64,
    pub max_total_bytes: u64,
    pub max_files_per_session: usize,
    pub max_messages_per_session: usize,
    pub cleanup_interval_ms: u64,
    pub rpc_timeout_ms: u64,
    pub max_concurrent_uploads_per_session: usize,
    pub stale_upload_threshold_ms: i64,
    pub upload_chunk_size_bytes: u64,
    pub critical_memory_threshold: f64,
    pub warning_memory_threshold: f64,
    pub emergency_eviction_batch: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
            session_ttl_ms: DEFAULT_SESSION_TTL_MS,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
            max_files_per_session: DEFAULT_MAX_FILES_PER_SESSION,
            max_messages_per_session: DEFAULT_MAX_MESSAGES_PER_SESSION,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            max_concurrent_uploads_per_session: DEFAULT_MAX_CONCURRENT_UPLOADS_PER_SESSION,
            stale_upload_threshold_ms: DEFAULT_STALE_UPLOAD_THRESHOLD_MS,
            upload_chunk_size_bytes: DEFAULT_UPLOAD_CHUNK_SIZE_BYTES,
            critical_memory_threshold: DEFAULT_CRITICAL_MEMORY_THRESHOLD,
            warning_memory_threshold: DEFAULT_WARNING_MEMORY_THRESHOLD,
            emergency_eviction_batch: DEFAULT_EMERGENCY_EVICTION_BATCH,
        }
    }
}

impl From<Args> for RelayConfig {
    fn from(args: Args) -> Self {
        Self {
            port: args.port,
            host: args.host,
            session_ttl_ms: args.session_ttl_ms,
            max_file_size_bytes: args.max_file_size_bytes,
            max_total_bytes: args.max_total_bytes,
            max_files_per_session: args.max_files_per_session,
            max_messages_per_session: args.max_messages_per_session,
            cleanup_interval_ms: args.cleanup_interval_ms,
            rpc_timeout_ms: args.rpc_timeout_ms,
            max_concurrent_uploads_per_session: args.max_concurrent_uploads_per_session,
            stale_upload_threshold_ms: args.stale_upload_threshold_ms,
            upload_chunk_size_bytes: args.upload_chunk_size_bytes,
            critical_memory_threshold: args.critical_memory_threshold,
            warning_memory_threshold: args.warning_memory_threshold,
            emergency_eviction_batch: args.emergency_eviction_batch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.session_ttl_ms, 5 * 3600 * 1000);
        assert_eq!(config.max_total_bytes, 2 * 1024 * 1024 * 1024);
        assert_eq!(config.max_files_per_session, 100);
        assert_eq!(config.max_messages_per_session, 500);
    }
}
