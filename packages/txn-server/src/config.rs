//! Server-wide configuration. See spec.md §6's key table; the subset the
//! core itself needs is split out into `TxnManagerConfig` and handed to
//! `TransactionManager::new` so the core stays free of connection-layer
//! concerns, mirroring the teacher's `ServerConfig`/`NetworkConfig` split.

use std::time::Duration;

use txn_core::{ReplicationMode, TxnManagerConfig};

/// TCP keepalive parameters. Advisory only: the core never reads these.
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    pub enabled: bool,
    pub idle: Duration,
    pub interval: Duration,
    pub retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle: Duration::from_secs(60),
            interval: Duration::from_secs(10),
            retries: 3,
        }
    }
}

/// Server-level configuration for the transaction session manager.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub node_id: String,
    pub replication_mode: ReplicationMode,
    pub replication_timeout_interval_sec: u32,
    pub transaction_timeout_limit_sec: u32,
    /// Maximum number of concurrent client connections.
    pub connection_limit: u32,
    pub partition_count: u32,
    pub partition_group_count: u32,
    /// Interval between background timeout-scan sweeps, in milliseconds.
    pub gc_interval_ms: u64,
    pub keepalive: KeepaliveConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = TxnManagerConfig::default();
        Self {
            node_id: String::new(),
            replication_mode: core.replication_mode,
            replication_timeout_interval_sec: core.replication_timeout_interval_sec,
            transaction_timeout_limit_sec: core.transaction_timeout_limit_sec,
            connection_limit: 10_000,
            partition_count: core.partition_count,
            partition_group_count: core.partition_group_count,
            gc_interval_ms: 1_000,
            keepalive: KeepaliveConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Derives the subset of configuration `txn-core` itself needs,
    /// keeping the core crate free of the server's wider configuration
    /// surface (connection limits, keepalive).
    #[must_use]
    pub fn core_config(&self) -> TxnManagerConfig {
        TxnManagerConfig {
            replication_mode: self.replication_mode,
            replication_timeout_interval_sec: self.replication_timeout_interval_sec,
            transaction_timeout_limit_sec: self.transaction_timeout_limit_sec,
            partition_count: self.partition_count,
            partition_group_count: self.partition_group_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.partition_count, 128);
        assert_eq!(config.partition_group_count, 4);
        assert_eq!(config.connection_limit, 10_000);
    }

    #[test]
    fn core_config_derives_four_fields() {
        let config = ServerConfig {
            partition_count: 16,
            partition_group_count: 2,
            ..ServerConfig::default()
        };
        let core = config.core_config();
        assert_eq!(core.partition_count, 16);
        assert_eq!(core.partition_group_count, 2);
    }

    #[test]
    fn keepalive_config_defaults() {
        let ka = KeepaliveConfig::default();
        assert!(ka.enabled);
        assert_eq!(ka.retries, 3);
    }
}
