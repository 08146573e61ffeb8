//! Configuration the core itself needs. See spec.md §6's key table; the
//! wider server-level configuration surface (connection limits, keepalive)
//! lives in `txn-server` and is not read by the core.

/// Floor below which a requested per-session transaction timeout is
/// promoted to [`STABLE_TXN_TIMEOUT_SEC`] rather than honoured as given.
pub const MIN_TXN_TIMEOUT_SEC: u32 = 1;

/// Default / floor timeout used whenever a caller-supplied timeout is too
/// small to trust, and the default for replication follow-up expiry.
pub const STABLE_TXN_TIMEOUT_SEC: u32 = 30;

/// Selects whether a reply waits for replica acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicationMode {
    #[default]
    Async,
    Semisync,
}

/// The subset of server-wide configuration the core reads directly.
#[derive(Debug, Clone)]
pub struct TxnManagerConfig {
    pub replication_mode: ReplicationMode,
    /// Expiry, in seconds, for replication follow-up entries.
    pub replication_timeout_interval_sec: u32,
    /// Upper clamp on a per-session transaction timeout.
    pub transaction_timeout_limit_sec: u32,
    /// Number of partitions.
    pub partition_count: u32,
    /// Number of partition groups (owning worker threads).
    pub partition_group_count: u32,
}

impl Default for TxnManagerConfig {
    fn default() -> Self {
        Self {
            replication_mode: ReplicationMode::default(),
            replication_timeout_interval_sec: STABLE_TXN_TIMEOUT_SEC,
            transaction_timeout_limit_sec: STABLE_TXN_TIMEOUT_SEC,
            partition_count: 128,
            partition_group_count: 4,
        }
    }
}

impl TxnManagerConfig {
    /// Clamps a requested per-session transaction timeout per spec.md
    /// §4.2: values below [`MIN_TXN_TIMEOUT_SEC`] are promoted to
    /// [`STABLE_TXN_TIMEOUT_SEC`]; values above the configured ceiling are
    /// clamped down to it.
    #[must_use]
    pub fn clamp_txn_timeout(&self, requested_sec: u32) -> u32 {
        if requested_sec < MIN_TXN_TIMEOUT_SEC {
            STABLE_TXN_TIMEOUT_SEC
        } else {
            requested_sec.min(self.transaction_timeout_limit_sec)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_floor_promotes_to_stable() {
        let cfg = TxnManagerConfig::default();
        assert_eq!(cfg.clamp_txn_timeout(0), STABLE_TXN_TIMEOUT_SEC);
    }

    #[test]
    fn above_ceiling_clamps_down() {
        let cfg = TxnManagerConfig {
            transaction_timeout_limit_sec: 10,
            ..TxnManagerConfig::default()
        };
        assert_eq!(cfg.clamp_txn_timeout(100), 10);
    }

    #[test]
    fn within_range_is_unchanged() {
        let cfg = TxnManagerConfig::default();
        assert_eq!(cfg.clamp_txn_timeout(15), 15);
    }
}
