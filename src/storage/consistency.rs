//! Write-consistency enforcement.
//!
//! Partition selection for a record plus post-append verification of the
//! replica view against the configured acknowledgement level and
//! replication strategy.

use crate::error::{BusError, Result};
use crate::storage::substrate::{AckLevel, AppendReceipt};
use crate::storage::ReplicationStrategy;
use sha2::{Digest, Sha256};

/// Verifies append receipts and selects partitions.
pub struct ConsistencyManager {
    acks: AckLevel,
    strategy: ReplicationStrategy,
    min_in_sync_replicas: u32,
}

impl ConsistencyManager {
    pub fn new(acks: AckLevel, strategy: ReplicationStrategy, min_in_sync_replicas: u32) -> Self {
        Self {
            acks,
            strategy,
            min_in_sync_replicas,
        }
    }

    pub fn acks(&self) -> AckLevel {
        self.acks
    }

    /// Partition for a record: an explicit pin wins, otherwise the message
    /// id hashes over the live partitions.
    pub fn select_partition(&self, message_id: &str, explicit: Option<u32>, partitions: u32) -> u32 {
        let partitions = partitions.max(1);
        match explicit {
            Some(p) => p % partitions,
            None => {
                let digest = Sha256::digest(message_id.as_bytes());
                let mut prefix = [0u8; 8];
                prefix.copy_from_slice(&digest[..8]);
                (u64::from_be_bytes(prefix) % partitions as u64) as u32
            }
        }
    }

    /// Verify the replica view observed at append time.
    ///
    /// `acks=all` requires the ISR to still cover `min.insync.replicas`;
    /// QUORUM additionally requires a replica majority, SYNC requires the
    /// full replica set in sync, ASYNC skips verification.
    pub fn verify(&self, receipt: &AppendReceipt, replication_factor: u32) -> Result<()> {
        if self.acks == AckLevel::All && receipt.isr_count < self.min_in_sync_replicas {
            return Err(BusError::Consistency(format!(
                "isr count {} below min.insync.replicas {}",
                receipt.isr_count, self.min_in_sync_replicas
            )));
        }

        match self.strategy {
            ReplicationStrategy::Quorum => {
                if receipt.isr_count * 2 <= replication_factor {
                    return Err(BusError::Consistency(format!(
                        "isr count {} is not a majority of replication factor {}",
                        receipt.isr_count, replication_factor
                    )));
                }
            }
            ReplicationStrategy::Sync => {
                if receipt.isr_count < receipt.replica_count {
                    return Err(BusError::Consistency(format!(
                        "{} of {} replicas in sync",
                        receipt.isr_count, receipt.replica_count
                    )));
                }
            }
            ReplicationStrategy::Async => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(isr: u32, replicas: u32) -> AppendReceipt {
        AppendReceipt {
            partition: 0,
            offset: 0,
            isr_count: isr,
            replica_count: replicas,
        }
    }

    #[test]
    fn test_partition_selection_is_stable_and_bounded() {
        let manager =
            ConsistencyManager::new(AckLevel::All, ReplicationStrategy::Quorum, 1);
        let first = manager.select_partition("msg-1", None, 8);
        for _ in 0..10 {
            assert_eq!(manager.select_partition("msg-1", None, 8), first);
        }
        assert!(first < 8);
        assert_eq!(manager.select_partition("msg-1", Some(11), 8), 3);
    }

    #[test]
    fn test_acks_all_requires_min_isr() {
        let manager = ConsistencyManager::new(AckLevel::All, ReplicationStrategy::Async, 2);
        assert!(manager.verify(&receipt(2, 3), 3).is_ok());
        let err = manager.verify(&receipt(1, 3), 3).unwrap_err();
        assert!(matches!(err, BusError::Consistency(_)));
    }

    #[test]
    fn test_acks_leader_skips_isr_floor() {
        let manager = ConsistencyManager::new(AckLevel::Leader, ReplicationStrategy::Async, 2);
        assert!(manager.verify(&receipt(1, 3), 3).is_ok());
    }

    #[test]
    fn test_quorum_requires_majority() {
        let manager = ConsistencyManager::new(AckLevel::Leader, ReplicationStrategy::Quorum, 1);
        assert!(manager.verify(&receipt(2, 3), 3).is_ok());
        assert!(manager.verify(&receipt(1, 3), 3).is_err());
        // Even split is not a majority.
        assert!(manager.verify(&receipt(2, 4), 4).is_err());
    }

    #[test]
    fn test_sync_requires_full_replica_set() {
        let manager = ConsistencyManager::new(AckLevel::Leader, ReplicationStrategy::Sync, 1);
        assert!(manager.verify(&receipt(3, 3), 3).is_ok());
        assert!(manager.verify(&receipt(2, 3), 3).is_err());
    }

    #[test]
    fn test_async_skips_verification() {
        let manager = ConsistencyManager::new(AckLevel::None, ReplicationStrategy::Async, 5);
        assert!(manager.verify(&receipt(0, 3), 3).is_ok());
    }
}
