//! Per-queue lock pairs for the data path.
//!
//! Uses DashMap so that looking up one queue's locks never serialises with
//! unrelated queues; the map's shard locks are released before the returned
//! per-queue lock is taken.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};

/// The data-path locks owned by one queue id.
///
/// Producers (enqueue, enqueue-data) serialise on `producer`, consumers
/// (dequeue, dequeue-data) on `consumer`. A single non-blocking buffer attempt
/// additionally holds `transfer`, so one enqueue and one dequeue never reach
/// the transport together. The payload calls block inside the transport and
/// hold only their own role lock, never `transfer`, so the opposite side can
/// always make progress while they wait.
#[derive(Debug, Default)]
pub struct QueueLocks {
    producer: Mutex<()>,
    consumer: Mutex<()>,
    transfer: Mutex<()>,
}

type AttemptGuard<'a> = (MutexGuard<'a, ()>, MutexGuard<'a, ()>);

impl QueueLocks {
    pub fn producer(&self) -> &Mutex<()> {
        &self.producer
    }

    pub fn consumer(&self) -> &Mutex<()> {
        &self.consumer
    }

    pub fn transfer(&self) -> &Mutex<()> {
        &self.transfer
    }

    /// One enqueue attempt: the producer lock, then `transfer`.
    pub fn produce_attempt(&self) -> AttemptGuard<'_> {
        let role = self.producer.lock();
        let transfer = self.transfer.lock();
        (role, transfer)
    }

    /// One dequeue attempt: the consumer lock, then `transfer`.
    pub fn consume_attempt(&self) -> AttemptGuard<'_> {
        let role = self.consumer.lock();
        let transfer = self.transfer.lock();
        (role, transfer)
    }
}

#[derive(Debug, Default)]
pub struct QueueLockRegistry {
    locks: DashMap<u32, Arc<QueueLocks>>,
}

impl QueueLockRegistry {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Returns the lock pair for `qid`, creating it on first touch.
    pub fn get_or_create(&self, qid: u32) -> Arc<QueueLocks> {
        if let Some(existing) = self.locks.get(&qid) {
            return Arc::clone(&*existing);
        }
        let entry = self.locks.entry(qid).or_default();
        Arc::clone(&*entry)
    }

    /// Drops the registry's reference; in-flight holders keep their `Arc`.
    pub fn remove(&self, qid: u32) {
        self.locks.remove(&qid);
    }

    pub fn contains(&self, qid: u32) -> bool {
        self.locks.contains_key(&qid)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_qid_shares_one_pair() {
        let registry = QueueLockRegistry::new();
        let a = registry.get_or_create(3);
        let b = registry.get_or_create(3);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn removal_keeps_in_flight_pair_alive() {
        let registry = QueueLockRegistry::new();
        let held = registry.get_or_create(1);
        let _guard = held.producer().lock();
        registry.remove(1);
        assert!(!registry.contains(1));
        let fresh = registry.get_or_create(1);
        assert!(!Arc::ptr_eq(&held, &fresh));
        assert!(fresh.producer().try_lock().is_some());
    }

    #[test]
    fn producer_and_consumer_are_independent() {
        let registry = QueueLockRegistry::new();
        let pair = registry.get_or_create(2);
        let _p = pair.producer().lock();
        assert!(pair.consumer().try_lock().is_some());
        assert!(pair.producer().try_lock().is_none());
    }

    #[test]
    fn attempts_share_transfer_but_not_roles() {
        let registry = QueueLockRegistry::new();
        let pair = registry.get_or_create(4);
        {
            let _attempt = pair.produce_attempt();
            assert!(pair.producer().try_lock().is_none());
            assert!(pair.transfer().try_lock().is_none());
            assert!(pair.consumer().try_lock().is_some());
        }
        let _payload = pair.producer().lock();
        let _attempt = pair.consume_attempt();
        assert!(pair.transfer().try_lock().is_none());
    }
}
