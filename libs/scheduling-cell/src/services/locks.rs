// libs/scheduling-cell/src/services/locks.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use chrono::NaiveDate;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

type LockKey = (Uuid, NaiveDate);

/// Serializes check-then-write sequences per (doctor, calendar day).
///
/// Entries are weak so a day nobody is booking holds no memory; dead entries
/// are swept whenever a new lock is created.
#[derive(Default)]
pub struct SlotLockRegistry {
    locks: Mutex<HashMap<LockKey, Weak<AsyncMutex<()>>>>,
}

impl SlotLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: LockKey) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(existing) = locks.get(&key).and_then(Weak::upgrade) {
            return existing;
        }

        locks.retain(|_, weak| weak.strong_count() > 0);
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(key, Arc::downgrade(&lock));
        lock
    }

    pub async fn acquire(&self, doctor_id: Uuid, date: NaiveDate) -> OwnedMutexGuard<()> {
        self.handle((doctor_id, date)).lock_owned().await
    }

    /// Locks two days in a fixed order so concurrent moves in opposite
    /// directions cannot deadlock. A single guard is returned for one day.
    pub async fn acquire_pair(
        &self,
        doctor_id: Uuid,
        first: NaiveDate,
        second: NaiveDate,
    ) -> Vec<OwnedMutexGuard<()>> {
        if first == second {
            return vec![self.acquire(doctor_id, first).await];
        }
        let (low, high) = if first < second { (first, second) } else { (second, first) };
        let low_guard = self.acquire(doctor_id, low).await;
        let high_guard = self.acquire(doctor_id, high).await;
        vec![low_guard, high_guard]
    }

    pub fn tracked_keys(&self) -> usize {
        match self.locks.lock() {
            Ok(guard) => guard.values().filter(|weak| weak.strong_count() > 0).count(),
            Err(poisoned) => poisoned.into_inner().values().filter(|weak| weak.strong_count() > 0).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_day_is_exclusive() {
        let registry = Arc::new(SlotLockRegistry::new());
        let doctor_id = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();

        let guard = registry.acquire(doctor_id, date).await;

        let contender = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let _guard = registry.acquire(doctor_id, date).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_days_do_not_block() {
        let registry = SlotLockRegistry::new();
        let doctor_id = Uuid::new_v4();
        let monday = NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2030, 1, 8).unwrap();

        let _a = registry.acquire(doctor_id, monday).await;
        let _b = registry.acquire(doctor_id, tuesday).await;
        assert_eq!(registry.tracked_keys(), 2);
    }

    #[tokio::test]
    async fn released_locks_are_not_retained() {
        let registry = SlotLockRegistry::new();
        let doctor_id = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();

        drop(registry.acquire_pair(doctor_id, date, date.succ_opt().unwrap()).await);
        assert_eq!(registry.tracked_keys(), 0);
    }
}
