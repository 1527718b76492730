//! Per-tile-path advisory locks.
//!
//! A path with an entry in the table is locked; the entry's queue holds the
//! waiters in arrival order, so hand-off is FIFO fair. Only the cache itself
//! takes these locks, always around mutation of a tile's output buffer.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::path::TilePath;

#[derive(Default)]
pub struct TileLockTable {
    table: Mutex<HashMap<TilePath, VecDeque<oneshot::Sender<()>>>>,
}

impl TileLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `path`, waiting FIFO behind current holders.
    /// The returned guard releases on drop.
    pub async fn lock(&self, path: &TilePath) -> TileLockGuard<'_> {
        let waiter = {
            let mut table = self.table.lock().expect("tile lock table poisoned");
            match table.get_mut(path) {
                None => {
                    table.insert(path.clone(), VecDeque::new());
                    None
                }
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push_back(tx);
                    Some(rx)
                }
            }
        };
        if let Some(rx) = waiter {
            // The holder signals exactly one waiter on unlock; a closed
            // channel only happens if the table entry was torn down, which
            // also means the lock is free.
            let _ = rx.await;
        }
        TileLockGuard { table: self, path: path.clone() }
    }

    /// Whether `path` currently has a holder. Test and introspection aid.
    pub fn is_locked(&self, path: &TilePath) -> bool {
        self.table
            .lock()
            .expect("tile lock table poisoned")
            .contains_key(path)
    }

    fn unlock(&self, path: &TilePath) {
        let mut table = self.table.lock().expect("tile lock table poisoned");
        let Some(waiters) = table.get_mut(path) else {
            return;
        };
        // Hand off to the first waiter still listening.
        while let Some(tx) = waiters.pop_front() {
            if tx.send(()).is_ok() {
                return;
            }
        }
        table.remove(path);
    }
}

/// Holds the advisory lock for one tile path; dropping releases it.
pub struct TileLockGuard<'a> {
    table: &'a TileLockTable,
    path: TilePath,
}

impl Drop for TileLockGuard<'_> {
    fn drop(&mut self) {
        self.table.unlock(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn free_path_locks_immediately() {
        let table = TileLockTable::new();
        let path = TilePath::parse("R1").unwrap();
        assert!(!table.is_locked(&path));
        let guard = table.lock(&path).await;
        assert!(table.is_locked(&path));
        drop(guard);
        assert!(!table.is_locked(&path));
    }

    #[tokio::test]
    async fn waiters_wake_in_fifo_order() {
        let table = Arc::new(TileLockTable::new());
        let path = TilePath::parse("R").unwrap();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let guard = table.lock(&path).await;
        let mut tasks = Vec::new();
        for i in 0..3 {
            let table = table.clone();
            let path = path.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = table.lock(&path).await;
                order.lock().unwrap().push(i);
            }));
            // Ensure each waiter registers before the next.
            tokio::task::yield_now().await;
        }

        drop(guard);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn independent_paths_do_not_contend() {
        let table = TileLockTable::new();
        let a = TilePath::parse("R0").unwrap();
        let b = TilePath::parse("R1").unwrap();
        let _ga = table.lock(&a).await;
        // Completes without waiting on `a`'s holder.
        let _gb = table.lock(&b).await;
        assert!(table.is_locked(&a));
        assert!(table.is_locked(&b));
    }
}
