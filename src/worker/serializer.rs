//! Per-user mutual exclusion for signing jobs.
//!
//! Each key owns a promise chain: admitting a task swaps in a fresh completion
//! signal and hands the previous one to the new task, which waits on it before
//! running. Admission is synchronous, so the order of `admit` calls is the
//! execution order. The completion signal fires when the task's guard drops,
//! which also covers panics and cancelled tasks. A key's entry disappears once
//! its last admitted task finishes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct Slot {
    /// Completion signal of the most recently admitted task.
    tail: Option<oneshot::Receiver<()>>,
    /// Admitted tasks that have not finished yet.
    pending: usize,
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

#[derive(Debug, Clone, Default)]
pub struct UserSerializer {
    slots: Slots,
}

impl UserSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a place in line for `key`. The returned turn must be awaited with
    /// [`Turn::ready`] before doing the exclusive work.
    pub fn admit(&self, key: &str) -> Turn {
        let (done_tx, done_rx) = oneshot::channel();
        let predecessor = {
            let mut slots = lock(&self.slots);
            let slot = slots.entry(key.to_string()).or_default();
            slot.pending += 1;
            slot.tail.replace(done_rx)
        };

        Turn {
            guard: TurnGuard {
                key: key.to_string(),
                slots: self.slots.clone(),
                predecessor,
                done: Some(done_tx),
            },
        }
    }

    /// Run `task` after every earlier task for `key` has finished.
    pub async fn run_exclusive<F, T>(&self, key: &str, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.admit(key).ready().await;
        task.await
    }

    /// Number of keys with admitted, unfinished work.
    pub fn active_keys(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn pending(&self, key: &str) -> usize {
        lock(&self.slots).get(key).map_or(0, |s| s.pending)
    }
}

/// A place in a key's line.
#[derive(Debug)]
pub struct Turn {
    guard: TurnGuard,
}

impl Turn {
    /// Wait until the previous task for this key has finished.
    pub async fn ready(mut self) -> TurnGuard {
        if let Some(predecessor) = self.guard.predecessor.as_mut() {
            // A dropped sender means the predecessor is gone; either way it
            // no longer holds the key.
            let _ = predecessor.await;
        }
        self.guard.predecessor = None;
        self.guard
    }
}

/// Holds the key until dropped.
///
/// A guard dropped before its turn arrived (the task was cancelled while
/// waiting) still holds its successors back until its own predecessor is done.
#[derive(Debug)]
pub struct TurnGuard {
    key: String,
    slots: Slots,
    predecessor: Option<oneshot::Receiver<()>>,
    done: Option<oneshot::Sender<()>>,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        {
            let mut slots = lock(&self.slots);
            if let Some(slot) = slots.get_mut(&self.key) {
                slot.pending = slot.pending.saturating_sub(1);
                if slot.pending == 0 {
                    slots.remove(&self.key);
                }
            }
        }

        if let (Some(predecessor), Some(done)) = (self.predecessor.take(), self.done.take()) {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let _ = predecessor.await;
                    drop(done);
                });
            }
        }
    }
}

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<String, Slot>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
