use crate::error::Error;

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, Error>>>;

struct Entry<T>
where
    T: Clone,
{
    id: u64,
    future: SharedResult<T>,
    waiters: usize,
}

/// Collapses concurrent requests for the same key into one execution whose
/// result every caller receives.
///
/// The first caller's future is shared with everyone who asks for the same
/// key until it completes. A later call after completion starts afresh, and
/// so does a call after every caller of an unfinished execution gave up.
pub(crate) struct InFlight<K, T>
where
    T: Clone,
{
    pending: Mutex<HashMap<K, Entry<T>>>,
    next_id: Mutex<u64>,
}

/// One caller's interest in an entry. The entry goes away when its
/// execution finishes or when its last caller is dropped.
struct Waiter<'a, K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    pending: &'a Mutex<HashMap<K, Entry<T>>>,
    key: K,
    id: u64,
    finished: bool,
}

impl<K, T> Drop for Waiter<'_, K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    fn drop(&mut self) {
        let mut pending = self.pending.lock();

        let Some(entry) = pending.get_mut(&self.key) else {
            return;
        };

        if entry.id != self.id {
            return;
        }

        entry.waiters -= 1;

        if self.finished || entry.waiters == 0 {
            pending.remove(&self.key);
        }
    }
}

impl<K, T> InFlight<K, T>
where
    K: Clone + Eq + Hash,
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
        }
    }

    /// Joins the in-flight execution for `key`, or starts one with `start`.
    pub(crate) async fn run<S, Fut>(&self, key: K, start: S) -> Result<T, Error>
    where
        S: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let (id, future) = {
            let mut pending = self.pending.lock();

            if let Some(entry) = pending.get_mut(&key) {
                entry.waiters += 1;
                (entry.id, entry.future.clone())
            } else {
                let id = {
                    let mut next_id = self.next_id.lock();
                    *next_id += 1;
                    *next_id
                };
                let future = start().boxed().shared();
                pending.insert(
                    key.clone(),
                    Entry {
                        id,
                        future: future.clone(),
                        waiters: 1,
                    },
                );
                (id, future)
            }
        };

        let mut waiter = Waiter {
            pending: &self.pending,
            key,
            id,
            finished: false,
        };

        let result = future.await;
        waiter.finished = true;

        result
    }

    #[cfg(test)]
    /// Whether an execution for `key` is currently running.
    pub(crate) fn is_pending(&self, key: &K) -> bool {
        self.pending.lock().contains_key(key)
    }
}
