//! Request coalescing for fetches.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::CacheError;
use crate::types::CacheName;

type ComputationResult = Result<(), CacheError>;

type ComputationChannel = Shared<oneshot::Receiver<ComputationResult>>;

type ComputationMap<K> = Arc<Mutex<BTreeMap<K, ComputationChannel>>>;

/// Deduplicates concurrent computations by key.
///
/// At most one computation per key is running at any time. Callers asking for a key that is
/// already being computed wait for the running computation instead of starting another one.
/// Computations are spawned onto the runtime, so they run to completion even if all callers
/// stop waiting for them, and their side effects are either applied fully or not at all.
pub struct Computations<K> {
    name: CacheName,
    current: ComputationMap<K>,
}

impl<K> fmt::Debug for Computations<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computations")
            .field("name", &self.name)
            .field("running", &self.current.lock().len())
            .finish()
    }
}

/// Forgets a computation once its task finishes, or is dropped with the runtime.
struct RemoveOnDrop<K: Ord> {
    current: ComputationMap<K>,
    key: K,
}

impl<K: Ord> Drop for RemoveOnDrop<K> {
    fn drop(&mut self) {
        self.current.lock().remove(&self.key);
    }
}

impl<K> Computations<K>
where
    K: Ord + Clone + fmt::Debug + Send + 'static,
{
    pub fn new(name: CacheName) -> Self {
        Self {
            name,
            current: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Joins the computation running for `key`, or spawns the one created by `computation`.
    ///
    /// NOTE: This function itself is *not* `async`, because it should eagerly spawn the
    /// computation, even if the returned future is never awaited.
    pub fn run<F, Fut>(&self, key: K, computation: F) -> BoxFuture<'static, ComputationResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ComputationResult> + Send + 'static,
    {
        let name = self.name;
        let channel = {
            let mut current = self.current.lock();
            match current.get(&key) {
                Some(channel) => {
                    tracing::trace!(cache = %name, ?key, "joining running fetch");
                    metric!(counter("caches.fetch.coalesced") += 1, "cache" => name.as_ref());
                    channel.clone()
                }
                None => {
                    let (sender, receiver) = oneshot::channel();
                    let done_token = RemoveOnDrop {
                        current: Arc::clone(&self.current),
                        key: key.clone(),
                    };

                    let computation = computation();
                    tokio::spawn(async move {
                        let result = computation.await;
                        // Evict from the map before publishing the result. Callers either get
                        // a channel that will still receive data, or they start a new computation.
                        drop(done_token);
                        sender.send(result).ok();
                    });

                    let channel = receiver.shared();
                    current.insert(key, channel.clone());
                    channel
                }
            }
        };

        channel
            .map(move |result| result.unwrap_or(Err(CacheError::Interrupted(name))))
            .boxed()
    }

    /// The number of currently running computations.
    pub fn running(&self) -> usize {
        self.current.lock().len()
    }

    /// Forgets all running computations.
    ///
    /// Computations that are already running still finish, but new callers will not join them.
    pub fn clear(&self) {
        self.current.lock().clear();
    }
}
