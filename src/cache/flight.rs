//! Single-Flight Registry
//!
//! Collapses concurrent origin fetches for one key into a single detached
//! task whose outcome is shared with every waiter.
//!
//! A flight is registered under its key while the task runs and removed by
//! the task itself once it has published its result to the fast tier. A
//! caller that finds no flight re-checks the fast tier while it still holds
//! the registry slot, so a caller racing with a flight that just finished
//! sees the cached payload instead of starting a second fetch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::JoinHandle;

use super::entry::LookupKey;
use crate::error::FetchError;

/// Outcome of one origin fetch
pub type FlightResult = std::result::Result<Bytes, FetchError>;

/// Handle every waiter of a flight polls
pub type SharedFetch = Shared<BoxFuture<'static, FlightResult>>;

struct Flight {
    id: u64,
    fetch: SharedFetch,
}

/// How a caller was admitted to the origin stage
pub enum Admission {
    /// The fast tier was populated while the caller was on its way
    Cached(Bytes),
    /// Another caller's fetch is already running
    Joined(SharedFetch),
    /// This caller started the fetch
    Led(SharedFetch),
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Admission::Cached(payload) => f.debug_tuple("Cached").field(payload).finish(),
            Admission::Joined(_) => f.debug_tuple("Joined").finish_non_exhaustive(),
            Admission::Led(_) => f.debug_tuple("Led").finish_non_exhaustive(),
        }
    }
}

/// Registry of in-flight origin fetches
#[derive(Default)]
pub struct FlightRegistry {
    flights: DashMap<LookupKey, Flight>,
    next_id: AtomicU64,
}

impl FlightRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, or start one.
    ///
    /// `recheck` runs while the slot for `key` is held and no flight exists;
    /// if it finds a payload no flight is started. Otherwise `start` spawns
    /// the fetch task, receiving the flight id the task must later pass to
    /// [`FlightRegistry::complete`].
    pub fn admit<C, S>(&self, key: &LookupKey, recheck: C, start: S) -> Admission
    where
        C: FnOnce() -> Option<Bytes>,
        S: FnOnce(u64) -> JoinHandle<FlightResult>,
    {
        match self.flights.entry(key.clone()) {
            Entry::Occupied(flight) => Admission::Joined(flight.get().fetch.clone()),
            Entry::Vacant(slot) => {
                if let Some(payload) = recheck() {
                    return Admission::Cached(payload);
                }

                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let handle = start(id);
                let key = key.to_string();
                let fetch = async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(FetchError::Aborted {
                            key,
                            reason: e.to_string(),
                        }),
                    }
                }
                .boxed()
                .shared();

                slot.insert(Flight {
                    id,
                    fetch: fetch.clone(),
                });
                Admission::Led(fetch)
            }
        }
    }

    /// Remove the flight `id` for `key`; a newer flight is left alone
    pub fn complete(&self, key: &LookupKey, id: u64) {
        self.flights.remove_if(key, |_, flight| flight.id == id);
    }

    /// Whether a fetch for `key` is running
    #[cfg(test)]
    pub fn is_in_flight(&self, key: &LookupKey) -> bool {
        self.flights.contains_key(key)
    }

    /// Number of running fetches
    pub fn len(&self) -> usize {
        self.flights.len()
    }

    /// Check if nothing is in flight
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}

/// Removes a flight from its registry when the fetch task ends, including
/// by panic
pub struct FlightGuard {
    registry: Arc<FlightRegistry>,
    key: LookupKey,
    id: u64,
}

impl FlightGuard {
    pub fn new(registry: Arc<FlightRegistry>, key: LookupKey, id: u64) -> Self {
        Self { registry, key, id }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.registry.complete(&self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn key(s: &str) -> LookupKey {
        LookupKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_second_caller_joins() {
        let registry = Arc::new(FlightRegistry::new());
        let k = key("k");

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let reg = registry.clone();
        let k2 = k.clone();
        let leader = registry.admit(&k, || None, move |id| {
            tokio::spawn(async move {
                let _guard = FlightGuard::new(reg, k2, id);
                let _ = rx.await;
                Ok(Bytes::from_static(b"payload"))
            })
        });
        assert_matches!(leader, Admission::Led(_));
        assert!(registry.is_in_flight(&k));

        let follower = registry.admit(&k, || panic!("no recheck while in flight"), |_| {
            panic!("must not start a second flight")
        });
        let Admission::Joined(joined) = follower else {
            panic!("expected to join");
        };

        tx.send(()).unwrap();
        assert_eq!(joined.await.unwrap().as_ref(), b"payload");
        if let Admission::Led(fetch) = leader {
            assert_eq!(fetch.await.unwrap().as_ref(), b"payload");
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_recheck_short_circuits() {
        let registry = FlightRegistry::new();
        let admission = registry.admit(
            &key("k"),
            || Some(Bytes::from_static(b"cached")),
            |_| panic!("must not start a flight"),
        );
        assert_matches!(admission, Admission::Cached(p) if p.as_ref() == b"cached");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_flight_is_aborted_and_removed() {
        let registry = Arc::new(FlightRegistry::new());
        let k = key("boom");

        let reg = registry.clone();
        let k2 = k.clone();
        let admission = registry.admit(&k, || None, move |id| {
            tokio::spawn(async move {
                let _guard = FlightGuard::new(reg, k2, id);
                tokio::time::sleep(Duration::from_millis(5)).await;
                panic!("fetch task panicked");
            })
        });
        let Admission::Led(fetch) = admission else {
            panic!("expected to lead");
        };

        assert_matches!(fetch.await, Err(FetchError::Aborted { .. }));
        assert!(!registry.is_in_flight(&k));
    }

    #[test]
    fn test_stale_complete_keeps_newer_flight() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let registry = FlightRegistry::new();
            let k = key("k");
            let admission = registry.admit(&k, || None, |_| {
                tokio::spawn(async { Ok(Bytes::from_static(b"x")) })
            });
            assert_matches!(admission, Admission::Led(_));

            // An id from an earlier flight must not evict the current one
            registry.complete(&k, u64::MAX);
            assert!(registry.is_in_flight(&k));
            registry.complete(&k, 0);
            assert!(!registry.is_in_flight(&k));
        });
    }
}
