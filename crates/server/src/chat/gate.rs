//! Session admission gate.
//!
//! A process-wide counter capping concurrent live connections (default 1).
//! The counter is only ever touched through `try_acquire` and permit drop,
//! so concurrent opens and closes can never push it over the cap or leak a
//! slot on abnormal teardown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct ConnectionGate {
    cap: usize,
    active: AtomicUsize,
}

impl ConnectionGate {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            active: AtomicUsize::new(0),
        }
    }

    /// Non-authoritative check used to refuse upgrades early.
    pub fn is_full(&self) -> bool {
        self.active.load(Ordering::SeqCst) >= self.cap
    }

    /// Atomically claim a slot. Returns `None` when the gate is at capacity;
    /// the returned permit releases the slot exactly once on drop.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionPermit> {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < self.cap {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .ok()
            .map(|_| ConnectionPermit {
                gate: Arc::clone(self),
            })
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// RAII slot in the connection gate.
#[derive(Debug)]
pub struct ConnectionPermit {
    gate: Arc<ConnectionGate>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.gate.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_at_cap_one() {
        let gate = Arc::new(ConnectionGate::new(1));
        let permit = gate.try_acquire().expect("first connection admitted");
        assert!(gate.is_full());
        assert!(gate.try_acquire().is_none());

        drop(permit);
        assert_eq!(gate.active(), 0);
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn count_never_exceeds_cap_under_concurrent_acquires() {
        let gate = Arc::new(ConnectionGate::new(4));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let gate = Arc::clone(&gate);
            handles.push(std::thread::spawn(move || {
                let permit = gate.try_acquire();
                let seen = gate.active();
                assert!(seen <= 4, "observed {} active with cap 4", seen);
                drop(permit);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(gate.active(), 0);
    }

    #[test]
    fn permit_releases_exactly_once() {
        let gate = Arc::new(ConnectionGate::new(2));
        let a = gate.try_acquire().unwrap();
        let b = gate.try_acquire().unwrap();
        assert_eq!(gate.active(), 2);
        drop(a);
        assert_eq!(gate.active(), 1);
        drop(b);
        assert_eq!(gate.active(), 0);
    }
}
