// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Multicast listener lists.
//!
//! A [`ListenerList`] stores subscribers behind a copy-on-write vector. Dispatch
//! iterates over a snapshot taken when the notification starts, so a callback
//! may add or remove subscribers (including itself) without disturbing the
//! notification in progress. Changes become visible on the next dispatch.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

pub struct ListenerList<L: ?Sized> {
    inner: Mutex<Arc<Vec<Arc<L>>>>,
}

impl<L: ?Sized> Default for ListenerList<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> fmt::Debug for ListenerList<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerList")
            .field("len", &self.len())
            .finish()
    }
}

/// Listener identity is the allocation, not the value.
fn same_listener<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl<L: ?Sized> ListenerList<L> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Arc::new(Vec::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Arc<Vec<Arc<L>>>> {
        // Poisoning is ignored: every mutation replaces the vector atomically.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `listener`. Returns `false` if this exact handle is already registered.
    pub fn add(&self, listener: Arc<L>) -> bool {
        let mut guard = self.lock();
        if guard.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(listener);
        *guard = Arc::new(next);
        true
    }

    /// Removes `listener`. Returns `false` if it was not registered.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut guard = self.lock();
        if !guard.iter().any(|l| same_listener(l, listener)) {
            return false;
        }
        let next: Vec<Arc<L>> = guard
            .iter()
            .filter(|l| !same_listener(l, listener))
            .cloned()
            .collect();
        *guard = Arc::new(next);
        true
    }

    pub fn clear(&self) {
        *self.lock() = Arc::new(Vec::new());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Current subscribers. The returned list is immutable.
    pub fn snapshot(&self) -> Arc<Vec<Arc<L>>> {
        self.lock().clone()
    }

    /// Calls `f` for every subscriber registered when the call started.
    pub fn notify(&self, mut f: impl FnMut(&L)) {
        let listeners = self.snapshot();
        for listener in listeners.iter() {
            f(listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Counter: Send + Sync {
        fn hit(&self);
    }

    struct Hits(AtomicUsize);

    impl Counter for Hits {
        fn hit(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_add_is_idempotent_per_handle() {
        let list: ListenerList<dyn Counter> = ListenerList::new();
        let a: Arc<dyn Counter> = Arc::new(Hits(AtomicUsize::new(0)));
        let b: Arc<dyn Counter> = Arc::new(Hits(AtomicUsize::new(0)));

        assert!(list.add(a.clone()));
        assert!(!list.add(a.clone()));
        assert!(list.add(b.clone()));
        assert_eq!(list.len(), 2);

        assert!(list.remove(&a));
        assert!(!list.remove(&a));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_notify_reaches_every_listener_once() {
        let list: ListenerList<Hits> = ListenerList::new();
        let a = Arc::new(Hits(AtomicUsize::new(0)));
        let b = Arc::new(Hits(AtomicUsize::new(0)));
        list.add(a.clone());
        list.add(b.clone());

        list.notify(|l| l.hit());
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
    }

    struct SelfRemoving {
        list: Arc<ListenerList<dyn Fn() + Send + Sync>>,
        me: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
    }

    #[test]
    fn test_mutation_during_dispatch_uses_snapshot() {
        let list: Arc<ListenerList<dyn Fn() + Send + Sync>> = Arc::new(ListenerList::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let state = Arc::new(SelfRemoving {
            list: list.clone(),
            me: Mutex::new(None),
        });

        let cb_state = state.clone();
        let cb_calls = calls.clone();
        let listener: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            cb_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(me) = cb_state.me.lock().unwrap().take() {
                cb_state.list.remove(&me);
                let late_calls = cb_calls.clone();
                cb_state.list.add(Arc::new(move || {
                    late_calls.fetch_add(100, Ordering::SeqCst);
                }));
            }
        });
        *state.me.lock().unwrap() = Some(listener.clone());
        list.add(listener);

        list.notify(|l| l());
        // Removed itself and added a new listener; neither change affects this pass.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(list.len(), 1);

        list.notify(|l| l());
        assert_eq!(calls.load(Ordering::SeqCst), 101);
    }
}
