//! Copy-on-write listener multicast.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::warn;

/// Token returned by [`ListenerHub::add`], used to remove the listener again
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry<L: ?Sized> {
    id: ListenerId,
    live: AtomicBool,
    listener: Arc<L>,
}

/// Registered listeners of one event source.
///
/// Dispatch walks a snapshot of the list taken when the event is produced:
/// listeners added meanwhile miss that event, listeners removed meanwhile are
/// skipped from the moment of removal.
pub struct ListenerHub<L: ?Sized> {
    next_id: AtomicU64,
    entries: RwLock<Arc<Vec<Arc<Entry<L>>>>>,
}

impl<L: ?Sized> ListenerHub<L> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn add(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(Entry {
            id,
            live: AtomicBool::new(true),
            listener,
        });
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push(entry);
        *entries = Arc::new(next);
        id
    }

    /// Remove a listener; returns `false` if it was not registered
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(removed) = entries.iter().find(|e| e.id == id).cloned() else {
            return false;
        };
        removed.live.store(false, Ordering::Release);
        let next: Vec<_> = entries.iter().filter(|e| e.id != id).cloned().collect();
        *entries = Arc::new(next);
        true
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for entry in entries.iter() {
            entry.live.store(false, Ordering::Release);
        }
        *entries = Arc::new(Vec::new());
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Invoke `f` on every listener registered right now.
    ///
    /// A panicking listener is logged and does not stop delivery to the others.
    pub fn dispatch(&self, mut f: impl FnMut(&L)) {
        let snapshot = self.snapshot();
        for entry in snapshot.iter() {
            if !entry.live.load(Ordering::Acquire) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| f(entry.listener.as_ref()))).is_err() {
                warn!("Listener {:?} panicked during dispatch", entry.id);
            }
        }
    }

    fn snapshot(&self) -> Arc<Vec<Arc<Entry<L>>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<L: ?Sized> Default for ListenerHub<L> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    trait Sink: Send + Sync {
        fn event(&self, value: u32);
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u32>>,
    }

    impl Sink for Recorder {
        fn event(&self, value: u32) {
            self.seen.lock().unwrap().push(value);
        }
    }

    #[test]
    fn test_add_dispatch_remove() {
        let hub: ListenerHub<dyn Sink> = ListenerHub::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let id_a = hub.add(a.clone());
        hub.add(b.clone());
        assert_eq!(hub.len(), 2);

        hub.dispatch(|l| l.event(1));
        assert!(hub.remove(id_a));
        assert!(!hub.remove(id_a));
        hub.dispatch(|l| l.event(2));

        assert_eq!(*a.seen.lock().unwrap(), vec![1]);
        assert_eq!(*b.seen.lock().unwrap(), vec![1, 2]);
    }

    struct Panicky;

    impl Sink for Panicky {
        fn event(&self, _value: u32) {
            panic!("listener bug");
        }
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let hub: ListenerHub<dyn Sink> = ListenerHub::new();
        let after = Arc::new(Recorder::default());
        hub.add(Arc::new(Panicky));
        hub.add(after.clone());
        hub.dispatch(|l| l.event(3));
        assert_eq!(*after.seen.lock().unwrap(), vec![3]);
    }

    #[test]
    fn test_clear() {
        let hub: ListenerHub<dyn Sink> = ListenerHub::new();
        let a = Arc::new(Recorder::default());
        hub.add(a.clone());
        hub.clear();
        assert!(hub.is_empty());
        hub.dispatch(|l| l.event(7));
        assert!(a.seen.lock().unwrap().is_empty());
    }

    struct Adder {
        hub: Arc<ListenerHub<dyn Sink>>,
        late: Arc<Recorder>,
        calls: Mutex<u32>,
    }

    impl Sink for Adder {
        fn event(&self, _value: u32) {
            *self.calls.lock().unwrap() += 1;
            self.hub.add(self.late.clone());
        }
    }

    #[test]
    fn test_listener_added_mid_dispatch_misses_event() {
        let hub: Arc<ListenerHub<dyn Sink>> = Arc::new(ListenerHub::new());
        let late = Arc::new(Recorder::default());
        hub.add(Arc::new(Adder {
            hub: hub.clone(),
            late: late.clone(),
            calls: Mutex::new(0),
        }));

        hub.dispatch(|l| l.event(1));
        assert!(late.seen.lock().unwrap().is_empty());

        hub.dispatch(|l| l.event(2));
        assert_eq!(*late.seen.lock().unwrap(), vec![2]);
    }

    struct Remover {
        hub: Arc<ListenerHub<dyn Sink>>,
        victim: Mutex<Option<ListenerId>>,
    }

    impl Sink for Remover {
        fn event(&self, _value: u32) {
            if let Some(id) = self.victim.lock().unwrap().take() {
                self.hub.remove(id);
            }
        }
    }

    #[test]
    fn test_listener_removed_mid_dispatch_is_skipped() {
        let hub: Arc<ListenerHub<dyn Sink>> = Arc::new(ListenerHub::new());
        let remover = Arc::new(Remover {
            hub: hub.clone(),
            victim: Mutex::new(None),
        });
        hub.add(remover.clone());
        let victim = Arc::new(Recorder::default());
        let victim_id = hub.add(victim.clone());
        *remover.victim.lock().unwrap() = Some(victim_id);

        hub.dispatch(|l| l.event(1));
        assert!(victim.seen.lock().unwrap().is_empty());
        assert_eq!(hub.len(), 1);
    }
}
