//! Subscriptions derived from another subscription's result set.
//!
//! A live set of keys (e.g. the threads a principal belongs to) drives one
//! child subscription per key. `DerivedSubscriptions` keeps exactly one
//! attached handle per key in the current set and nothing else.

use std::collections::{BTreeMap, BTreeSet};

use threadline_db::ListenerRegistration;

/// Something that can be detached exactly once.
pub trait Cancel {
    fn cancel(self);
}

impl Cancel for ListenerRegistration {
    fn cancel(self) {
        ListenerRegistration::cancel(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDiff<K> {
    pub to_attach: Vec<K>,
    pub to_detach: Vec<K>,
}

impl<K> SetDiff<K> {
    pub fn is_empty(&self) -> bool {
        self.to_attach.is_empty() && self.to_detach.is_empty()
    }
}

pub fn diff_sets<K: Ord + Clone>(previous: &BTreeSet<K>, next: &BTreeSet<K>) -> SetDiff<K> {
    SetDiff {
        to_attach: next.difference(previous).cloned().collect(),
        to_detach: previous.difference(next).cloned().collect(),
    }
}

struct Attached<H> {
    handle: H,
    generation: u64,
}

pub struct DerivedSubscriptions<K: Ord + Clone, H: Cancel> {
    attached: BTreeMap<K, Attached<H>>,
    next_generation: u64,
}

impl<K: Ord + Clone, H: Cancel> Default for DerivedSubscriptions<K, H> {
    fn default() -> Self {
        Self {
            attached: BTreeMap::new(),
            next_generation: 0,
        }
    }
}

impl<K: Ord + Clone, H: Cancel> DerivedSubscriptions<K, H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detach keys no longer in `next`, then attach new keys via `attach`,
    /// which receives the generation the handle will be tracked under. A key
    /// whose attach returns `None` is retried on the next reconcile.
    pub fn reconcile<F>(&mut self, next: &BTreeSet<K>, mut attach: F) -> SetDiff<K>
    where
        F: FnMut(&K, u64) -> Option<H>,
    {
        let current: BTreeSet<K> = self.attached.keys().cloned().collect();
        let diff = diff_sets(&current, next);

        for key in &diff.to_detach {
            self.detach(key);
        }
        for key in &diff.to_attach {
            let generation = self.next_generation;
            self.next_generation += 1;
            if let Some(handle) = attach(key, generation) {
                self.attached.insert(key.clone(), Attached { handle, generation });
            }
        }
        diff
    }

    /// Whether a notification tagged `generation` comes from the handle
    /// currently attached for `key`.
    pub fn is_current(&self, key: &K, generation: u64) -> bool {
        self.attached
            .get(key)
            .is_some_and(|a| a.generation == generation)
    }

    pub fn detach(&mut self, key: &K) -> bool {
        match self.attached.remove(key) {
            Some(attached) => {
                attached.handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn detach_all(&mut self) {
        for (_, attached) in std::mem::take(&mut self.attached) {
            attached.handle.cancel();
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.attached.keys()
    }

    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }
}

impl<K: Ord + Clone, H: Cancel> Drop for DerivedSubscriptions<K, H> {
    fn drop(&mut self) {
        self.detach_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records its own cancellation.
    struct FakeHandle {
        key: &'static str,
        cancelled: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Cancel for FakeHandle {
        fn cancel(self) {
            self.cancelled.borrow_mut().push(self.key);
        }
    }

    fn set(keys: &[&'static str]) -> BTreeSet<&'static str> {
        keys.iter().copied().collect()
    }

    #[test]
    fn diff_reports_both_directions() {
        let diff = diff_sets(&set(&["a", "b"]), &set(&["b", "c"]));
        assert_eq!(diff.to_attach, vec!["c"]);
        assert_eq!(diff.to_detach, vec!["a"]);
        assert!(diff_sets(&set(&["a"]), &set(&["a"])).is_empty());
    }

    #[test]
    fn attached_set_follows_key_set() {
        let cancelled = Rc::new(RefCell::new(Vec::new()));
        let mut attaches = 0;
        let mut subs: DerivedSubscriptions<&'static str, FakeHandle> = DerivedSubscriptions::new();

        for next in [set(&["a", "b"]), set(&["a", "b"]), set(&["b", "c"]), set(&[])] {
            subs.reconcile(&next, |key, _| {
                attaches += 1;
                Some(FakeHandle {
                    key: *key,
                    cancelled: cancelled.clone(),
                })
            });
            assert_eq!(subs.keys().copied().collect::<BTreeSet<_>>(), next);
        }

        assert_eq!(attaches, 3);
        assert_eq!(*cancelled.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn reattached_key_gets_new_generation() {
        let cancelled = Rc::new(RefCell::new(Vec::new()));
        let mut subs: DerivedSubscriptions<&'static str, FakeHandle> = DerivedSubscriptions::new();
        let mut generations = Vec::new();
        let mut attach = |key: &&'static str, generation: u64| {
            generations.push(generation);
            Some(FakeHandle {
                key: *key,
                cancelled: cancelled.clone(),
            })
        };

        subs.reconcile(&set(&["a"]), &mut attach);
        subs.reconcile(&set(&[]), &mut attach);
        subs.reconcile(&set(&["a"]), &mut attach);

        assert_eq!(generations, vec![0, 1]);
        assert!(!subs.is_current(&"a", 0));
        assert!(subs.is_current(&"a", 1));
    }

    #[test]
    fn failed_attach_is_retried() {
        let cancelled = Rc::new(RefCell::new(Vec::new()));
        let mut subs: DerivedSubscriptions<&'static str, FakeHandle> = DerivedSubscriptions::new();

        subs.reconcile(&set(&["a"]), |_, _| None);
        assert!(subs.is_empty());

        let diff = subs.reconcile(&set(&["a"]), |key, _| {
            Some(FakeHandle {
                key: *key,
                cancelled: cancelled.clone(),
            })
        });
        assert_eq!(diff.to_attach, vec!["a"]);
        assert_eq!(subs.len(), 1);
    }
}
