//! Side tables recording which managed object stands for which native one.
//!
//! Both tables hold weak references only. A proxy keeps its native object
//! alive, never the other way round, so dropping the last proxy handle frees
//! the pair and leaves a dead slot behind for [`WrapperCache::prune`].

use std::cell::Cell;
use std::collections::HashMap;

use crate::host::{NativeCallback, NativeId, WeakNativeCallback};
use crate::proxy::{CallbackId, ManagedCallback, Proxy, WeakManagedCallback, WeakProxy};

#[derive(Default)]
pub(crate) struct WrapperCache {
    slots: HashMap<NativeId, WeakProxy>,
}

impl WrapperCache {
    pub(crate) fn get(&self, id: NativeId) -> Option<Proxy> {
        self.slots.get(&id).and_then(WeakProxy::upgrade)
    }

    /// Fills the slot for `id`. A live proxy already in the slot wins and is
    /// returned instead.
    pub(crate) fn insert(&mut self, id: NativeId, proxy: &Proxy) -> Option<Proxy> {
        if let Some(existing) = self.get(id) {
            return Some(existing);
        }
        self.slots.insert(id, proxy.downgrade());
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn live(&self) -> usize {
        self.slots.values().filter(|slot| !slot.is_dead()).count()
    }

    /// Drops dead slots and returns how many were removed.
    pub(crate) fn prune(&mut self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_dead());
        before - self.slots.len()
    }
}

/// Table size past which the next sweep runs.
///
/// After a sweep the limit becomes twice the surviving entries, never less
/// than the configured floor, so a table holding mostly live slots is not
/// rescanned on every insert.
pub(crate) struct SweepLimit {
    floor: usize,
    next: Cell<usize>,
}

impl SweepLimit {
    pub(crate) fn new(floor: usize) -> Self {
        Self {
            floor,
            next: Cell::new(floor),
        }
    }

    pub(crate) fn exceeded(&self, len: usize) -> bool {
        len > self.next.get()
    }

    pub(crate) fn reset(&self, remaining: usize) {
        self.next.set(self.floor.max(remaining.saturating_mul(2)));
    }

    pub(crate) fn limit(&self) -> usize {
        self.next.get()
    }
}

/// Pairs of managed callbacks and their native-facing counterparts, in both
/// directions.
#[derive(Default)]
pub(crate) struct CallbackCache {
    to_native: HashMap<CallbackId, WeakNativeCallback>,
    to_managed: HashMap<usize, WeakManagedCallback>,
}

impl CallbackCache {
    pub(crate) fn native_for(&self, callback: &ManagedCallback) -> Option<NativeCallback> {
        self.to_native
            .get(&callback.id())
            .and_then(WeakNativeCallback::upgrade)
    }

    /// Addresses can be reused once a native function is freed, so a hit only
    /// counts if the managed side still points back at this exact function.
    pub(crate) fn managed_for(&self, callback: &NativeCallback) -> Option<ManagedCallback> {
        let managed = self
            .to_managed
            .get(&callback.addr())
            .and_then(WeakManagedCallback::upgrade)?;
        let linked = self.native_for(&managed)?;
        linked.ptr_eq(callback).then_some(managed)
    }

    /// Records that `managed` and `native` are the same function seen from
    /// either side.
    pub(crate) fn link(&mut self, managed: &ManagedCallback, native: &NativeCallback) {
        self.to_native.insert(managed.id(), native.downgrade());
        self.to_managed.insert(native.addr(), managed.downgrade());
    }

    /// Number of managed-to-native slots, dead or alive.
    pub(crate) fn len(&self) -> usize {
        self.to_native.len()
    }

    pub(crate) fn prune(&mut self) -> usize {
        let before = self.to_native.len() + self.to_managed.len();
        self.to_native.retain(|_, slot| slot.upgrade().is_some());
        let to_native = &self.to_native;
        self.to_managed.retain(|addr, slot| {
            slot.upgrade()
                .and_then(|managed| to_native.get(&managed.id()))
                .and_then(WeakNativeCallback::upgrade)
                .is_some_and(|native| native.addr() == *addr)
        });
        before - self.to_native.len() - self.to_managed.len()
    }
}
