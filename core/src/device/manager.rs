//! Per-connection open/reuse/fault-close lifecycle
//!
//! Each connection key moves through **Unopened -> Open -> (fault) -> Unopened**.
//! The registry lock is held only for lookup, insert and removal, never while
//! a slot lock is contended. Opening happens under
//! a per-key slot lock so concurrent callers for the same key share a single
//! backend instance, while different keys never wait on each other. Device
//! operations run with no manager lock held at all.

use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};

use hashbrown::HashMap;

use super::Device;
use crate::error::Result;

type Slot<D> = Arc<Mutex<Option<Arc<D>>>>;

/// Registry of open backend instances keyed by connection identity
pub struct DeviceManager<D: ?Sized + Device> {
    slots: RwLock<HashMap<String, Slot<D>>>,
}

impl<D: ?Sized + Device> Default for DeviceManager<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: ?Sized + Device> DeviceManager<D> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Open instance for `key`, if any
    pub fn get(&self, key: &str) -> Option<Arc<D>> {
        let slot = self.existing_slot(key)?;
        lock_slot(&slot, key).clone()
    }

    /// Register `device` under `key`, returning the instance it replaced
    pub fn put(&self, key: &str, device: Arc<D>) -> Option<Arc<D>> {
        let slot = self.slot(key);
        lock_slot(&slot, key).replace(device)
    }

    /// Forget the instance under `key` without closing it
    pub fn delete(&self, key: &str) -> Option<Arc<D>> {
        let slot = self.existing_slot(key)?;
        let device = lock_slot(&slot, key).take();
        drop(slot);
        self.prune(key);
        device
    }

    /// Keys with an open instance
    pub fn keys(&self) -> Vec<String> {
        // Slot locks may be held across an open, so check them with the registry released
        let slots: Vec<(String, Slot<D>)> = self
            .read_slots()
            .iter()
            .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
            .collect();

        let mut keys: Vec<String> = slots
            .into_iter()
            .filter(|(key, slot)| lock_slot(slot, key).is_some())
            .map(|(key, _)| key)
            .collect();
        keys.sort();
        keys
    }

    /// Existing instance for `key`, or a fresh one from `opener`
    ///
    /// Concurrent callers for the same key block on the key's slot while the
    /// first one opens; only one instance is ever created.
    pub fn ensure_opened<F>(&self, key: &str, opener: F) -> Result<Arc<D>>
    where
        F: FnOnce() -> Result<Arc<D>>,
    {
        let slot = self.slot(key);
        let mut guard = lock_slot(&slot, key);

        if let Some(device) = guard.as_ref() {
            if !device.is_closed() {
                return Ok(Arc::clone(device));
            }
            tracing::debug!(key, "registered device reports closed, reopening");
            guard.take();
        }

        match opener() {
            Ok(device) => {
                tracing::info!(key, "opened device");
                *guard = Some(Arc::clone(&device));
                Ok(device)
            }
            Err(err) => {
                drop(guard);
                drop(slot);
                self.prune(key);
                Err(err)
            }
        }
    }

    /// Run `op` against the instance for `key`, opening it first if needed
    ///
    /// A fatal error closes and evicts the instance before it is returned.
    /// An instance that reports itself closed afterwards is evicted too, so
    /// the next call opens a fresh one.
    pub fn use_device<T, F, O>(&self, key: &str, opener: O, op: F) -> Result<T>
    where
        O: FnOnce() -> Result<Arc<D>>,
        F: FnOnce(&D) -> Result<T>,
    {
        let device = self.ensure_opened(key, opener)?;
        let result = op(&*device);

        match &result {
            Err(err) if err.is_fatal() => {
                tracing::warn!(key, error = %err, "fatal device error, closing connection");
                if let Err(close_err) = device.close() {
                    tracing::warn!(key, error = %close_err, "failed to close faulted device");
                }
                self.evict(key, &device);
            }
            _ if device.is_closed() => {
                tracing::debug!(key, "device closed itself, evicting");
                self.evict(key, &device);
            }
            _ => {}
        }

        result
    }

    /// Remove and close the instance under `key` unconditionally
    pub fn close(&self, key: &str) -> Result<()> {
        match self.delete(key) {
            Some(device) => {
                tracing::info!(key, "closing device");
                device.close()
            }
            None => Ok(()),
        }
    }

    /// Remove `device` from `key` unless it was already replaced
    fn evict(&self, key: &str, device: &Arc<D>) {
        let Some(slot) = self.existing_slot(key) else {
            return;
        };
        {
            let mut guard = lock_slot(&slot, key);
            if guard.as_ref().is_some_and(|current| Arc::ptr_eq(current, device)) {
                guard.take();
            }
        }
        drop(slot);
        self.prune(key);
    }

    /// Drop the map entry for `key` once its slot is empty and nobody else holds it
    ///
    /// Callers clone slots only under the registry lock, so a strong count of
    /// one under the write lock means no caller is waiting on the slot.
    fn prune(&self, key: &str) {
        let mut slots = self.slots.write().unwrap_or_else(|e| {
            tracing::warn!("device registry lock poisoned, recovering");
            e.into_inner()
        });
        let idle = slots
            .get(key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1 && lock_slot(slot, key).is_none());
        if idle {
            slots.remove(key);
        }
    }

    /// Number of keys with a registry entry, open or not
    #[cfg(test)]
    pub(super) fn registered(&self) -> usize {
        self.read_slots().len()
    }

    fn read_slots(&self) -> RwLockReadGuard<'_, HashMap<String, Slot<D>>> {
        self.slots.read().unwrap_or_else(|e| {
            tracing::warn!("device registry lock poisoned, recovering");
            e.into_inner()
        })
    }

    fn existing_slot(&self, key: &str) -> Option<Slot<D>> {
        self.read_slots().get(key).cloned()
    }

    fn slot(&self, key: &str) -> Slot<D> {
        if let Some(slot) = self.existing_slot(key) {
            return slot;
        }
        let mut slots = self.slots.write().unwrap_or_else(|e| {
            tracing::warn!("device registry lock poisoned, recovering");
            e.into_inner()
        });
        Arc::clone(
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None))),
        )
    }
}

fn lock_slot<'a, D: ?Sized>(slot: &'a Mutex<Option<Arc<D>>>, key: &str) -> MutexGuard<'a, Option<Arc<D>>> {
    slot.lock().unwrap_or_else(|e| {
        tracing::warn!(key, "device slot lock poisoned, recovering");
        e.into_inner()
    })
}
