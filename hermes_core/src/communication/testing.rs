//! Test doubles for the communication layer
//!
//! [`InMemoryRegion`] is a pure in-process [`SharedRegion`]: a locked byte
//! vector with synchronous listener dispatch. It gives unit and acceptance
//! tests the full bus semantics without creating kernel objects, and it
//! doubles as the reference behavior the mapped region must match.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::communication::traits::{SharedRegion, UpdateListener};
use crate::error::{HermesError, HermesResult};

/// A [`SharedRegion`] backed by process memory.
///
/// Update listeners run synchronously on the writing thread, after the
/// payload lock is released - the same ordering the mapped region's watcher
/// provides, minus the cross-process hop.
pub struct InMemoryRegion {
    max_payload: usize,
    payload: Mutex<Vec<u8>>,
    listeners: Mutex<HashMap<usize, UpdateListener>>,
    next_listener_id: AtomicUsize,
    disposed: AtomicBool,
}

impl InMemoryRegion {
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            payload: Mutex::new(Vec::new()),
            listeners: Mutex::new(HashMap::new()),
            next_listener_id: AtomicUsize::new(1),
            disposed: AtomicBool::new(false),
        }
    }

    fn ensure_live(&self) -> HermesResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(HermesError::Disposed);
        }
        Ok(())
    }

    /// Fire every listener. Called with the payload lock released so
    /// listeners can re-enter `read`.
    fn notify(&self) {
        for listener in self.listeners.lock().values() {
            listener();
        }
    }
}

impl SharedRegion for InMemoryRegion {
    fn max_payload_size(&self) -> usize {
        self.max_payload
    }

    fn payload_size(&self) -> HermesResult<u32> {
        self.ensure_live()?;
        Ok(self.payload.lock().len() as u32)
    }

    fn read(&self) -> HermesResult<Vec<u8>> {
        self.ensure_live()?;
        Ok(self.payload.lock().clone())
    }

    fn write(&self, payload: &[u8]) -> HermesResult<()> {
        self.ensure_live()?;
        if payload.len() > self.max_payload {
            return Err(HermesError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }
        *self.payload.lock() = payload.to_vec();
        self.notify();
        Ok(())
    }

    fn read_modify_write(
        &self,
        transform: &mut dyn FnMut(Vec<u8>) -> Vec<u8>,
    ) -> HermesResult<()> {
        self.ensure_live()?;
        {
            let mut payload = self.payload.lock();
            let next = transform(payload.clone());
            if next.len() > self.max_payload {
                return Err(HermesError::PayloadTooLarge {
                    size: next.len(),
                    max: self.max_payload,
                });
            }
            *payload = next;
        }
        self.notify();
        Ok(())
    }

    fn add_update_listener(&self, listener: UpdateListener) -> usize {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().insert(id, listener);
        id
    }

    fn remove_update_listener(&self, id: usize) {
        self.listeners.lock().remove(&id);
    }

    fn dispose(&self) -> HermesResult<()> {
        self.disposed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_round_trip() {
        let region = InMemoryRegion::new(64);
        region.write(b"hello").unwrap();
        assert_eq!(region.read().unwrap(), b"hello");
        assert_eq!(region.payload_size().unwrap(), 5);
    }

    #[test]
    fn capacity_enforced() {
        let region = InMemoryRegion::new(4);
        assert!(matches!(
            region.write(b"too long"),
            Err(HermesError::PayloadTooLarge { .. })
        ));
        assert!(region.read().unwrap().is_empty());
    }

    #[test]
    fn listeners_fire_after_commit() {
        use std::sync::Arc;

        let region = Arc::new(InMemoryRegion::new(64));
        let observed = Arc::new(Mutex::new(Vec::new()));

        let region_in_listener = Arc::clone(&region);
        let observed_in_listener = Arc::clone(&observed);
        let id = region.add_update_listener(Box::new(move || {
            // Listeners may re-enter read(): the payload lock is free.
            let bytes = region_in_listener.read().unwrap();
            observed_in_listener.lock().push(bytes);
        }));

        region.write(b"a").unwrap();
        region
            .read_modify_write(&mut |mut current| {
                current.push(b'b');
                current
            })
            .unwrap();

        assert_eq!(*observed.lock(), vec![b"a".to_vec(), b"ab".to_vec()]);

        region.remove_update_listener(id);
        region.write(b"c").unwrap();
        assert_eq!(observed.lock().len(), 2);
    }
}
