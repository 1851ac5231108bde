use std::fmt;
use std::io;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use pbx_core::Extension;

use crate::tu::Tu;

/// Slot table and registration count, guarded by the registry mutex.
struct Slots {
    entries: Vec<Option<Tu>>,
    count: usize,
}

/// The exchange registry: a bounded table mapping extensions to live units.
///
/// Structural changes are serialized by the registry mutex. The mutex is
/// never held across a pair operation on unit locks; `dial` copies the
/// target handle out first, and `unregister` runs its hangup after the slot
/// is gone. Holding it across a *single* unit lock (registration
/// notification, transport shutdown) is fine because no thread acquires the
/// registry mutex while holding a unit lock.
pub struct Pbx {
    slots: Mutex<Slots>,
    /// Signaled with the freed extension on every unregister; shutdown
    /// blocks on this instead of spinning on the count
    drained_tx: Sender<Extension>,
    drained_rx: Receiver<Extension>,
}

#[derive(Debug)]
pub enum RegistryError {
    /// Extension outside `[0, max_extensions)`
    OutOfRange { ext: Extension, max: usize },
    /// The slot already holds a unit
    Occupied(Extension),
    /// Every slot is taken
    Exhausted,
    /// The unit is not present at its claimed extension
    NotRegistered,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::OutOfRange { ext, max } => {
                write!(f, "Extension {} out of range (0..{})", ext, max)
            }
            RegistryError::Occupied(ext) => write!(f, "Extension {} already registered", ext),
            RegistryError::Exhausted => write!(f, "No free extension available"),
            RegistryError::NotRegistered => write!(f, "Unit is not registered"),
        }
    }
}

impl std::error::Error for RegistryError {}

impl Pbx {
    pub fn new(max_extensions: usize) -> Self {
        let (drained_tx, drained_rx) = unbounded();
        Self {
            slots: Mutex::new(Slots {
                entries: vec![None; max_extensions],
                count: 0,
            }),
            drained_tx,
            drained_rx,
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().expect("registry mutex poisoned")
    }

    /// Number of registered units.
    pub fn count(&self) -> usize {
        self.lock_slots().count
    }

    /// Number of extension slots.
    pub fn capacity(&self) -> usize {
        self.lock_slots().entries.len()
    }

    /// Register `tu` at a specific extension. The registry keeps a handle
    /// for as long as the unit stays registered; the assignment
    /// notification goes out through `set_extension`.
    pub fn register(&self, tu: &Tu, ext: Extension) -> Result<(), RegistryError> {
        let mut slots = self.lock_slots();
        let idx = ext as usize;
        if idx >= slots.entries.len() {
            return Err(RegistryError::OutOfRange {
                ext,
                max: slots.entries.len(),
            });
        }
        if slots.entries[idx].is_some() {
            return Err(RegistryError::Occupied(ext));
        }
        self.install(&mut slots, tu, idx);
        Ok(())
    }

    /// Register `tu` at the lowest free extension. Connection order thus
    /// yields extensions 0, 1, 2, …
    pub fn register_auto(&self, tu: &Tu) -> Result<Extension, RegistryError> {
        let mut slots = self.lock_slots();
        let Some(idx) = slots.entries.iter().position(|slot| slot.is_none()) else {
            return Err(RegistryError::Exhausted);
        };
        self.install(&mut slots, tu, idx);
        Ok(idx as Extension)
    }

    fn install(&self, slots: &mut Slots, tu: &Tu, idx: usize) {
        slots.entries[idx] = Some(tu.clone());
        slots.count += 1;
        tracing::info!("registered tu {} at extension {} ({} active)", tu.id(), idx, slots.count);
        if let Err(e) = tu.set_extension(idx as Extension) {
            // The worker discovers the dead transport on its next read
            tracing::debug!("extension notification failed for tu {}: {}", tu.id(), e);
        }
    }

    /// Unregister `tu`: free its slot, cancel any in-flight call, then drop
    /// the registry's handle and signal the drain channel.
    pub fn unregister(&self, tu: &Tu) -> Result<(), RegistryError> {
        let (ext, registry_handle) = {
            let mut slots = self.lock_slots();
            let Some(ext) = tu.extension() else {
                return Err(RegistryError::NotRegistered);
            };
            let idx = ext as usize;
            let occupant_matches = slots
                .entries
                .get(idx)
                .is_some_and(|slot| slot.as_ref().is_some_and(|t| t.same_unit(tu)));
            if !occupant_matches {
                return Err(RegistryError::NotRegistered);
            }
            let handle = slots.entries[idx].take();
            slots.count -= 1;
            tracing::info!("unregistered tu {} from extension {} ({} active)", tu.id(), ext, slots.count);
            (ext, handle)
        };

        // Unwind any call outside the registry lock; hangup may take both
        // unit locks
        if let Err(e) = tu.hangup() {
            tracing::debug!("hangup during unregister failed for tu {}: {}", tu.id(), e);
        }

        drop(registry_handle);
        let _ = self.drained_tx.send(ext);
        Ok(())
    }

    /// Route a dial: resolve the extension to a live unit (None when the
    /// extension is out of range, vacant, or was unparsable) and let the
    /// source unit's state machine decide the outcome. The registry never
    /// interprets unit state.
    pub fn dial(&self, source: &Tu, ext: Option<Extension>) -> io::Result<()> {
        let target = {
            let slots = self.lock_slots();
            ext.and_then(|e| slots.entries.get(e as usize).cloned().flatten())
        };
        // Registry lock released: the pair acquisition below may block
        source.dial(target.as_ref())
    }

    /// Close every registered transport and wait until the last worker has
    /// unregistered. Returns only when the registry is empty.
    pub fn shutdown(&self) {
        {
            let slots = self.lock_slots();
            tracing::info!("shutting down {} registered units", slots.count);
            for tu in slots.entries.iter().flatten() {
                tu.shutdown_link();
            }
        }

        // Quiescence barrier: every unregister signals the drain channel,
        // the timeout only guards against a signal racing the count check
        loop {
            if self.count() == 0 {
                break;
            }
            match self.drained_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::info!("registry quiesced");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::recorded_tu;
    use pbx_core::TuState;

    #[test]
    fn auto_registration_assigns_lowest_free_extension() {
        let pbx = Pbx::new(4);
        let (a, la) = recorded_tu();
        let (b, _lb) = recorded_tu();
        assert_eq!(pbx.register_auto(&a).unwrap(), 0);
        assert_eq!(pbx.register_auto(&b).unwrap(), 1);
        assert_eq!(pbx.count(), 2);
        assert_eq!(a.extension(), Some(0));
        // Registration notified the client of its extension
        assert_eq!(la.lines(), vec!["ON_HOOK 0\n"]);

        // Freed slots are reused before higher ones
        pbx.unregister(&a).unwrap();
        let (c, _lc) = recorded_tu();
        assert_eq!(pbx.register_auto(&c).unwrap(), 0);
    }

    #[test]
    fn explicit_registration_checks_range_and_occupancy() {
        let pbx = Pbx::new(2);
        let (a, _la) = recorded_tu();
        let (b, _lb) = recorded_tu();

        assert!(matches!(
            pbx.register(&a, 5),
            Err(RegistryError::OutOfRange { ext: 5, max: 2 })
        ));
        pbx.register(&a, 1).unwrap();
        assert!(matches!(pbx.register(&b, 1), Err(RegistryError::Occupied(1))));
        assert_eq!(pbx.count(), 1);
        // The failed candidate was never touched
        assert_eq!(b.extension(), None);
    }

    #[test]
    fn registration_exhausts() {
        let pbx = Pbx::new(1);
        assert_eq!(pbx.capacity(), 1);
        let (a, _la) = recorded_tu();
        let (b, _lb) = recorded_tu();
        pbx.register_auto(&a).unwrap();
        assert!(matches!(pbx.register_auto(&b), Err(RegistryError::Exhausted)));
    }

    #[test]
    fn unregister_rejects_strangers() {
        let pbx = Pbx::new(2);
        let (a, _la) = recorded_tu();
        assert!(matches!(pbx.unregister(&a), Err(RegistryError::NotRegistered)));

        pbx.register_auto(&a).unwrap();
        pbx.unregister(&a).unwrap();
        assert_eq!(pbx.count(), 0);
        // Double unregister fails cleanly
        assert!(matches!(pbx.unregister(&a), Err(RegistryError::NotRegistered)));
    }

    #[test]
    fn unregister_hangs_up_an_active_call() {
        let pbx = Pbx::new(4);
        let (a, _la) = recorded_tu();
        let (b, _lb) = recorded_tu();
        pbx.register_auto(&a).unwrap();
        pbx.register_auto(&b).unwrap();
        a.pickup().unwrap();
        pbx.dial(&a, Some(1)).unwrap();
        b.pickup().unwrap();
        assert_eq!(b.state(), TuState::Connected);

        pbx.unregister(&a).unwrap();
        // The peer was released through the normal hangup path
        assert_eq!(b.state(), TuState::DialTone);
        assert!(b.peer().is_none());
        assert_eq!(pbx.count(), 1);
    }

    #[test]
    fn dial_resolves_targets_through_the_slot_table() {
        let pbx = Pbx::new(2);
        let (a, la) = recorded_tu();
        pbx.register_auto(&a).unwrap();
        a.pickup().unwrap();
        la.clear();

        // Vacant extension, out-of-range extension, unparsable extension:
        // all reach the unit as a null target
        pbx.dial(&a, Some(1)).unwrap();
        assert_eq!(a.state(), TuState::Error);
        a.hangup().unwrap();
        a.pickup().unwrap();
        pbx.dial(&a, Some(99)).unwrap();
        assert_eq!(a.state(), TuState::Error);
        a.hangup().unwrap();
        a.pickup().unwrap();
        pbx.dial(&a, None).unwrap();
        assert_eq!(a.state(), TuState::Error);
    }

    #[test]
    fn dial_by_extension_connects_registered_units() {
        let pbx = Pbx::new(4);
        let (a, _la) = recorded_tu();
        let (b, _lb) = recorded_tu();
        pbx.register_auto(&a).unwrap();
        pbx.register_auto(&b).unwrap();
        a.pickup().unwrap();
        pbx.dial(&a, Some(1)).unwrap();
        assert_eq!(a.state(), TuState::RingBack);
        assert_eq!(b.state(), TuState::Ringing);
    }

    #[test]
    fn shutdown_with_empty_registry_returns_immediately() {
        let pbx = Pbx::new(4);
        pbx.shutdown();
        assert_eq!(pbx.count(), 0);
    }

    #[test]
    fn shutdown_waits_for_unregistration() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let pbx = Arc::new(Pbx::new(4));
        let (a, _la) = recorded_tu();
        pbx.register_auto(&a).unwrap();

        // A stand-in worker that unregisters shortly after shutdown begins
        let worker = {
            let pbx = Arc::clone(&pbx);
            let a = a.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                pbx.unregister(&a).unwrap();
            })
        };

        pbx.shutdown();
        assert_eq!(pbx.count(), 0);
        worker.join().unwrap();
    }
}
