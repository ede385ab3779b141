//! The zeroing weak-reference table.
//!
//! Maps referent addresses to the set of weak slots aliasing them, so a
//! referent's destructor can null every alias before the storage goes away.
//! The table does no locking of its own: every entry point takes `&mut self`,
//! and that exclusive borrow is expected to come from the host's side-table
//! lock around this structure.

mod entry;

pub use entry::Referrer;
pub(crate) use entry::WeakEntry;

use crate::host::{Host, ObjRef, WeakAck};
use crate::probe::ProbeTable;

/// Every weak reference in one zone of the host runtime, keyed by referent.
#[derive(Debug)]
pub struct WeakTable {
    entries: ProbeTable<WeakEntry>,
}

impl Default for WeakTable {
    fn default() -> Self {
        Self::new()
    }
}

impl WeakTable {
    /// An empty table. Storage is first allocated by the first registration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: ProbeTable::new(),
        }
    }

    /// Referents with at least one registered slot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no referent is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocated slot count.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Registers `referrer` as a weak alias of `referent`.
    ///
    /// Returns the referent unchanged on success. Null and tagged referents
    /// need no bookkeeping and pass straight through. A referent that is
    /// already deallocating cannot be weakly referenced: with
    /// `crash_if_deallocating` the call panics naming the class and pointer,
    /// otherwise it returns `None`. The slot itself is never written here;
    /// initializing `*referrer` stays the caller's job.
    ///
    /// The host's weak-side lock must be held across this call.
    ///
    /// # Safety
    ///
    /// `referrer` must point to storage that stays valid until the matching
    /// [`Self::unregister`], or until [`Self::clear_on_dealloc`] runs for
    /// `referent`.
    pub unsafe fn register<H: Host>(
        &mut self,
        host: &H,
        referent: Option<ObjRef>,
        referrer: Referrer,
        crash_if_deallocating: bool,
    ) -> Option<ObjRef> {
        let referent = referent?;
        if host.is_tagged(referent) {
            return Some(referent);
        }

        let deallocating = if host.has_custom_retain_release(referent) {
            match host.allows_weak_reference(referent) {
                WeakAck::Allows => false,
                WeakAck::Refuses => true,
                WeakAck::Unresolvable => return None,
            }
        } else {
            host.is_deallocating(referent)
        };
        if deallocating {
            if crash_if_deallocating {
                panic!(
                    "cannot form a weak reference to instance {referent:p} of class `{}`; \
                     the object may be over-released or already deallocating",
                    host.class_name(referent),
                );
            }
            return None;
        }

        match self.entries.get_mut(referent.addr()) {
            Some(entry) => entry.insert(referrer),
            None => {
                self.grow_maybe();
                self.entries.insert(WeakEntry::new(referent, referrer));
            }
        }
        Some(referent)
    }

    /// Forgets `referrer` as an alias of `referent`.
    ///
    /// The slot contents are left untouched: unregistration happens while the
    /// referrer storage is being repurposed, and writing to it is not ours to
    /// do. Unknown referents are ignored; unknown referrers are diagnosed by
    /// the entry.
    ///
    /// The host's weak-side lock must be held across this call.
    pub fn unregister<H: Host>(&mut self, host: &H, referent: Option<ObjRef>, referrer: Referrer) {
        let Some(referent) = referent else { return };
        if let Some(entry) = self.entries.get_mut(referent.addr()) {
            entry.remove(host, referrer);
            if !entry.is_empty() {
                return;
            }
        } else {
            return;
        }
        self.remove_entry(referent);
    }

    /// Nulls every weak alias of `referent` and drops its entry.
    ///
    /// Called exactly once, from the referent's destructor, with the host's
    /// weak-side lock held. Unlike [`Self::unregister`] this *does* store
    /// through the registered slots: their storage still exists and must be
    /// made safe to read after the referent is gone.
    pub fn clear_on_dealloc<H: Host>(&mut self, host: &H, referent: ObjRef) {
        if let Some(entry) = self.entries.get(referent.addr()) {
            // SAFETY: registration obliged every caller to keep its slot
            // valid until unregistered or cleared; this is the clearing.
            unsafe { entry.clear_slots(host) };
        } else {
            return;
        }
        self.remove_entry(referent);
    }

    /// `true` if `referent` currently has registered weak aliases.
    #[cfg(debug_assertions)]
    #[must_use]
    pub fn is_registered(&self, referent: ObjRef) -> bool {
        self.entries.get(referent.addr()).is_some()
    }

    fn remove_entry(&mut self, referent: ObjRef) {
        self.entries.remove(referent.addr());
        self.shrink_maybe();
    }

    // Grow before the insert that would cross 3/4 full; the first growth
    // allocates 64 slots.
    fn grow_maybe(&mut self) {
        let capacity = self.entries.capacity();
        if self.entries.len() + 1 >= capacity * 3 / 4 {
            self.entries.resize((capacity * 2).max(64));
        }
    }

    // Large and mostly-empty tables give their memory back: at 1/16
    // occupancy of 1024 slots or more, shrink to an eighth, which lands the
    // survivors at no more than half full.
    fn shrink_maybe(&mut self) {
        let capacity = self.entries.capacity();
        if capacity >= 1024 && self.entries.len() <= capacity / 16 {
            self.entries.resize(capacity / 8);
        }
    }
}
