//! Per-referent bookkeeping: every weak slot aliasing one object.

use core::ptr::NonNull;

use crate::host::{Host, ObjRef};
use crate::probe::{ProbeSlot, ProbeTable};

/// Weak slots tracked inline before an entry spills out of line.
pub(crate) const WEAK_INLINE_COUNT: usize = 4;

/// The address of a weak storage slot in host memory.
///
/// The table tracks the slot, not its contents. Registration never touches
/// the pointee; only clearing on dealloc stores through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Referrer(NonNull<Option<ObjRef>>);

// Like object addresses, slot addresses cross threads under the host's weak
// lock; the lock is what serializes access to the pointee.
unsafe impl Send for Referrer {}
unsafe impl Sync for Referrer {}

impl Referrer {
    /// Wraps the address of a weak slot.
    #[must_use]
    pub const fn new(slot: NonNull<Option<ObjRef>>) -> Self {
        Self(slot)
    }

    /// The slot's address bits.
    #[must_use]
    pub fn addr(self) -> usize {
        self.0.as_ptr().addr()
    }

    /// Reads the slot.
    ///
    /// # Safety
    ///
    /// The slot must point to live, initialized storage, with no access
    /// outside the lock guarding this table.
    unsafe fn load(self) -> Option<ObjRef> {
        unsafe { *self.0.as_ptr() }
    }

    /// Stores into the slot, under the same conditions as [`Self::load`].
    ///
    /// # Safety
    ///
    /// See [`Self::load`].
    unsafe fn store(self, value: Option<ObjRef>) {
        unsafe { *self.0.as_ptr() = value }
    }
}

impl ProbeSlot for Referrer {
    fn key(&self) -> usize {
        self.addr()
    }
}

/// All weak referrers of a single referent.
///
/// Up to [`WEAK_INLINE_COUNT`] slots live inline; the first overflow promotes
/// the list to an open-addressed table, and the entry never reverts.
#[derive(Debug)]
pub(crate) struct WeakEntry {
    referent: ObjRef,
    referrers: ReferrerList,
}

#[derive(Debug)]
enum ReferrerList {
    Inline([Option<Referrer>; WEAK_INLINE_COUNT]),
    OutOfLine(ProbeTable<Referrer>),
}

impl ProbeSlot for WeakEntry {
    fn key(&self) -> usize {
        self.referent.addr()
    }
}

impl WeakEntry {
    pub(crate) fn new(referent: ObjRef, referrer: Referrer) -> Self {
        let mut slots = [None; WEAK_INLINE_COUNT];
        slots[0] = Some(referrer);
        Self {
            referent,
            referrers: ReferrerList::Inline(slots),
        }
    }

    /// Appends a referrer. Callers guarantee a slot address is never
    /// registered twice, so no duplicate check is made.
    pub(crate) fn insert(&mut self, referrer: Referrer) {
        match &mut self.referrers {
            ReferrerList::Inline(slots) => {
                for slot in slots.iter_mut() {
                    if slot.is_none() {
                        *slot = Some(referrer);
                        return;
                    }
                }
                // Every inline slot is taken: spill into a table of the same
                // count and retry, which immediately doubles it.
                let mut table = ProbeTable::with_capacity(WEAK_INLINE_COUNT);
                for spilled in slots.iter().flatten() {
                    table.insert(*spilled);
                }
                Self::insert_out_of_line(&mut table, referrer);
                self.referrers = ReferrerList::OutOfLine(table);
            }
            ReferrerList::OutOfLine(table) => Self::insert_out_of_line(table, referrer),
        }
    }

    fn insert_out_of_line(table: &mut ProbeTable<Referrer>, referrer: Referrer) {
        if table.len() >= table.capacity() * 3 / 4 {
            table.resize(table.capacity() * 2);
        }
        table.insert(referrer);
    }

    /// Drops a referrer. An unknown referrer is runtime misuse: diagnosed,
    /// breakpointed, and otherwise ignored.
    pub(crate) fn remove<H: Host>(&mut self, host: &H, referrer: Referrer) {
        match &mut self.referrers {
            ReferrerList::Inline(slots) => {
                for slot in slots.iter_mut() {
                    if *slot == Some(referrer) {
                        *slot = None;
                        return;
                    }
                }
            }
            ReferrerList::OutOfLine(table) => {
                if table.remove(referrer.addr()).is_some() {
                    return;
                }
            }
        }
        log::error!(
            "attempted to unregister unknown weak slot {:#x} referencing object {:p}",
            referrer.addr(),
            self.referent,
        );
        host.weak_error();
    }

    pub(crate) fn is_empty(&self) -> bool {
        match &self.referrers {
            ReferrerList::Inline(slots) => slots.iter().all(Option::is_none),
            ReferrerList::OutOfLine(table) => table.len() == 0,
        }
    }

    /// Nulls every live slot that still points at the referent.
    ///
    /// A slot found holding some other object was reassigned behind the
    /// table's back: diagnosed and left alone, then clearing continues.
    ///
    /// # Safety
    ///
    /// Every registered slot must still point to live storage, per the
    /// registration contract.
    pub(crate) unsafe fn clear_slots<H: Host>(&self, host: &H) {
        let referent = self.referent;
        let clear_one = |referrer: Referrer| {
            // SAFETY: upheld by the caller.
            match unsafe { referrer.load() } {
                Some(current) if current == referent => {
                    // SAFETY: upheld by the caller.
                    unsafe { referrer.store(None) };
                }
                Some(current) => {
                    log::error!(
                        "weak slot {:#x} holds {current:p} instead of {referent:p} during deallocation",
                        referrer.addr(),
                    );
                    host.weak_error();
                }
                None => {}
            }
        };
        match &self.referrers {
            ReferrerList::Inline(slots) => slots.iter().flatten().copied().for_each(clear_one),
            ReferrerList::OutOfLine(table) => table.iter().copied().for_each(clear_one),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_out_of_line(&self) -> bool {
        matches!(self.referrers, ReferrerList::OutOfLine(_))
    }

    #[cfg(test)]
    pub(crate) fn referrer_count(&self) -> usize {
        match &self.referrers {
            ReferrerList::Inline(slots) => slots.iter().flatten().count(),
            ReferrerList::OutOfLine(table) => table.len(),
        }
    }
}
