//! A counting host and fake-object helpers shared by the scenario tests.

#![allow(dead_code)]

use core::cell::{Cell, RefCell};
use core::ptr::NonNull;
use std::collections::{HashMap, HashSet};

use ibis_refs::{Host, ObjOpaque, ObjRef, Referrer, WeakAck};

/// Leaks a word of heap and hands its address back as an object.
pub fn new_object() -> ObjRef {
    ObjRef::from_raw(NonNull::from(Box::leak(Box::new(0_u64))))
}

/// Fabricates a tagged immediate: an odd address that was never allocated.
pub fn tagged_object(payload: usize) -> ObjRef {
    let addr = (payload << 1) | 1;
    ObjRef::new(NonNull::new(core::ptr::without_provenance_mut::<ObjOpaque>(addr)).unwrap())
}

/// Leaks a weak slot, returning its registered address and a pointer for
/// reading it back.
pub fn new_slot() -> (Referrer, NonNull<Option<ObjRef>>) {
    let slot = NonNull::from(Box::leak(Box::new(None::<ObjRef>)));
    (Referrer::new(slot), slot)
}

/// Reads a weak slot back.
pub fn read_slot(slot: NonNull<Option<ObjRef>>) -> Option<ObjRef> {
    unsafe { *slot.as_ptr() }
}

/// Writes a weak slot, the way `store_weak` would after registration.
pub fn write_slot(slot: NonNull<Option<ObjRef>>, value: Option<ObjRef>) {
    unsafe { *slot.as_ptr() = value }
}

/// Host double tracking retains, releases, copies, and misuse diagnostics.
///
/// Reference counts are recorded as deltas: an object the host never touched
/// sits at zero, and a stored-then-released object returns to zero.
#[derive(Default)]
pub struct TestHost {
    counts: RefCell<HashMap<usize, i64>>,
    autoreleased: RefCell<Vec<usize>>,
    copies: RefCell<HashMap<usize, ObjRef>>,
    deallocating: RefCell<HashSet<usize>>,
    custom_ack: RefCell<HashMap<usize, WeakAck>>,
    forbidden: RefCell<HashSet<usize>>,
    hinted: RefCell<Vec<usize>>,
    weak_errors: Cell<usize>,
}

impl TestHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Net retain/release delta recorded for `obj`.
    pub fn count_of(&self, obj: ObjRef) -> i64 {
        self.counts.borrow().get(&obj.addr()).copied().unwrap_or(0)
    }

    pub fn autorelease_count_of(&self, obj: ObjRef) -> usize {
        self.autoreleased
            .borrow()
            .iter()
            .filter(|&&addr| addr == obj.addr())
            .count()
    }

    /// The object `copy` produced for `src`, if the copy path ran.
    pub fn copy_of(&self, src: ObjRef) -> Option<ObjRef> {
        self.copies.borrow().get(&src.addr()).copied()
    }

    pub fn mark_deallocating(&self, obj: ObjRef) {
        self.deallocating.borrow_mut().insert(obj.addr());
    }

    pub fn set_weak_ack(&self, obj: ObjRef, ack: WeakAck) {
        self.custom_ack.borrow_mut().insert(obj.addr(), ack);
    }

    pub fn forbid_associations(&self, obj: ObjRef) {
        self.forbidden.borrow_mut().insert(obj.addr());
    }

    pub fn hint_count_of(&self, obj: ObjRef) -> usize {
        self.hinted
            .borrow()
            .iter()
            .filter(|&&addr| addr == obj.addr())
            .count()
    }

    pub fn weak_error_count(&self) -> usize {
        self.weak_errors.get()
    }
}

impl Host for TestHost {
    fn retain(&self, value: ObjRef) -> ObjRef {
        *self.counts.borrow_mut().entry(value.addr()).or_insert(0) += 1;
        value
    }

    fn release(&self, value: ObjRef) {
        *self.counts.borrow_mut().entry(value.addr()).or_insert(0) -= 1;
    }

    fn autorelease(&self, value: ObjRef) -> ObjRef {
        self.autoreleased.borrow_mut().push(value.addr());
        value
    }

    fn copy_value(&self, value: ObjRef) -> Option<ObjRef> {
        let copy = new_object();
        self.copies.borrow_mut().insert(value.addr(), copy);
        // Copies come back +1 retained by convention.
        *self.counts.borrow_mut().entry(copy.addr()).or_insert(0) += 1;
        Some(copy)
    }

    fn is_tagged(&self, value: ObjRef) -> bool {
        value.addr() & 1 == 1
    }

    fn class_name(&self, obj: ObjRef) -> String {
        if self.forbidden.borrow().contains(&obj.addr()) {
            "NoBaggage".to_owned()
        } else {
            "TestObject".to_owned()
        }
    }

    fn forbids_associations(&self, obj: ObjRef) -> bool {
        self.forbidden.borrow().contains(&obj.addr())
    }

    fn note_has_associations(&self, obj: ObjRef) {
        self.hinted.borrow_mut().push(obj.addr());
    }

    fn has_custom_retain_release(&self, obj: ObjRef) -> bool {
        self.custom_ack.borrow().contains_key(&obj.addr())
    }

    fn is_deallocating(&self, obj: ObjRef) -> bool {
        self.deallocating.borrow().contains(&obj.addr())
    }

    fn allows_weak_reference(&self, obj: ObjRef) -> WeakAck {
        self.custom_ack
            .borrow()
            .get(&obj.addr())
            .copied()
            .unwrap_or(WeakAck::Allows)
    }

    fn weak_error(&self) {
        self.weak_errors.set(self.weak_errors.get() + 1);
    }
}
