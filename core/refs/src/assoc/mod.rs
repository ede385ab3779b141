//! Arbitrary side-data attached to objects, with retain/copy/assign storage
//! policies.
//!
//! One process-wide table maps each object, by disguised address, to its
//! association map. A single spinlock guards the whole structure:
//! associations are rare enough that finer-grained locking never pays for
//! itself. Every retain, release, and copy side effect runs strictly outside
//! the lock, so user destructors and `copy` implementations cannot deadlock
//! by reentering this module.

mod cell;

pub use cell::AssocKey;
pub(crate) use cell::{AssocCell, ObjectAssocMap};

use core::hash::BuildHasherDefault;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use once_cell::sync::Lazy;
use rustc_hash::FxHasher;
use spin::Mutex;

use crate::host::{Host, ObjRef};
use crate::policy::AssocPolicy;

/// An object address hidden from conservative scanners.
///
/// The bitwise negation of the address. A pure bijection, so the table key
/// never looks like a live pointer to anything walking data regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct DisguisedPtr(usize);

impl DisguisedPtr {
    pub(crate) fn disguise(obj: ObjRef) -> Self {
        Self(!obj.addr())
    }

    #[cfg(test)]
    pub(crate) const fn undisguise(self) -> usize {
        !self.0
    }
}

type AssociationsMap = HashMap<DisguisedPtr, ObjectAssocMap, BuildHasherDefault<FxHasher>>;

static ASSOCIATIONS: Lazy<Mutex<AssociationsMap>> =
    Lazy::new(|| Mutex::new(AssociationsMap::default()));

/// Forces initialization of the global association storage.
///
/// Called once during runtime bootstrap, before any object can be messaged,
/// so table setup never lands inside the first store.
pub fn associations_init() {
    Lazy::force(&ASSOCIATIONS);
}

/// Attaches `value` to `object` under `key`, or breaks the association when
/// the value (after policy acquisition) is null.
///
/// A null `object` is a no-op. Classes may forbid associated objects
/// entirely; violating that is a programming error and panics naming the
/// class and pointer.
pub fn set_associated<H: Host>(
    host: &H,
    object: Option<ObjRef>,
    key: AssocKey,
    value: Option<ObjRef>,
    policy: AssocPolicy,
) {
    let Some(object) = object else { return };
    // Class bit consulted outside the lock.
    if host.forbids_associations(object) {
        panic!(
            "instances of class `{}` cannot have associated objects ({object:p})",
            host.class_name(object),
        );
    }
    let disguised = DisguisedPtr::disguise(object);
    // Retain or copy before taking the lock: the copy path runs arbitrary
    // host code, which must not find the lock held.
    let new_cell = AssocCell::acquire(host, value, policy);

    let displaced: Option<AssocCell>;
    {
        let mut associations = ASSOCIATIONS.lock();
        if new_cell.has_value() {
            let object_map = match associations.entry(disguised) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    // First association for this object: flip the header hint
                    // before anything can observe the table entry.
                    host.note_has_associations(object);
                    entry.insert(ObjectAssocMap::default())
                }
            };
            displaced = object_map.insert(key, new_cell);
        } else {
            displaced = match associations.get_mut(&disguised) {
                Some(object_map) => {
                    let old = object_map.remove(&key);
                    if object_map.is_empty() {
                        associations.remove(&disguised);
                    }
                    old
                }
                None => None,
            };
        }
    }
    // The displaced cell's release runs unlocked so destructors can reenter.
    if let Some(old) = displaced {
        old.release_held(host);
    }
}

/// Reads the association stored on `object` under `key`.
///
/// The getter half of the policy decides how the value comes back: raw,
/// retained (inside the lock, so a racing removal cannot free it first), and
/// autoreleased (outside the lock).
pub fn get_associated<H: Host>(host: &H, object: Option<ObjRef>, key: AssocKey) -> Option<ObjRef> {
    let object = object?;
    let disguised = DisguisedPtr::disguise(object);
    let mut found = AssocCell::empty();
    {
        let associations = ASSOCIATIONS.lock();
        if let Some(cell) = associations.get(&disguised).and_then(|map| map.get(&key)) {
            found = *cell;
            found.retain_returned(host);
        }
    }
    found.autorelease_returned(host)
}

/// Releases and forgets every association on `object`.
///
/// The destructor path: called for any object whose header hints that
/// associations may exist. The per-object map is pulled out whole under the
/// lock and released cell by cell after it.
pub fn remove_all_associations<H: Host>(host: &H, object: ObjRef) {
    let disguised = DisguisedPtr::disguise(object);
    let extracted = { ASSOCIATIONS.lock().remove(&disguised) };
    if let Some(object_map) = extracted {
        for (_, old) in object_map {
            old.release_held(host);
        }
    }
}
