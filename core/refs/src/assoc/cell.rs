//! A single stored association: the policy and the value it governs.

use core::hash::BuildHasherDefault;

use hashbrown::HashMap;
use rustc_hash::FxHasher;

use crate::host::{Host, ObjRef};
use crate::policy::AssocPolicy;

/// Pointer-identity key naming one association on an object.
///
/// Only the address matters; the pointee is never read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct AssocKey(usize);

impl AssocKey {
    /// Uses the address of `ptr` as the key identity.
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr.addr())
    }

    /// Uses a raw address as the key identity.
    #[must_use]
    pub const fn from_addr(addr: usize) -> Self {
        Self(addr)
    }
}

/// All associations of a single object, keyed by pointer identity.
pub(crate) type ObjectAssocMap = HashMap<AssocKey, AssocCell, BuildHasherDefault<FxHasher>>;

/// A `(policy, value)` pair. While the policy's setter owns a reference, the
/// cell holds it until [`Self::release_held`] runs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AssocCell {
    policy: AssocPolicy,
    value: Option<ObjRef>,
}

impl AssocCell {
    pub(crate) const fn empty() -> Self {
        Self {
            policy: AssocPolicy::ASSIGN,
            value: None,
        }
    }

    /// Prepares `value` for storage: retains or copies it per `policy`.
    ///
    /// Runs before the table lock is taken; the copy path executes arbitrary
    /// host code. A copy that comes back null downgrades the store to a
    /// removal.
    pub(crate) fn acquire<H: Host>(host: &H, value: Option<ObjRef>, policy: AssocPolicy) -> Self {
        let value = match value {
            Some(value) if policy.setter_copies() => host.copy_value(value),
            Some(value) if policy.setter_owns() => Some(host.retain(value)),
            value => value,
        };
        Self { policy, value }
    }

    pub(crate) const fn has_value(&self) -> bool {
        self.value.is_some()
    }

    #[cfg(test)]
    pub(crate) const fn value(&self) -> Option<ObjRef> {
        self.value
    }

    /// Drops the ownership the cell held, if any.
    ///
    /// Runs after the table lock is released; the destructor this may trigger
    /// is free to reenter the association API.
    pub(crate) fn release_held<H: Host>(self, host: &H) {
        if self.policy.setter_owns() {
            if let Some(value) = self.value {
                host.release(value);
            }
        }
    }

    /// Applies the retain-on-get half of the getter policy.
    ///
    /// Runs inside the lock, so a racing replacement cannot release the value
    /// between lookup and retain.
    pub(crate) fn retain_returned<H: Host>(&self, host: &H) {
        if self.policy.getter_retains() {
            if let Some(value) = self.value {
                host.retain(value);
            }
        }
    }

    /// Applies the autorelease-on-get half of the getter policy and yields
    /// the value.
    ///
    /// Runs after the lock is released.
    pub(crate) fn autorelease_returned<H: Host>(self, host: &H) -> Option<ObjRef> {
        match self.value {
            Some(value) if self.policy.getter_autoreleases() => Some(host.autorelease(value)),
            value => value,
        }
    }
}
