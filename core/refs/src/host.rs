//! The seam between the reference tables and the host runtime.
//!
//! The tables never manage object lifetimes themselves: retain, release,
//! autorelease, copying, and every class-metadata query come in through the
//! [`Host`] trait. Objects are handled purely by address.

use core::fmt;
use core::marker::{PhantomData, PhantomPinned};
use core::ptr::NonNull;

/// Opaque storage of a host object. Never instantiated on this side of the
/// seam; only its address is meaningful.
#[derive(Debug)]
#[repr(C)]
pub struct ObjOpaque {
    _data: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// The stable address of a live object, or a tagged immediate.
///
/// `Option<ObjRef>` is the nullable form; the niche keeps it pointer-sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjRef(NonNull<ObjOpaque>);

// Object addresses travel freely between the host's threads. Access through
// them is synchronized by the host runtime, not by this crate.
unsafe impl Send for ObjRef {}
unsafe impl Sync for ObjRef {}

impl ObjRef {
    /// Wraps an object address.
    #[must_use]
    pub const fn new(ptr: NonNull<ObjOpaque>) -> Self {
        Self(ptr)
    }

    /// Wraps any non-null pointer as an object address.
    #[must_use]
    pub fn from_raw<T>(ptr: NonNull<T>) -> Self {
        Self(ptr.cast())
    }

    /// The raw address bits.
    #[must_use]
    pub fn addr(self) -> usize {
        self.0.as_ptr().addr()
    }

    /// The underlying pointer.
    #[must_use]
    pub const fn as_ptr(self) -> NonNull<ObjOpaque> {
        self.0
    }
}

impl fmt::Pointer for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.0, f)
    }
}

/// Outcome of asking an object whether it accepts a weak reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeakAck {
    /// The object accepts the reference.
    Allows,
    /// The object refused; it is deallocating or otherwise weak-averse.
    Refuses,
    /// The query resolved to the forwarding sentinel. Registration returns
    /// null without consulting anything else.
    Unresolvable,
}

/// Primitives the host runtime lends to the reference tables.
///
/// Callbacks run with no table lock held unless a method says otherwise; the
/// two in-lock callbacks must not reenter this crate.
pub trait Host {
    /// Takes a strong reference on `value` and returns it.
    ///
    /// Also invoked from the getter-retain path while the association lock is
    /// held, so it must not call back into the association API.
    fn retain(&self, value: ObjRef) -> ObjRef;

    /// Drops a strong reference. Always invoked outside the table locks; the
    /// destructor it may trigger is free to reenter.
    fn release(&self, value: ObjRef);

    /// Defers a release to the caller's autorelease pool.
    fn autorelease(&self, value: ObjRef) -> ObjRef;

    /// Invokes the object's `copy` selector and returns the already-retained
    /// result, or `None`. Runs arbitrary user code; never called under a
    /// lock.
    fn copy_value(&self, value: ObjRef) -> Option<ObjRef>;

    /// `true` if the address encodes a tagged immediate rather than a heap
    /// object. Tagged values have no lifetime and need no bookkeeping.
    fn is_tagged(&self, value: ObjRef) -> bool;

    /// The object's class name, for diagnostics naming class and pointer.
    fn class_name(&self, obj: ObjRef) -> String;

    /// Class opt-out bit: `true` forbids associated objects on instances.
    /// Read without any lock held.
    fn forbids_associations(&self, obj: ObjRef) -> bool;

    /// Sets the object's has-associated-objects header hint. The hint is
    /// one-way. Invoked under the association lock; must not reenter.
    fn note_has_associations(&self, obj: ObjRef);

    /// Class bit: `true` if the class overrides the default retain/release
    /// machinery.
    fn has_custom_retain_release(&self, obj: ObjRef) -> bool;

    /// Header flag: `true` once the object's destructor has begun. Only
    /// consulted for classes on the default retain/release path.
    fn is_deallocating(&self, obj: ObjRef) -> bool;

    /// Resolves and invokes the object's weak-reference acknowledgement.
    /// Runs arbitrary user code; never called under a lock.
    fn allows_weak_reference(&self, obj: ObjRef) -> WeakAck;

    /// Breakpoint anchor for weak-table misuse diagnostics. A no-op, so a
    /// debugger can break here and catch the misuse in the act.
    fn weak_error(&self) {}
}
