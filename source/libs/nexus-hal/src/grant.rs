// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Grant-table service contract.
//!
//! A grant table maps slots to (page, peer domain, permission) triples. A
//! driver obtains a slot, binds a page to it for one foreign domain, hands the
//! slot's [`GrantRef`] to the peer out-of-band, and later revokes the binding
//! and returns the slot.

use core::fmt;

/// Log2 of the page size used for frame numbers.
pub const PAGE_SHIFT: u32 = 12;

/// Hypervisor domain identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId(u16);

impl DomainId {
    /// Reserved id meaning "the calling domain"; never a valid grant target.
    pub const SELF: Self = Self(0x7ff0);

    /// Wraps a raw domain id.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the raw domain id.
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dom{}", self.0)
    }
}

/// Physical page frame number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pfn(u64);

impl Pfn {
    /// Wraps a raw frame number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Frame containing the physical address `paddr`.
    pub const fn from_paddr(paddr: u64) -> Self {
        Self(paddr >> PAGE_SHIFT)
    }

    /// Returns the raw frame number.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pfn {:#x}", self.0)
    }
}

/// Backend-visible grant reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GrantRef(u32);

impl GrantRef {
    /// First reference not reserved by the hypervisor ABI (0..=7 are reserved).
    pub const FIRST_USABLE: Self = Self(8);

    /// Wraps a raw reference.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw reference, as written into ring requests.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for GrantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gref {}", self.0)
    }
}

/// Granularity of a grant entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EntryKind {
    /// The whole page is shared.
    FullPage,
}

/// Failures reported by a grant-table service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GrantError {
    /// The hypervisor refused to install the entry.
    #[error("foreign access could not be established")]
    PermitFailed,
    /// The peer still has the page mapped; the entry stays active.
    #[error("grant entry still in use by the peer")]
    RevokeBusy,
    /// The service was used outside an acquire/release window.
    #[error("grant table service not acquired")]
    NotAcquired,
}

/// Grant-table service as consumed by paravirtual drivers.
///
/// All methods take `&self`; implementations must tolerate concurrent calls
/// on distinct descriptors.
pub trait GrantTable {
    /// Exclusive owner of one slot. Dropping a descriptor without passing it to
    /// [`GrantTable::put`] leaves the slot allocated.
    type Descriptor;

    /// Takes a reference on the service. Paired with [`GrantTable::release`].
    fn acquire(&self);

    /// Drops a reference taken by [`GrantTable::acquire`].
    fn release(&self);

    /// Obtains a free slot, or `None` when the table is exhausted.
    fn get(&self) -> Option<Self::Descriptor>;

    /// Returns a slot to the free pool. The slot must carry no active entry.
    fn put(&self, descriptor: Self::Descriptor);

    /// Binds `pfn` to the slot for `domain`.
    fn permit_foreign_access(
        &self,
        descriptor: &Self::Descriptor,
        domain: DomainId,
        kind: EntryKind,
        pfn: Pfn,
        read_only: bool,
    ) -> Result<(), GrantError>;

    /// Removes the binding installed by [`GrantTable::permit_foreign_access`].
    fn revoke_foreign_access(&self, descriptor: &Self::Descriptor) -> Result<(), GrantError>;

    /// Reference the peer uses to map the slot.
    fn reference(&self, descriptor: &Self::Descriptor) -> GrantRef;
}

impl<T: GrantTable + ?Sized> GrantTable for &T {
    type Descriptor = T::Descriptor;

    fn acquire(&self) {
        (**self).acquire()
    }

    fn release(&self) {
        (**self).release()
    }

    fn get(&self) -> Option<Self::Descriptor> {
        (**self).get()
    }

    fn put(&self, descriptor: Self::Descriptor) {
        (**self).put(descriptor)
    }

    fn permit_foreign_access(
        &self,
        descriptor: &Self::Descriptor,
        domain: DomainId,
        kind: EntryKind,
        pfn: Pfn,
        read_only: bool,
    ) -> Result<(), GrantError> {
        (**self).permit_foreign_access(descriptor, domain, kind, pfn, read_only)
    }

    fn revoke_foreign_access(&self, descriptor: &Self::Descriptor) -> Result<(), GrantError> {
        (**self).revoke_foreign_access(descriptor)
    }

    fn reference(&self, descriptor: &Self::Descriptor) -> GrantRef {
        (**self).reference(descriptor)
    }
}

#[cfg(feature = "alloc")]
impl<T: GrantTable + ?Sized> GrantTable for alloc::sync::Arc<T> {
    type Descriptor = T::Descriptor;

    fn acquire(&self) {
        (**self).acquire()
    }

    fn release(&self) {
        (**self).release()
    }

    fn get(&self) -> Option<Self::Descriptor> {
        (**self).get()
    }

    fn put(&self, descriptor: Self::Descriptor) {
        (**self).put(descriptor)
    }

    fn permit_foreign_access(
        &self,
        descriptor: &Self::Descriptor,
        domain: DomainId,
        kind: EntryKind,
        pfn: Pfn,
        read_only: bool,
    ) -> Result<(), GrantError> {
        (**self).permit_foreign_access(descriptor, domain, kind, pfn, read_only)
    }

    fn revoke_foreign_access(&self, descriptor: &Self::Descriptor) -> Result<(), GrantError> {
        (**self).revoke_foreign_access(descriptor)
    }

    fn reference(&self, descriptor: &Self::Descriptor) -> GrantRef {
        (**self).reference(descriptor)
    }
}
